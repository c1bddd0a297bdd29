//! Cross-subsystem scenario tests.
