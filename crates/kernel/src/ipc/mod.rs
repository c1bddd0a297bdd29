//! Message-passing IPC: channels, polling, and poll sets.

pub mod channel;
pub mod poll;
pub mod pollset;
