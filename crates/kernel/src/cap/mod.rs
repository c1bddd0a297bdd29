//! Capability system: handles, rights, and per-process capability tables.

pub mod handle;
pub mod rights;
pub mod table;

pub use handle::{Handle, HANDLE_INVALID};
pub use rights::Rights;
pub use table::{Entry, Kind, Table, DEFAULT_CAPACITY, NO_PARENT};
