//! Memory management as seen by the capability core.
//!
//! Page-table hardware programming and the frame allocator proper are owned
//! by the platform layer; this module keeps the accounting and address-space
//! bookkeeping the core depends on.

pub mod address_space;
pub mod phys;

pub use address_space::{AddressSpace, Vma, VmaFlags};
pub use phys::PAGE_SIZE;
