//! Per-area syscall handlers.
//!
//! Every handler validates user pointers before dereferencing, resolves
//! handles with the kind and rights the operation requires, then calls into
//! the owning subsystem.

pub mod assign;
pub mod cap;
pub mod channel;
pub mod handle_fs;
pub mod poll;
pub mod sysinfo;
pub mod task;

use crate::cap::{Handle, Kind, Rights};
use crate::error::{Result, Verr};
use crate::viper;

/// Resolve a channel capability to its low-level channel id, requiring
/// `required` rights on the handle.
pub(crate) fn channel_id_for(handle: Handle, required: Rights) -> Result<u32> {
    viper::with_current_cap_table(|ct| {
        ct.get_with_rights(handle, Kind::Channel, required)
            .and_then(|e| e.object.as_channel().map(|c| c.id()))
    })
    .ok_or(Verr::NotSupported)?
    .ok_or(Verr::InvalidHandle)
}
