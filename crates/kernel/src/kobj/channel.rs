//! Channel kernel object.
//!
//! The low-level channel subsystem (`ipc::channel`) owns the message queue
//! and blocking behavior. This wrapper ties a channel id and an endpoint mask
//! to a reference-counted object so it can live in capability tables and be
//! transferred between processes. Dropping the object closes each owned
//! endpoint exactly once.

use crate::ipc::channel as lowlevel;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointMask: u8 {
        const SEND = 1 << 0;
        const RECV = 1 << 1;
        const BOTH = Self::SEND.bits() | Self::RECV.bits();
    }
}

/// Reference-counted channel endpoint object.
pub struct ChannelObject {
    channel_id: u32,
    endpoints: EndpointMask,
}

impl ChannelObject {
    /// Create a fresh legacy channel owning both endpoints.
    pub fn create() -> Option<ChannelObject> {
        let id = lowlevel::create_legacy(lowlevel::DEFAULT_PENDING).ok()?;
        Some(ChannelObject {
            channel_id: id,
            endpoints: EndpointMask::BOTH,
        })
    }

    /// Wrap a newly-created channel whose endpoint reference counts are
    /// already initialized. Does not add references.
    pub fn adopt(channel_id: u32, endpoints: EndpointMask) -> Option<ChannelObject> {
        if !lowlevel::exists(channel_id) {
            return None;
        }
        Some(ChannelObject {
            channel_id,
            endpoints,
        })
    }

    /// Wrap an existing channel, incrementing the endpoint reference count.
    /// The existence check and the increment happen under one lock so a
    /// concurrent close cannot slip between them.
    pub fn wrap(channel_id: u32, is_send: bool) -> Option<ChannelObject> {
        lowlevel::add_endpoint_ref(channel_id, is_send).ok()?;
        Some(ChannelObject {
            channel_id,
            endpoints: if is_send {
                EndpointMask::SEND
            } else {
                EndpointMask::RECV
            },
        })
    }

    /// Low-level channel id.
    pub fn id(&self) -> u32 {
        self.channel_id
    }

    pub fn endpoints(&self) -> EndpointMask {
        self.endpoints
    }

    pub fn is_send(&self) -> bool {
        self.endpoints.contains(EndpointMask::SEND)
    }

    pub fn is_recv(&self) -> bool {
        self.endpoints.contains(EndpointMask::RECV)
    }

    pub fn has_message(&self) -> bool {
        lowlevel::has_message(self.channel_id)
    }

    pub fn has_space(&self) -> bool {
        lowlevel::has_space(self.channel_id)
    }
}

impl Drop for ChannelObject {
    fn drop(&mut self) {
        if self.channel_id != 0 {
            if self.endpoints.contains(EndpointMask::SEND) {
                let _ = lowlevel::close_endpoint_by_id(self.channel_id, true);
            }
            if self.endpoints.contains(EndpointMask::RECV) {
                let _ = lowlevel::close_endpoint_by_id(self.channel_id, false);
            }
        }
    }
}
