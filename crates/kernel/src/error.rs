// Kernel error codes shared across the syscall boundary

/// Kernel error kinds.
///
/// Every syscall returns a negative wire code for an error and a non-negative
/// value on success. `Verr` is the in-kernel representation; `code()` produces
/// the value placed in the error return register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verr {
    /// Handle missing, wrong kind, or insufficient rights.
    InvalidHandle,
    /// Bad pointer, oversize argument, or illegal flag combination.
    InvalidArg,
    /// Non-blocking operation on a full or empty channel.
    WouldBlock,
    /// Peer closed the channel.
    ChannelClosed,
    /// Payload exceeds the per-message limit.
    MsgTooLarge,
    /// Allocation failure, table full, or rlimit exceeded.
    OutOfMemory,
    /// Named entity does not exist.
    NotFound,
    /// Subsystem not present or not implemented.
    NotSupported,
    /// Operation forbidden for the caller.
    Permission,
    /// Underlying device or filesystem failure.
    Io,
    /// Unexpected internal failure.
    Unknown,
}

/// Success value placed in the error register when a syscall succeeds.
pub const VOK: i64 = 0;

impl Verr {
    /// Negative wire code for this error.
    pub fn code(self) -> i64 {
        match self {
            Verr::InvalidHandle => -1,
            Verr::InvalidArg => -2,
            Verr::WouldBlock => -3,
            Verr::ChannelClosed => -4,
            Verr::MsgTooLarge => -5,
            Verr::OutOfMemory => -6,
            Verr::NotFound => -7,
            Verr::NotSupported => -8,
            Verr::Permission => -9,
            Verr::Io => -10,
            Verr::Unknown => -11,
        }
    }

    /// Map a wire code back to an error kind. Unknown codes collapse to
    /// `Verr::Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => Verr::InvalidHandle,
            -2 => Verr::InvalidArg,
            -3 => Verr::WouldBlock,
            -4 => Verr::ChannelClosed,
            -5 => Verr::MsgTooLarge,
            -6 => Verr::OutOfMemory,
            -7 => Verr::NotFound,
            -8 => Verr::NotSupported,
            -9 => Verr::Permission,
            -10 => Verr::Io,
            _ => Verr::Unknown,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Verr::InvalidHandle => "Invalid handle",
            Verr::InvalidArg => "Invalid argument",
            Verr::WouldBlock => "Operation would block",
            Verr::ChannelClosed => "Channel closed",
            Verr::MsgTooLarge => "Message too large",
            Verr::OutOfMemory => "Out of memory",
            Verr::NotFound => "Not found",
            Verr::NotSupported => "Not supported",
            Verr::Permission => "Permission denied",
            Verr::Io => "I/O error",
            Verr::Unknown => "Unknown error",
        }
    }
}

pub type Result<T> = core::result::Result<T, Verr>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_stable() {
        assert_eq!(Verr::InvalidHandle.code(), -1);
        assert_eq!(Verr::WouldBlock.code(), -3);
        assert_eq!(Verr::Unknown.code(), -11);
        for code in -11..=-1 {
            let e = Verr::from_code(code);
            if e != Verr::Unknown {
                assert_eq!(e.code(), code);
            }
        }
    }

    #[test]
    fn round_trip() {
        let all = [
            Verr::InvalidHandle,
            Verr::InvalidArg,
            Verr::WouldBlock,
            Verr::ChannelClosed,
            Verr::MsgTooLarge,
            Verr::OutOfMemory,
            Verr::NotFound,
            Verr::NotSupported,
            Verr::Permission,
            Verr::Io,
        ];
        for e in all {
            assert_eq!(Verr::from_code(e.code()), e);
        }
    }
}
