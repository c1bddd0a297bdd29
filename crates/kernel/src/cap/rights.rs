//! Capability rights bit flags.
//!
//! Every capability carries a rights mask restricting what operations its
//! handle permits. The meaning of each right is object-kind dependent (file
//! vs channel vs task) but the flags provide a common vocabulary.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const EXECUTE  = 1 << 2;
        const LIST     = 1 << 3;
        const CREATE   = 1 << 4;
        const DELETE   = 1 << 5;
        const DERIVE   = 1 << 6;
        const TRANSFER = 1 << 7;
        const SPAWN    = 1 << 8;
        const TRAVERSE = 1 << 9;

        // Device access rights (for user-space display servers)
        const DEVICE_ACCESS = 1 << 10;
        const IRQ_ACCESS    = 1 << 11;
        const DMA_ACCESS    = 1 << 12;

        // Common combinations
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Rights {
    /// Full rights mask.
    pub const ALL: Rights = Rights::all();

    /// True when every right in `required` is present in `self`.
    #[inline]
    pub fn has(self, required: Rights) -> bool {
        self.contains(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!(Rights::RW, Rights::READ | Rights::WRITE);
        assert!(Rights::RWX.has(Rights::EXECUTE));
        assert!(Rights::ALL.has(Rights::DMA_ACCESS | Rights::TRANSFER));
    }

    #[test]
    fn has_requires_all_bits() {
        let r = Rights::READ | Rights::DERIVE;
        assert!(r.has(Rights::READ));
        assert!(!r.has(Rights::READ | Rights::WRITE));
        assert!(r.has(Rights::empty()));
    }
}
