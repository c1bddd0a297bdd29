//! Structures shared between kernel and user space.
//!
//! Everything here crosses the syscall boundary, so layouts are `#[repr(C)]`
//! and guarded by size assertions. Reserved fields exist so the ABI can grow
//! without changing the sizes observed by existing binaries.

/// Snapshot of global physical memory usage returned by `SYS_MEM_INFO`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemInfo {
    pub total_pages: u64,
    pub free_pages: u64,
    pub used_pages: u64,
    pub page_size: u64,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub _reserved: [u8; 8],
}

const _: () = assert!(core::mem::size_of::<MemInfo>() == 64);

/// Cumulative network counters returned by `SYS_NET_STATS`. Filled by the
/// external network stack through its registered provider.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NetStats {
    // Ethernet layer
    pub eth_rx_packets: u64,
    pub eth_tx_packets: u64,
    pub eth_rx_bytes: u64,
    pub eth_tx_bytes: u64,
    pub eth_rx_errors: u64,
    pub eth_tx_errors: u64,
    pub eth_rx_dropped: u64,

    // ARP layer
    pub arp_requests: u64,
    pub arp_replies: u64,

    // IPv4 layer
    pub ip_rx_packets: u64,
    pub ip_tx_packets: u64,
    pub ip_rx_bytes: u64,
    pub ip_tx_bytes: u64,

    // ICMP layer
    pub icmp_rx: u64,
    pub icmp_tx: u64,

    // UDP layer
    pub udp_rx_packets: u64,
    pub udp_tx_packets: u64,

    // TCP layer
    pub tcp_rx_segments: u64,
    pub tcp_tx_segments: u64,
    pub tcp_retransmits: u64,
    pub tcp_active_conns: u32,
    pub tcp_listen_sockets: u32,

    // DNS layer
    pub dns_queries: u64,
    pub dns_responses: u64,

    // TLS layer
    pub tls_handshakes: u64,
    pub tls_rx_records: u64,
    pub tls_tx_records: u64,

    pub _reserved: [u32; 8],
}

/// Capability details returned by `SYS_CAP_QUERY`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CapInfo {
    pub handle: u32,
    pub kind: u32,
    pub rights: u32,
    pub generation: u32,
}

/// One row of `SYS_CAP_LIST` output.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CapListEntry {
    pub handle: u32,
    pub kind: u32,
    pub rights: u32,
}

/// Task details returned by `SYS_TASK_INFO`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub task_id: u32,
    pub state: u32,
    pub viper_id: u64,
    pub name: [u8; 32],
}

impl Default for TaskInfo {
    fn default() -> Self {
        TaskInfo {
            task_id: 0,
            state: 0,
            viper_id: 0,
            name: [0; 32],
        }
    }
}

/// TLS session details surfaced by the external TLS stack.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TlsInfo {
    pub hostname: [u8; 128],
    pub protocol: u16,
    pub cipher: u16,
    pub verified: u8,
    pub connected: u8,
    pub _reserved: [u8; 2],
}

impl Default for TlsInfo {
    fn default() -> Self {
        TlsInfo {
            hostname: [0; 128],
            protocol: 0,
            cipher: 0,
            verified: 0,
            connected: 0,
            _reserved: [0; 2],
        }
    }
}

/// One row of `SYS_ASSIGN_LIST` output.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AssignInfo {
    pub name: [u8; 32],
    pub handle: u32,
    pub flags: u32,
    pub _reserved: [u8; 24],
}

impl Default for AssignInfo {
    fn default() -> Self {
        AssignInfo {
            name: [0; 32],
            handle: 0,
            flags: 0,
            _reserved: [0; 24],
        }
    }
}

const _: () = assert!(core::mem::size_of::<AssignInfo>() == 64);

impl AssignInfo {
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(32);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// Directory entry filled by `SYS_FS_READ_DIR`. `name` is NUL-terminated;
/// longer names are truncated.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FsDirEnt {
    pub inode: u64,
    pub node_type: u8,
    pub name_len: u8,
    pub name: [u8; 256],
}

impl Default for FsDirEnt {
    fn default() -> Self {
        FsDirEnt {
            inode: 0,
            node_type: 0,
            name_len: 0,
            name: [0; 256],
        }
    }
}

impl FsDirEnt {
    pub fn name_str(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }
}

/// One row of `SYS_DEVICE_LIST` output.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub name: [u8; 32],
    pub device_type: [u8; 16],
    pub flags: u32,
    pub irq: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        DeviceInfo {
            name: [0; 32],
            device_type: [0; 16],
            flags: 0,
            irq: 0,
        }
    }
}

/// Copy a string into a fixed NUL-terminated byte field, truncating.
pub fn copy_name(dst: &mut [u8], src: &str) {
    let n = core::cmp::min(src.len(), dst.len() - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
    dst[n] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_sizes_are_stable() {
        assert_eq!(core::mem::size_of::<MemInfo>(), 64);
        assert_eq!(core::mem::size_of::<AssignInfo>(), 64);
        assert_eq!(core::mem::size_of::<CapInfo>(), 16);
        assert_eq!(core::mem::size_of::<CapListEntry>(), 12);
        assert_eq!(core::mem::size_of::<TlsInfo>(), 136);
    }

    #[test]
    fn copy_name_truncates_and_terminates() {
        let mut buf = [0xFFu8; 8];
        copy_name(&mut buf, "longer-than-buffer");
        assert_eq!(&buf[..7], b"longer-");
        assert_eq!(buf[7], 0);
    }
}
