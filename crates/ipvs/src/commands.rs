//! IPVS generic netlink commands and attribute kinds.
//!
//! Based on the kernel's include/uapi/linux/ip_vs.h.

/// IPVS generic netlink commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpvsCommand {
    /// Add a new virtual service
    NewService = 2,
    /// Modify an existing virtual service
    SetService = 3,
    /// Delete a virtual service
    DelService = 4,
    /// Get virtual service information (dump)
    GetService = 5,
    /// Add a new destination to a service
    NewDest = 6,
    /// Modify an existing destination
    SetDest = 7,
    /// Delete a destination from a service
    DelDest = 8,
    /// Get destination information (dump)
    GetDest = 9,
}

impl IpvsCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(Self::NewService),
            3 => Some(Self::SetService),
            4 => Some(Self::DelService),
            5 => Some(Self::GetService),
            6 => Some(Self::NewDest),
            7 => Some(Self::SetDest),
            8 => Some(Self::DelDest),
            9 => Some(Self::GetDest),
            _ => None,
        }
    }
}

/// Top-level IPVS netlink attribute kinds.
pub mod attr {
    /// Service information (nested)
    pub const SERVICE: u16 = 1;
    /// Destination information (nested)
    pub const DEST: u16 = 2;
}

/// Service attribute kinds (nested under `attr::SERVICE`).
pub mod svc_attr {
    /// Address family (AF_INET)
    pub const ADDRESS_FAMILY: u16 = 1;
    /// IP protocol (IPPROTO_TCP, IPPROTO_UDP)
    pub const PROTOCOL: u16 = 2;
    /// Virtual IP address
    pub const ADDRESS: u16 = 3;
    /// Virtual port
    pub const PORT: u16 = 4;
    /// Firewall mark (fwmark services carry this instead of address/port)
    pub const FWMARK: u16 = 5;
    /// Scheduler name (null-terminated string)
    pub const SCHED_NAME: u16 = 6;
    /// Flags and mask, two packed u32 values
    pub const FLAGS: u16 = 7;
    /// Persistence timeout
    pub const TIMEOUT: u16 = 8;
    /// Network mask
    pub const NETMASK: u16 = 9;
}

/// Destination attribute kinds (nested under `attr::DEST`).
pub mod dest_attr {
    /// Destination IP address
    pub const ADDRESS: u16 = 1;
    /// Destination port
    pub const PORT: u16 = 2;
    /// Forwarding method (masq/tunnel/droute)
    pub const FWD_METHOD: u16 = 3;
    /// Weight
    pub const WEIGHT: u16 = 4;
    /// Upper connection threshold
    pub const U_THRESH: u16 = 5;
    /// Lower connection threshold
    pub const L_THRESH: u16 = 6;
}
