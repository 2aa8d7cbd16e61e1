//! VIP presence detection.
//!
//! The VIP itself is owned by the external VRRP layer; this module only
//! answers "does this host currently carry the address".

use std::net::Ipv4Addr;

use common::Result;

/// Host network queries needed by the engine.
pub trait NetworkManager: Send + Sync {
    /// Whether the VIP is configured on any local interface.
    fn vip_present(&self, vip: Ipv4Addr) -> Result<bool>;
}

/// Reads the host's interface addresses via `getifaddrs(3)`.
#[derive(Debug, Default)]
pub struct SystemNetworkManager;

impl SystemNetworkManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl NetworkManager for SystemNetworkManager {
    fn vip_present(&self, vip: Ipv4Addr) -> Result<bool> {
        let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();

        // SAFETY: getifaddrs allocates the list into ifap on success; every
        // node is read-only traversed and the list is released exactly once
        // with freeifaddrs.
        unsafe {
            if libc::getifaddrs(&mut ifap) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }

            let mut found = false;
            let mut cursor = ifap;
            while !cursor.is_null() {
                let entry = &*cursor;
                if !entry.ifa_addr.is_null()
                    && (*entry.ifa_addr).sa_family as i32 == libc::AF_INET
                {
                    let sin = &*(entry.ifa_addr as *const libc::sockaddr_in);
                    let addr = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                    if addr == vip {
                        found = true;
                        break;
                    }
                }
                cursor = entry.ifa_next;
            }

            libc::freeifaddrs(ifap);
            Ok(found)
        }
    }
}

#[cfg(not(unix))]
impl NetworkManager for SystemNetworkManager {
    fn vip_present(&self, _vip: Ipv4Addr) -> Result<bool> {
        Err(common::Error::other(
            "address enumeration is not supported on this platform",
        ))
    }
}
