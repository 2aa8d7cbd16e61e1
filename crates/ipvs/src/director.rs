//! The kernel director capability: typed CRUD over IPVS services and
//! destinations, with a real netlink-backed implementation on Linux.

use common::Result;

use crate::types::{Destination, Service};

/// Typed CRUD over the in-kernel connection director.
///
/// Two implementations exist: [`NetlinkDirector`] speaking generic netlink to
/// the kernel, and [`crate::MockDirector`] for tests and platforms without
/// the IPVS subsystem.
pub trait Director: Send + Sync {
    /// Enumerate all kernel services.
    fn services(&self) -> Result<Vec<Service>>;
    /// Enumerate the destinations of a service.
    fn destinations(&self, svc: &Service) -> Result<Vec<Destination>>;
    fn create_service(&self, svc: &Service) -> Result<()>;
    fn update_service(&self, svc: &Service) -> Result<()>;
    fn delete_service(&self, svc: &Service) -> Result<()>;
    fn create_destination(&self, svc: &Service, dst: &Destination) -> Result<()>;
    fn update_destination(&self, svc: &Service, dst: &Destination) -> Result<()>;
    fn delete_destination(&self, svc: &Service, dst: &Destination) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::NetlinkDirector;

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::Mutex;

    use common::{Error, Result};

    use crate::commands::IpvsCommand;
    use crate::messages::{IpvsMessage, IpvsNla};
    use crate::netlink::NetlinkSocket;
    use crate::types::{Destination, Service};

    use super::Director;

    /// Kernel-backed director speaking IPVS generic netlink.
    pub struct NetlinkDirector {
        socket: Mutex<NetlinkSocket>,
    }

    impl NetlinkDirector {
        /// Open the netlink channel and resolve the IPVS family.
        pub fn new() -> Result<Self> {
            let socket = NetlinkSocket::new()?;
            Ok(Self {
                socket: Mutex::new(socket),
            })
        }

        fn socket(&self) -> std::sync::MutexGuard<'_, NetlinkSocket> {
            self.socket
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    impl Director for NetlinkDirector {
        fn services(&self) -> Result<Vec<Service>> {
            let records = self
                .socket()
                .dump(IpvsMessage::new(IpvsCommand::GetService))?;
            // Records the controller cannot address (fwmark, non-IPv4) are
            // invisible rather than errors.
            Ok(records.iter().filter_map(IpvsMessage::service).collect())
        }

        fn destinations(&self, svc: &Service) -> Result<Vec<Destination>> {
            let request = IpvsMessage::with_nlas(
                IpvsCommand::GetDest,
                vec![IpvsNla::Service(svc.to_ref_nlas())],
            );
            let records = self.socket().dump(request)?;
            Ok(records.iter().filter_map(IpvsMessage::destination).collect())
        }

        fn create_service(&self, svc: &Service) -> Result<()> {
            self.socket()
                .execute(IpvsMessage::with_nlas(
                    IpvsCommand::NewService,
                    vec![IpvsNla::Service(svc.to_create_nlas())],
                ))
                .map_err(|e| Error::ipvs(format!("create service {}: {}", svc.key(), e)))
        }

        fn update_service(&self, svc: &Service) -> Result<()> {
            self.socket()
                .execute(IpvsMessage::with_nlas(
                    IpvsCommand::SetService,
                    vec![IpvsNla::Service(svc.to_create_nlas())],
                ))
                .map_err(|e| Error::ipvs(format!("update service {}: {}", svc.key(), e)))
        }

        fn delete_service(&self, svc: &Service) -> Result<()> {
            self.socket()
                .execute(IpvsMessage::with_nlas(
                    IpvsCommand::DelService,
                    vec![IpvsNla::Service(svc.to_ref_nlas())],
                ))
                .map_err(|e| Error::ipvs(format!("delete service {}: {}", svc.key(), e)))
        }

        fn create_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
            self.socket()
                .execute(IpvsMessage::with_nlas(
                    IpvsCommand::NewDest,
                    vec![
                        IpvsNla::Service(svc.to_ref_nlas()),
                        IpvsNla::Dest(dst.to_create_nlas()),
                    ],
                ))
                .map_err(|e| {
                    Error::ipvs(format!("create destination {} on {}: {}", dst.key(), svc.key(), e))
                })
        }

        fn update_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
            self.socket()
                .execute(IpvsMessage::with_nlas(
                    IpvsCommand::SetDest,
                    vec![
                        IpvsNla::Service(svc.to_ref_nlas()),
                        IpvsNla::Dest(dst.to_create_nlas()),
                    ],
                ))
                .map_err(|e| {
                    Error::ipvs(format!("update destination {} on {}: {}", dst.key(), svc.key(), e))
                })
        }

        fn delete_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
            self.socket()
                .execute(IpvsMessage::with_nlas(
                    IpvsCommand::DelDest,
                    vec![
                        IpvsNla::Service(svc.to_ref_nlas()),
                        IpvsNla::Dest(dst.to_ref_nlas()),
                    ],
                ))
                .map_err(|e| {
                    Error::ipvs(format!("delete destination {} on {}: {}", dst.key(), svc.key(), e))
                })
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use other::NetlinkDirector;

#[cfg(not(target_os = "linux"))]
mod other {
    use common::{Error, Result};

    use crate::types::{Destination, Service};

    use super::Director;

    /// Placeholder on platforms without the IPVS subsystem; construction
    /// always fails. Use [`crate::MockDirector`] instead.
    pub struct NetlinkDirector;

    impl NetlinkDirector {
        pub fn new() -> Result<Self> {
            Err(Error::ipvs("ipvs is only supported on linux"))
        }
    }

    impl Director for NetlinkDirector {
        fn services(&self) -> Result<Vec<Service>> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn destinations(&self, _svc: &Service) -> Result<Vec<Destination>> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn create_service(&self, _svc: &Service) -> Result<()> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn update_service(&self, _svc: &Service) -> Result<()> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn delete_service(&self, _svc: &Service) -> Result<()> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn create_destination(&self, _svc: &Service, _dst: &Destination) -> Result<()> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn update_destination(&self, _svc: &Service, _dst: &Destination) -> Result<()> {
            Err(Error::ipvs("not supported on this platform"))
        }

        fn delete_destination(&self, _svc: &Service, _dst: &Destination) -> Result<()> {
            Err(Error::ipvs("not supported on this platform"))
        }
    }
}
