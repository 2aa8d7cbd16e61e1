//! IPVS netlink message serialization and deserialization.
//!
//! Service and destination records travel as nested attribute sets under the
//! top-level IPVS_ATTR_SERVICE / IPVS_ATTR_DEST attributes. Byte order
//! follows the kernel uAPI: ports are big-endian, family/protocol/weight are
//! native, addresses are raw network-order octets.

use std::net::Ipv4Addr;

use netlink_packet_generic::{GenlFamily, GenlHeader};
use netlink_packet_utils::{
    DecodeError, Emitable, Parseable, ParseableParametrized,
    nla::{Nla, NlaBuffer, NlasIterator},
    parsers::{parse_u16, parse_u32},
};

use crate::commands::{IpvsCommand, attr, dest_attr, svc_attr};
use crate::types::{Destination, Protocol, Scheduler, Service};

const AF_INET: u16 = 2;
const FULL_NETMASK: u32 = 0xFFFF_FFFF;

/// IPVS generic netlink message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpvsMessage {
    pub cmd: IpvsCommand,
    pub nlas: Vec<IpvsNla>,
}

impl IpvsMessage {
    pub fn new(cmd: IpvsCommand) -> Self {
        Self {
            cmd,
            nlas: Vec::new(),
        }
    }

    pub fn with_nlas(cmd: IpvsCommand, nlas: Vec<IpvsNla>) -> Self {
        Self { cmd, nlas }
    }

    /// The service record carried by this message, if any.
    pub fn service(&self) -> Option<Service> {
        self.nlas.iter().find_map(|nla| match nla {
            IpvsNla::Service(nlas) => service_from_nlas(nlas),
            _ => None,
        })
    }

    /// The destination record carried by this message, if any.
    pub fn destination(&self) -> Option<Destination> {
        self.nlas.iter().find_map(|nla| match nla {
            IpvsNla::Dest(nlas) => destination_from_nlas(nlas),
            _ => None,
        })
    }
}

/// Top-level IPVS netlink attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpvsNla {
    /// Service information (nested attributes)
    Service(Vec<ServiceNla>),
    /// Destination information (nested attributes)
    Dest(Vec<DestNla>),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Service attributes, nested under IPVS_ATTR_SERVICE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceNla {
    AddressFamily(u16),
    Protocol(u16),
    Address(Ipv4Addr),
    Port(u16),
    Fwmark(u32),
    SchedName(String),
    /// Flags and mask, packed as two u32 values
    Flags(u32, u32),
    Timeout(u32),
    Netmask(u32),
    Other(u16, Vec<u8>),
}

/// Destination attributes, nested under IPVS_ATTR_DEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestNla {
    Address(Ipv4Addr),
    Port(u16),
    FwdMethod(u32),
    Weight(i32),
    UpperThreshold(u32),
    LowerThreshold(u32),
    Other(u16, Vec<u8>),
}

impl Nla for IpvsNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Service(nlas) => nlas.as_slice().buffer_len(),
            Self::Dest(nlas) => nlas.as_slice().buffer_len(),
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Service(_) => attr::SERVICE,
            Self::Dest(_) => attr::DEST,
            Self::Other(kind, _) => *kind,
        }
    }

    fn is_nested(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Dest(_))
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Service(nlas) => nlas.as_slice().emit(buffer),
            Self::Dest(nlas) => nlas.as_slice().emit(buffer),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl Nla for ServiceNla {
    fn value_len(&self) -> usize {
        match self {
            Self::AddressFamily(_) | Self::Protocol(_) | Self::Port(_) => 2,
            Self::Address(_) => 4,
            Self::Fwmark(_) | Self::Timeout(_) | Self::Netmask(_) => 4,
            Self::SchedName(name) => name.len() + 1, // null-terminated
            Self::Flags(_, _) => 8,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::AddressFamily(_) => svc_attr::ADDRESS_FAMILY,
            Self::Protocol(_) => svc_attr::PROTOCOL,
            Self::Address(_) => svc_attr::ADDRESS,
            Self::Port(_) => svc_attr::PORT,
            Self::Fwmark(_) => svc_attr::FWMARK,
            Self::SchedName(_) => svc_attr::SCHED_NAME,
            Self::Flags(_, _) => svc_attr::FLAGS,
            Self::Timeout(_) => svc_attr::TIMEOUT,
            Self::Netmask(_) => svc_attr::NETMASK,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::AddressFamily(v) | Self::Protocol(v) => {
                buffer.copy_from_slice(&v.to_ne_bytes())
            }
            Self::Address(ip) => buffer.copy_from_slice(&ip.octets()),
            Self::Port(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::Fwmark(v) | Self::Timeout(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Netmask(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::SchedName(name) => {
                buffer[..name.len()].copy_from_slice(name.as_bytes());
                buffer[name.len()] = 0;
            }
            Self::Flags(flags, mask) => {
                buffer[..4].copy_from_slice(&flags.to_ne_bytes());
                buffer[4..8].copy_from_slice(&mask.to_ne_bytes());
            }
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl Nla for DestNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Port(_) => 2,
            Self::Address(_) => 4,
            Self::FwdMethod(_) | Self::Weight(_) | Self::UpperThreshold(_) | Self::LowerThreshold(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Address(_) => dest_attr::ADDRESS,
            Self::Port(_) => dest_attr::PORT,
            Self::FwdMethod(_) => dest_attr::FWD_METHOD,
            Self::Weight(_) => dest_attr::WEIGHT,
            Self::UpperThreshold(_) => dest_attr::U_THRESH,
            Self::LowerThreshold(_) => dest_attr::L_THRESH,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Address(ip) => buffer.copy_from_slice(&ip.octets()),
            Self::Port(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::FwdMethod(v) | Self::UpperThreshold(v) | Self::LowerThreshold(v) => {
                buffer.copy_from_slice(&v.to_ne_bytes())
            }
            Self::Weight(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for ServiceNla {
    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, DecodeError> {
        let payload = buf.value();
        Ok(match buf.kind() {
            svc_attr::ADDRESS_FAMILY => Self::AddressFamily(parse_u16(payload)?),
            svc_attr::PROTOCOL => Self::Protocol(parse_u16(payload)?),
            svc_attr::ADDRESS => Self::Address(parse_ipv4(payload)?),
            svc_attr::PORT => Self::Port(parse_be16(payload)?),
            svc_attr::FWMARK => Self::Fwmark(parse_u32(payload)?),
            svc_attr::SCHED_NAME => Self::SchedName(parse_cstring(payload)?),
            svc_attr::TIMEOUT => Self::Timeout(parse_u32(payload)?),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for DestNla {
    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, DecodeError> {
        let payload = buf.value();
        Ok(match buf.kind() {
            dest_attr::ADDRESS => Self::Address(parse_ipv4(payload)?),
            dest_attr::PORT => Self::Port(parse_be16(payload)?),
            dest_attr::FWD_METHOD => Self::FwdMethod(parse_u32(payload)?),
            dest_attr::WEIGHT => Self::Weight(parse_u32(payload)? as i32),
            dest_attr::U_THRESH => Self::UpperThreshold(parse_u32(payload)?),
            dest_attr::L_THRESH => Self::LowerThreshold(parse_u32(payload)?),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

fn parse_ipv4(payload: &[u8]) -> Result<Ipv4Addr, DecodeError> {
    // Address attributes are 16 bytes for IPv6-capable kernels; the IPv4
    // address occupies the leading 4 octets either way.
    if payload.len() < 4 {
        return Err(DecodeError::from("address attribute too short"));
    }
    Ok(Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]))
}

fn parse_be16(payload: &[u8]) -> Result<u16, DecodeError> {
    let bytes: [u8; 2] = payload
        .try_into()
        .map_err(|_| DecodeError::from("invalid u16 attribute"))?;
    Ok(u16::from_be_bytes(bytes))
}

fn parse_cstring(payload: &[u8]) -> Result<String, DecodeError> {
    let s = std::str::from_utf8(payload)
        .map_err(|_| DecodeError::from("invalid string attribute"))?;
    Ok(s.trim_end_matches('\0').to_string())
}

impl Emitable for IpvsMessage {
    fn buffer_len(&self) -> usize {
        self.nlas.as_slice().buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) {
        self.nlas.as_slice().emit(buffer)
    }
}

impl GenlFamily for IpvsMessage {
    fn family_name() -> &'static str {
        "IPVS"
    }

    fn version(&self) -> u8 {
        1
    }

    fn command(&self) -> u8 {
        self.cmd as u8
    }
}

impl ParseableParametrized<[u8], GenlHeader> for IpvsMessage {
    fn parse_with_param(buf: &[u8], header: GenlHeader) -> Result<Self, DecodeError> {
        // Dump replies reuse the New* commands per record.
        let cmd = IpvsCommand::from_u8(header.cmd)
            .ok_or_else(|| DecodeError::from("unknown IPVS command"))?;

        let mut nlas = Vec::new();
        for nla in NlasIterator::new(buf) {
            let nla = nla?;
            match nla.kind() {
                attr::SERVICE => {
                    let mut inner = Vec::new();
                    for sub in NlasIterator::new(nla.value()) {
                        inner.push(ServiceNla::parse(&sub?)?);
                    }
                    nlas.push(IpvsNla::Service(inner));
                }
                attr::DEST => {
                    let mut inner = Vec::new();
                    for sub in NlasIterator::new(nla.value()) {
                        inner.push(DestNla::parse(&sub?)?);
                    }
                    nlas.push(IpvsNla::Dest(inner));
                }
                kind => nlas.push(IpvsNla::Other(kind, nla.value().to_vec())),
            }
        }

        Ok(Self { cmd, nlas })
    }
}

impl Service {
    /// Full attribute set for NEW_SERVICE / SET_SERVICE.
    pub(crate) fn to_create_nlas(&self) -> Vec<ServiceNla> {
        let mut nlas = self.to_ref_nlas();
        nlas.push(ServiceNla::SchedName(self.scheduler.kernel_name().to_string()));
        nlas.push(ServiceNla::Flags(0, FULL_NETMASK));
        nlas.push(ServiceNla::Timeout(0));
        nlas.push(ServiceNla::Netmask(FULL_NETMASK));
        nlas
    }

    /// Identity-only attribute set for DEL_SERVICE / GET_DEST and as the
    /// parent reference on destination commands.
    pub(crate) fn to_ref_nlas(&self) -> Vec<ServiceNla> {
        vec![
            ServiceNla::AddressFamily(AF_INET),
            ServiceNla::Protocol(self.protocol.number()),
            ServiceNla::Address(self.address),
            ServiceNla::Port(self.port),
        ]
    }
}

impl Destination {
    /// Full attribute set for NEW_DEST / SET_DEST.
    pub(crate) fn to_create_nlas(&self) -> Vec<DestNla> {
        let mut nlas = self.to_ref_nlas();
        // Forwarding method left at the kernel default (masquerade), matching
        // ipvsadm when no explicit method is given.
        nlas.push(DestNla::FwdMethod(0));
        nlas.push(DestNla::Weight(self.weight as i32));
        nlas.push(DestNla::UpperThreshold(0));
        nlas.push(DestNla::LowerThreshold(0));
        nlas
    }

    /// Identity-only attribute set for DEL_DEST.
    pub(crate) fn to_ref_nlas(&self) -> Vec<DestNla> {
        vec![
            DestNla::Address(self.address),
            DestNla::Port(self.port),
        ]
    }
}

/// Build a [`Service`] from a dumped attribute set. Returns `None` for
/// records this controller cannot manage (fwmark services, non-IPv4).
pub(crate) fn service_from_nlas(nlas: &[ServiceNla]) -> Option<Service> {
    let mut address = None;
    let mut protocol = None;
    let mut port = None;
    let mut scheduler = None;
    let mut fwmark = 0;
    let mut family = AF_INET;

    for nla in nlas {
        match nla {
            ServiceNla::AddressFamily(v) => family = *v,
            ServiceNla::Protocol(v) => protocol = Some(Protocol::from_number(*v)),
            ServiceNla::Address(ip) => address = Some(*ip),
            ServiceNla::Port(v) => port = Some(*v),
            ServiceNla::SchedName(name) => scheduler = Some(Scheduler::from_kernel_name(name)),
            ServiceNla::Fwmark(v) => fwmark = *v,
            _ => {}
        }
    }

    if fwmark != 0 || family != AF_INET {
        return None;
    }
    Some(Service {
        address: address?,
        protocol: protocol?,
        port: port?,
        scheduler: scheduler?,
    })
}

/// Build a [`Destination`] from a dumped attribute set.
pub(crate) fn destination_from_nlas(nlas: &[DestNla]) -> Option<Destination> {
    let mut address = None;
    let mut port = None;
    let mut weight = None;

    for nla in nlas {
        match nla {
            DestNla::Address(ip) => address = Some(*ip),
            DestNla::Port(v) => port = Some(*v),
            DestNla::Weight(v) => weight = Some((*v).max(0) as u32),
            _ => {}
        }
    }

    Some(Destination {
        address: address?,
        port: port?,
        weight: weight?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_service() -> Service {
        Service {
            address: "192.0.2.10".parse().unwrap(),
            protocol: Protocol::Tcp,
            port: 80,
            scheduler: Scheduler::RoundRobin,
        }
    }

    #[test]
    fn service_nlas_round_trip_through_parse() {
        let svc = sample_service();
        let nlas = svc.to_create_nlas();

        let parsed = service_from_nlas(&nlas).expect("parseable service");
        assert_eq!(parsed, svc);
    }

    #[test]
    fn fwmark_services_are_skipped() {
        let mut nlas = sample_service().to_create_nlas();
        nlas.push(ServiceNla::Fwmark(7));
        assert!(service_from_nlas(&nlas).is_none());
    }

    #[test]
    fn destination_nlas_round_trip_through_parse() {
        let dst = Destination {
            address: "10.0.0.1".parse().unwrap(),
            port: 8080,
            weight: 5,
        };
        let parsed = destination_from_nlas(&dst.to_create_nlas()).expect("parseable destination");
        assert_eq!(parsed, dst);
    }

    #[test]
    fn emitted_message_parses_back() {
        let svc = sample_service();
        let msg = IpvsMessage::with_nlas(
            IpvsCommand::NewService,
            vec![IpvsNla::Service(svc.to_create_nlas())],
        );

        let mut buf = vec![0u8; msg.buffer_len()];
        msg.emit(&mut buf);

        let header = GenlHeader {
            cmd: IpvsCommand::NewService as u8,
            version: 1,
        };
        let parsed = IpvsMessage::parse_with_param(&buf, header).expect("parseable message");
        assert_eq!(parsed.cmd, IpvsCommand::NewService);
        assert_eq!(parsed.service(), Some(svc));
    }
}
