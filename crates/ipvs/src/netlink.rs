//! Netlink communication layer for IPVS.
//!
//! Low-level generic-netlink socket operations: family resolution, single
//! request/ack round-trips for mutations, and multi-part dumps for
//! enumeration.

use bytes::BytesMut;
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NetlinkDeserializable, NetlinkMessage, NetlinkPayload,
    NetlinkSerializable,
};
use netlink_packet_generic::{
    GenlMessage,
    ctrl::{GenlCtrl, GenlCtrlCmd, nlas::GenlCtrlAttrs},
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_GENERIC};
use tracing::{debug, trace};

use crate::messages::IpvsMessage;

/// IPVS generic netlink family name
const IPVS_GENL_NAME: &str = "IPVS";

const RECV_BUF_LEN: usize = 65536;

/// Netlink socket wrapper for IPVS operations.
pub struct NetlinkSocket {
    socket: Socket,
    family_id: u16,
    sequence: u32,
}

impl NetlinkSocket {
    /// Create a new netlink socket and resolve the IPVS family ID.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be created, the IPVS kernel module is not
    /// loaded, or the process lacks CAP_NET_ADMIN.
    pub fn new() -> Result<Self> {
        debug!("creating netlink socket for IPVS");

        let mut socket = Socket::new(NETLINK_GENERIC)
            .map_err(|e| Error::netlink(format!("failed to create netlink socket: {}", e)))?;

        let addr = SocketAddr::new(0, 0);
        socket
            .bind(&addr)
            .map_err(|e| Error::netlink(format!("failed to bind netlink socket: {}", e)))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("failed to connect netlink socket: {}", e)))?;

        let mut nl_socket = Self {
            socket,
            family_id: 0,
            sequence: 0,
        };

        nl_socket.family_id = nl_socket.resolve_family_id(IPVS_GENL_NAME)?;
        debug!(family_id = nl_socket.family_id, "resolved IPVS family");

        Ok(nl_socket)
    }

    /// Get the IPVS family ID.
    pub fn family_id(&self) -> u16 {
        self.family_id
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Resolve a generic netlink family name to its ID.
    fn resolve_family_id(&mut self, family_name: &str) -> Result<u16> {
        debug!(family = family_name, "resolving generic netlink family");

        let mut genlmsg: GenlMessage<GenlCtrl> = GenlMessage::from_payload(GenlCtrl {
            cmd: GenlCtrlCmd::GetFamily,
            nlas: vec![GenlCtrlAttrs::FamilyName(family_name.to_string())],
        });
        genlmsg.set_resolved_family_id(libc::GENL_ID_CTRL as u16);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)?;
        let response: NetlinkMessage<GenlMessage<GenlCtrl>> = self.receive_message()?;

        match response.payload {
            NetlinkPayload::InnerMessage(genlmsg) => {
                for nla in &genlmsg.payload.nlas {
                    if let GenlCtrlAttrs::FamilyId(id) = nla {
                        trace!(family = family_name, id, "found family ID");
                        return Ok(*id);
                    }
                }
                Err(Error::netlink(format!(
                    "family ID not found in response for {}",
                    family_name
                )))
            }
            NetlinkPayload::Error(err) => Err(Error::netlink(format!(
                "netlink error while resolving family {}: {:?}",
                family_name, err.code
            ))),
            _ => Err(Error::netlink("unexpected netlink response type")),
        }
    }

    fn send_message<T>(&mut self, message: &NetlinkMessage<T>) -> Result<()>
    where
        T: NetlinkSerializable + std::fmt::Debug,
    {
        let mut buf = BytesMut::with_capacity(message.buffer_len());
        buf.resize(message.buffer_len(), 0);
        message.serialize(&mut buf);

        trace!(?message, "sending netlink message");

        self.socket
            .send(&buf[..], 0)
            .map_err(|e| Error::netlink(format!("failed to send netlink message: {}", e)))?;

        Ok(())
    }

    fn receive_message<T>(&mut self) -> Result<NetlinkMessage<T>>
    where
        T: NetlinkDeserializable + std::fmt::Debug,
    {
        let mut buf = vec![0u8; RECV_BUF_LEN];

        let len = self
            .socket
            .recv(&mut &mut buf[..], 0)
            .map_err(|e| Error::netlink(format!("failed to receive netlink message: {}", e)))?;

        let message = NetlinkMessage::<T>::deserialize(&buf[..len])
            .map_err(|e| Error::netlink(format!("failed to parse netlink message: {}", e)))?;

        trace!(?message, "received netlink message");

        Ok(message)
    }

    /// Send a mutating IPVS command and wait for the kernel ack.
    pub fn execute(&mut self, message: IpvsMessage) -> Result<()> {
        let mut genlmsg: GenlMessage<IpvsMessage> = GenlMessage::from_payload(message);
        genlmsg.set_resolved_family_id(self.family_id);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_ACK;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)?;
        let response: NetlinkMessage<GenlMessage<IpvsMessage>> = self.receive_message()?;

        match response.payload {
            // Error message with a zero code is the ack.
            NetlinkPayload::Error(err) => match err.code {
                None => Ok(()),
                Some(code) => Err(Error::netlink(
                    std::io::Error::from_raw_os_error(-code.get()).to_string(),
                )),
            },
            NetlinkPayload::InnerMessage(_) => Ok(()),
            _ => Err(Error::netlink("unexpected netlink response type")),
        }
    }

    /// Send a dump IPVS command and collect every record until NLMSG_DONE.
    pub fn dump(&mut self, message: IpvsMessage) -> Result<Vec<IpvsMessage>> {
        let mut genlmsg: GenlMessage<IpvsMessage> = GenlMessage::from_payload(message);
        genlmsg.set_resolved_family_id(self.family_id);

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        self.send_message(&nlmsg)?;

        let mut records = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];

        'recv: loop {
            let len = self
                .socket
                .recv(&mut &mut buf[..], 0)
                .map_err(|e| Error::netlink(format!("failed to receive netlink dump: {}", e)))?;

            let mut offset = 0;
            while offset < len {
                let message: NetlinkMessage<GenlMessage<IpvsMessage>> =
                    NetlinkMessage::deserialize(&buf[offset..len]).map_err(|e| {
                        Error::netlink(format!("failed to parse netlink dump message: {}", e))
                    })?;

                let length = message.header.length as usize;
                if length == 0 {
                    return Err(Error::netlink("zero-length netlink message in dump"));
                }

                match message.payload {
                    NetlinkPayload::InnerMessage(genl) => records.push(genl.payload),
                    NetlinkPayload::Done(_) => break 'recv,
                    NetlinkPayload::Error(err) => {
                        return Err(Error::netlink(format!(
                            "IPVS dump failed: {:?}",
                            err.code
                        )));
                    }
                    _ => {}
                }

                // Messages within a datagram are 4-byte aligned.
                offset += (length + 3) & !3;
            }
        }

        Ok(records)
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        trace!("closing netlink socket");
    }
}
