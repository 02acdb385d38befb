//! Wire schema of the session offload service.
//!
//! The types and the tonic client/server stubs are generated from
//! `proto/sessionoffload.proto` at build time; this crate only adds a few
//! conveniences on top of them.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

#[allow(clippy::all)]
pub mod v1 {
    tonic::include_proto!("sessionoffload.v1");
}

pub use v1::session_table_client::SessionTableClient;
pub use v1::session_table_server::{SessionTable, SessionTableServer};
pub use v1::{
    ActionType, AddSessionResponse, IpVersion, ProtocolId, RequestStatus, SessionRequest,
    SessionRequestArgs, SessionResponse, SessionResponses, SessionState,
};

impl SessionRequest {
    /// Builds a request for the flow `source -> destination`.
    ///
    /// The IP version is derived from the source address; mixing families is
    /// rejected by the service, not here.
    pub fn new(
        session_id: u64,
        source: SocketAddr,
        destination: SocketAddr,
        protocol: ProtocolId,
        action: ActionType,
    ) -> Self {
        let mut request = Self {
            session_id,
            source_ip: ip_to_bytes(source.ip()),
            source_port: source.port().into(),
            destination_ip: ip_to_bytes(destination.ip()),
            destination_port: destination.port().into(),
            ..Default::default()
        };
        request.set_ip_version(match source {
            SocketAddr::V4(_) => IpVersion::Ipv4,
            SocketAddr::V6(_) => IpVersion::Ipv6,
        });
        request.set_protocol_id(protocol);
        request.set_action(action);
        request
    }

    pub fn with_cache_timeout(mut self, seconds: u32) -> Self {
        self.cache_timeout = seconds;
        self
    }

    pub fn source_addr(&self) -> Option<SocketAddr> {
        socket_addr(&self.source_ip, self.source_port)
    }

    pub fn destination_addr(&self) -> Option<SocketAddr> {
        socket_addr(&self.destination_ip, self.destination_port)
    }
}

impl AddSessionResponse {
    pub fn is_accepted(&self) -> bool {
        // compare the raw value: unknown statuses decode to `Accepted` through the getter
        self.request_status == RequestStatus::Accepted as i32
    }
}

impl SessionResponses {
    /// Number of sessions in this page that the device already closed.
    pub fn closed_count(&self) -> usize {
        self.session_info
            .iter()
            .filter(|s| s.session_state() == SessionState::Closed)
            .count()
    }
}

fn ip_to_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn socket_addr(ip: &[u8], port: u32) -> Option<SocketAddr> {
    let port = u16::try_from(port).ok()?;
    let ip = match ip.len() {
        4 => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(ip).ok()?)),
        16 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(ip).ok()?)),
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_request_addresses() {
        let source: SocketAddr = "10.0.0.1:4430".parse().unwrap();
        let destination: SocketAddr = "10.0.0.2:80".parse().unwrap();
        let req = SessionRequest::new(7, source, destination, ProtocolId::Tcp, ActionType::Forward);

        assert_eq!(req.ip_version(), IpVersion::Ipv4);
        assert_eq!(req.source_ip, vec![10, 0, 0, 1]);
        assert_eq!(req.source_addr(), Some(source));
        assert_eq!(req.destination_addr(), Some(destination));
        assert_eq!(req.action(), ActionType::Forward);
    }

    #[test]
    fn test_request_ipv6() {
        let source: SocketAddr = "[fd00::1]:5000".parse().unwrap();
        let destination: SocketAddr = "[fd00::2]:443".parse().unwrap();
        let req = SessionRequest::new(1, source, destination, ProtocolId::Udp, ActionType::Mirror);

        assert_eq!(req.ip_version(), IpVersion::Ipv6);
        assert_eq!(req.source_ip.len(), 16);
        assert_eq!(req.destination_addr(), Some(destination));
    }

    #[test]
    fn test_malformed_addresses() {
        let req = SessionRequest {
            source_ip: vec![1, 2, 3],
            source_port: 80,
            destination_ip: vec![1, 2, 3, 4],
            destination_port: 70_000,
            ..Default::default()
        };
        assert_eq!(req.source_addr(), None);
        assert_eq!(req.destination_addr(), None);
    }

    #[test]
    fn test_unknown_enum_value_decodes_to_default() {
        let resp = AddSessionResponse {
            request_status: 42,
            session_id: 3,
            start_time_ms: 0,
        };
        let decoded = AddSessionResponse::decode(resp.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.request_status, 42);
        // unknown values fall back to the first variant
        assert_eq!(decoded.request_status(), RequestStatus::Accepted);
        assert!(!decoded.is_accepted());
    }

    #[test]
    fn test_closed_count() {
        let mut closed = SessionResponse {
            session_id: 2,
            ..Default::default()
        };
        closed.set_session_state(SessionState::Closed);
        let page = SessionResponses {
            session_info: vec![
                SessionResponse {
                    session_id: 1,
                    ..Default::default()
                },
                closed,
            ],
            next_key: 0,
        };
        assert_eq!(page.closed_count(), 1);
    }
}
