//! connectionless LDAP "netlogon ping" client
//!
//! A CLDAP ping is a one-datagram LDAP search against port 389: the filter
//! carries the requested domain and an NT-version mask, the reply is a
//! searchResEntry whose single `Netlogon` attribute value is a netlogon
//! response blob (parsed by `wire`). Only the handful of BER shapes this
//! exchange uses are implemented.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};
use rand::random;

use crate::netlogon::flags::DiscoveryFlags;
use crate::netlogon::wire::{ntver, NetlogonResponse};

#[derive(Debug, Display, From, Error)]
pub enum CldapError {
    Wire(crate::netlogon::wire::WireError),
    Io(std::io::Error),
    MalformedMessage,
    TimeOut,
}

type Result<T> = std::result::Result<T, CldapError>;

pub const CLDAP_PORT: u16 = 389;

/// Derive the NT-version mask for a ping from the caller's requirements.
/// The v5/v5-extended base bits are always present.
pub fn request_nt_version(flags: DiscoveryFlags) -> u32 {
    let mut version = ntver::V5 | ntver::V5EX;
    if flags.contains(DiscoveryFlags::PDC_REQUIRED) {
        version |= ntver::PDC;
    }
    if flags.contains(DiscoveryFlags::GC_REQUIRED) {
        version |= ntver::GC;
    }
    if flags.contains(DiscoveryFlags::TRY_NEXTCLOSEST_SITE) {
        version |= ntver::WITH_CLOSEST_SITE;
    }
    if flags.contains(DiscoveryFlags::IP_REQUIRED) {
        version |= ntver::IP;
    }
    version
}

mod ber {
    use super::CldapError;

    pub const BOOLEAN: u8 = 0x01;
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const ENUMERATED: u8 = 0x0A;
    pub const SEQUENCE: u8 = 0x30;
    pub const SET: u8 = 0x31;
    pub const APP_SEARCH_REQUEST: u8 = 0x63;
    pub const APP_SEARCH_RES_ENTRY: u8 = 0x64;
    pub const CTX_FILTER_AND: u8 = 0xA0;
    pub const CTX_FILTER_EQUALITY: u8 = 0xA3;

    fn length(len: usize) -> Vec<u8> {
        if len < 0x80 {
            return vec![len as u8];
        }

        let mut octets = Vec::new();
        let mut remaining = len;
        while remaining > 0 {
            octets.insert(0, (remaining & 0xFF) as u8);
            remaining >>= 8;
        }
        let mut out = vec![0x80 | octets.len() as u8];
        out.extend(octets);
        out
    }

    pub fn wrap(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(length(content.len()));
        out.extend_from_slice(content);
        out
    }

    pub fn integer(value: u32) -> Vec<u8> {
        let mut octets = Vec::new();
        let mut remaining = value;
        loop {
            octets.insert(0, (remaining & 0xFF) as u8);
            remaining >>= 8;
            if remaining == 0 {
                break;
            }
        }
        if octets[0] & 0x80 != 0 {
            octets.insert(0, 0);
        }
        wrap(INTEGER, &octets)
    }

    pub fn enumerated(value: u8) -> Vec<u8> {
        wrap(ENUMERATED, &[value])
    }

    pub fn boolean(value: bool) -> Vec<u8> {
        wrap(BOOLEAN, &[if value { 0xFF } else { 0x00 }])
    }

    pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
        wrap(OCTET_STRING, bytes)
    }

    pub fn parse_integer(content: &[u8]) -> Result<u32, CldapError> {
        if content.is_empty() || content.len() > 5 {
            return Err(CldapError::MalformedMessage);
        }
        let mut value: u64 = 0;
        for b in content {
            value = (value << 8) | (*b as u64);
        }
        if value > u32::MAX as u64 {
            return Err(CldapError::MalformedMessage);
        }
        Ok(value as u32)
    }

    /// Cursor over a run of BER elements.
    pub struct Reader<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        pub fn new(data: &'a [u8]) -> Reader<'a> {
            Reader { data, pos: 0 }
        }

        pub fn has_more(&self) -> bool {
            self.pos < self.data.len()
        }

        fn byte(&mut self) -> Result<u8, CldapError> {
            if self.pos >= self.data.len() {
                return Err(CldapError::MalformedMessage);
            }
            let b = self.data[self.pos];
            self.pos += 1;
            Ok(b)
        }

        /// Read the next element, returning its tag and content.
        pub fn next(&mut self) -> Result<(u8, &'a [u8]), CldapError> {
            let tag = self.byte()?;
            let first = self.byte()?;

            let len = if first & 0x80 == 0 {
                first as usize
            } else {
                let count = (first & 0x7F) as usize;
                if count == 0 || count > 4 {
                    return Err(CldapError::MalformedMessage);
                }
                let mut len = 0usize;
                for _ in 0..count {
                    len = (len << 8) | self.byte()? as usize;
                }
                len
            };

            if self.pos + len > self.data.len() {
                return Err(CldapError::MalformedMessage);
            }
            let content = &self.data[self.pos..self.pos + len];
            self.pos += len;
            Ok((tag, content))
        }

        pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], CldapError> {
            let (t, content) = self.next()?;
            if t != tag {
                return Err(CldapError::MalformedMessage);
            }
            Ok(content)
        }
    }
}

/// Build the CLDAP search datagram for one netlogon ping:
/// `(&(DnsDomain=<realm>)(NtVer=<mask LE>))`, requesting the `Netlogon`
/// attribute, base scope, no limits.
pub fn build_netlogon_search(message_id: u32, realm: &str, nt_version: u32) -> Vec<u8> {
    let eq_domain = ber::wrap(
        ber::CTX_FILTER_EQUALITY,
        &[
            ber::octet_string(b"DnsDomain"),
            ber::octet_string(realm.as_bytes()),
        ]
        .concat(),
    );
    let eq_ntver = ber::wrap(
        ber::CTX_FILTER_EQUALITY,
        &[
            ber::octet_string(b"NtVer"),
            ber::octet_string(&nt_version.to_le_bytes()),
        ]
        .concat(),
    );
    let filter = ber::wrap(ber::CTX_FILTER_AND, &[eq_domain, eq_ntver].concat());

    let attributes = ber::wrap(ber::SEQUENCE, &ber::octet_string(b"Netlogon"));

    let mut body = Vec::new();
    body.extend(ber::octet_string(b"")); // baseObject
    body.extend(ber::enumerated(0)); // scope: baseObject
    body.extend(ber::enumerated(0)); // derefAliases: never
    body.extend(ber::integer(0)); // sizeLimit
    body.extend(ber::integer(0)); // timeLimit
    body.extend(ber::boolean(false)); // typesOnly
    body.extend(filter);
    body.extend(attributes);

    let search = ber::wrap(ber::APP_SEARCH_REQUEST, &body);
    ber::wrap(ber::SEQUENCE, &[ber::integer(message_id), search].concat())
}

/// Extract the `Netlogon` attribute blob from a CLDAP reply datagram.
///
/// A reply datagram packs the searchResEntry and searchResDone messages
/// back to back; messages with a foreign id or without the attribute yield
/// `None` so the caller keeps waiting.
pub fn parse_netlogon_reply(datagram: &[u8], message_id: u32) -> Result<Option<Vec<u8>>> {
    let mut messages = ber::Reader::new(datagram);

    while messages.has_more() {
        let envelope = messages.expect(ber::SEQUENCE)?;
        let mut message = ber::Reader::new(envelope);

        let id = ber::parse_integer(message.expect(ber::INTEGER)?)?;
        let (tag, content) = message.next()?;
        if id != message_id || tag != ber::APP_SEARCH_RES_ENTRY {
            continue;
        }

        let mut entry = ber::Reader::new(content);
        let _object_name = entry.expect(ber::OCTET_STRING)?;

        let mut attributes = ber::Reader::new(entry.expect(ber::SEQUENCE)?);
        while attributes.has_more() {
            let mut attribute = ber::Reader::new(attributes.expect(ber::SEQUENCE)?);
            let attr_type = attribute.expect(ber::OCTET_STRING)?;
            let mut values = ber::Reader::new(attribute.expect(ber::SET)?);

            if attr_type.eq_ignore_ascii_case(b"netlogon") && values.has_more() {
                return Ok(Some(values.expect(ber::OCTET_STRING)?.to_vec()));
            }
        }
    }

    Ok(None)
}

/// The probe seam. The network client below is the production
/// implementation; tests substitute stubs.
pub trait NetlogonPing: Send + Sync {
    fn ping(
        &self,
        target: IpAddr,
        realm: &str,
        nt_version: u32,
        timeout: Duration,
    ) -> Result<NetlogonResponse>;
}

/// One UDP round trip per ping, a fresh socket and a fresh random message id
/// per call. Replies that do not parse or carry a foreign id are discarded
/// until the deadline expires.
pub struct CldapClient {
    port: u16,
}

impl CldapClient {
    pub fn new() -> CldapClient {
        CldapClient { port: CLDAP_PORT }
    }
}

impl NetlogonPing for CldapClient {
    fn ping(
        &self,
        target: IpAddr,
        realm: &str,
        nt_version: u32,
        timeout: Duration,
    ) -> Result<NetlogonResponse> {
        let bind_addr: SocketAddr = match target {
            IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(bind_addr)?;

        let message_id = (random::<u16>() as u32) | 1;
        let request = build_netlogon_search(message_id, realm, nt_version);

        log::debug!(
            "sending CLDAP ping to {} (realm: {}, ntver: 0x{:08x})",
            target,
            realm,
            nt_version
        );
        socket.send_to(&request, SocketAddr::from((target, self.port)))?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or(CldapError::TimeOut)?;
            socket.set_read_timeout(Some(remaining))?;

            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(CldapError::TimeOut);
                }
                Err(e) => return Err(e.into()),
            };

            match parse_netlogon_reply(&buf[..len], message_id) {
                Ok(Some(blob)) => return Ok(NetlogonResponse::from_bytes(&blob)?),
                Ok(None) => continue,
                Err(err) => {
                    log::info!("discarding malformed CLDAP datagram from {}: {}", target, err);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;
    use crate::netlogon::flags::ServerFlags;
    use crate::netlogon::wire::{opcode, SamLogonResponseNt5Ex};

    pub fn sample_reply_datagram(message_id: u32, blob: &[u8]) -> Vec<u8> {
        let attribute = ber::wrap(
            ber::SEQUENCE,
            &[
                ber::octet_string(b"Netlogon"),
                ber::wrap(ber::SET, &ber::octet_string(blob)),
            ]
            .concat(),
        );
        let entry = ber::wrap(
            ber::APP_SEARCH_RES_ENTRY,
            &[ber::octet_string(b""), ber::wrap(ber::SEQUENCE, &attribute)].concat(),
        );
        let result_done = ber::wrap(0x65, &[ber::enumerated(0)].concat());

        let mut datagram = ber::wrap(ber::SEQUENCE, &[ber::integer(message_id), entry].concat());
        datagram.extend(ber::wrap(
            ber::SEQUENCE,
            &[ber::integer(message_id), result_done].concat(),
        ));
        datagram
    }

    #[test]
    fn test_request_golden_bytes() {
        let request = build_netlogon_search(1, "X", ntver::V5 | ntver::V5EX);

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            0x30, 0x43,
                0x02, 0x01, 0x01,
                0x63, 0x3E,
                    0x04, 0x00,
                    0x0A, 0x01, 0x00,
                    0x0A, 0x01, 0x00,
                    0x02, 0x01, 0x00,
                    0x02, 0x01, 0x00,
                    0x01, 0x01, 0x00,
                    0xA0, 0x1F,
                        0xA3, 0x0E,
                            0x04, 0x09, b'D', b'n', b's', b'D', b'o', b'm', b'a', b'i', b'n',
                            0x04, 0x01, b'X',
                        0xA3, 0x0D,
                            0x04, 0x05, b'N', b't', b'V', b'e', b'r',
                            0x04, 0x04, 0x06, 0x00, 0x00, 0x00,
                    0x30, 0x0A,
                        0x04, 0x08, b'N', b'e', b't', b'l', b'o', b'g', b'o', b'n',
        ];

        assert_eq!(expected, request);
    }

    #[test]
    fn test_reply_extraction() {
        let blob = NetlogonResponse::Nt5Ex(SamLogonResponseNt5Ex {
            opcode: opcode::LOGON_SAM_LOGON_RESPONSE_EX,
            server_flags: ServerFlags(ServerFlags::LDAP),
            domain_guid: uuid::Uuid::nil(),
            dns_forest_name: "example.com".to_string(),
            dns_domain_name: "example.com".to_string(),
            dns_host_name: "dc01.example.com".to_string(),
            netbios_domain_name: "EXAMPLE".to_string(),
            netbios_host_name: "DC01".to_string(),
            user_name: "".to_string(),
            dc_site_name: "".to_string(),
            client_site_name: "".to_string(),
            dc_ip: None,
            next_closest_site_name: None,
        })
        .to_bytes()
        .unwrap();

        let datagram = sample_reply_datagram(0x1234, &blob);

        let extracted = parse_netlogon_reply(&datagram, 0x1234).unwrap().unwrap();
        assert_eq!(blob, extracted);

        let parsed = NetlogonResponse::from_bytes(&extracted).unwrap();
        assert_eq!(
            Some("dc01.example.com".to_string()),
            parsed.info().dns_host_name
        );
    }

    #[test]
    fn test_reply_with_foreign_id_ignored() {
        let datagram = sample_reply_datagram(7, &[0u8; 16]);
        assert_eq!(None, parse_netlogon_reply(&datagram, 8).unwrap());
    }

    #[test]
    fn test_garbage_reply_rejected() {
        assert!(parse_netlogon_reply(&[0x30, 0x05, 0x02], 1).is_err());
    }

    #[test]
    fn test_request_nt_version_bits() {
        let base = request_nt_version(DiscoveryFlags(0));
        assert_eq!(ntver::V5 | ntver::V5EX, base);

        let pdc = request_nt_version(DiscoveryFlags(DiscoveryFlags::PDC_REQUIRED));
        assert!(pdc & ntver::PDC != 0);

        let gc = request_nt_version(DiscoveryFlags(
            DiscoveryFlags::GC_REQUIRED | DiscoveryFlags::IP_REQUIRED,
        ));
        assert!(gc & ntver::GC != 0);
        assert!(gc & ntver::IP != 0);

        let site = request_nt_version(DiscoveryFlags(DiscoveryFlags::TRY_NEXTCLOSEST_SITE));
        assert!(site & ntver::WITH_CLOSEST_SITE != 0);
    }
}
