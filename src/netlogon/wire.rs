//! netlogon mailslot/CLDAP payload formats
//!
//! Implements the SAM-LOGON request and the three response generations a DC
//! may answer with: the NT4 unicode layout, the NT5 layout that added the
//! domain GUID and DNS names, and the NT5-EX layout that moved everything to
//! compressed names and added site information. The response variants are a
//! tagged enum with a single `NetlogonInfo` projection so the rest of the
//! crate never matches on wire generations.
//!
//! Which optional NT5-EX fields are present depends on an NT-version mask,
//! echoed in the fixed-size tail every generation ends with - so a blob is
//! self-describing and `from_bytes` needs no out-of-band context.

use std::net::Ipv4Addr;

use derive_more::{Display, Error, From};
use uuid::Uuid;

use crate::netlogon::buffer::{PacketBuffer, VectorPacketBuffer};
use crate::netlogon::flags::ServerFlags;

#[derive(Debug, Display, From, Error)]
pub enum WireError {
    Buffer(crate::netlogon::buffer::BufferError),
    UnknownOpcode,
    TruncatedPayload,
}

type Result<T> = std::result::Result<T, WireError>;

/// Mailslot/CLDAP operation codes.
pub mod opcode {
    pub const LOGON_PRIMARY_QUERY: u16 = 7;
    pub const LOGON_PRIMARY_RESPONSE: u16 = 12;
    pub const LOGON_SAM_LOGON_REQUEST: u16 = 18;
    pub const LOGON_SAM_LOGON_RESPONSE: u16 = 19;
    pub const LOGON_SAM_PAUSE_RESPONSE: u16 = 20;
    pub const LOGON_SAM_USER_UNKNOWN: u16 = 21;
    pub const LOGON_SAM_LOGON_RESPONSE_EX: u16 = 23;
    pub const LOGON_SAM_PAUSE_RESPONSE_EX: u16 = 24;
    pub const LOGON_SAM_USER_UNKNOWN_EX: u16 = 25;
}

/// NT-version request mask bits.
pub mod ntver {
    pub const V1: u32 = 0x0000_0001;
    pub const V5: u32 = 0x0000_0002;
    pub const V5EX: u32 = 0x0000_0004;
    pub const V5EX_WITH_IP: u32 = 0x0000_0008;
    pub const WITH_CLOSEST_SITE: u32 = 0x0000_0010;
    pub const AVOID_NT4EMUL: u32 = 0x0100_0000;
    pub const PDC: u32 = 0x1000_0000;
    pub const IP: u32 = 0x2000_0000;
    pub const LOCAL: u32 = 0x4000_0000;
    pub const GC: u32 = 0x8000_0000;
}

const LM_TOKEN: u16 = 0xFFFF;

/// The GETDC/SAM-LOGON mailslot request payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamLogonRequest {
    pub computer_name: String,
    pub user_name: String,
    pub mailslot_name: String,
    pub account_control: u32,
    pub nt_version: u32,
}

impl SamLogonRequest {
    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16_le(opcode::LOGON_SAM_LOGON_REQUEST)?;
        buffer.write_u16_le(0)?; // request count
        buffer.write_unicode_z(&self.computer_name)?;
        buffer.write_unicode_z(&self.user_name)?;
        buffer.write_string_z(&self.mailslot_name)?;
        buffer.write_u32_le(self.account_control)?;
        buffer.write_u32_le(0)?; // no domain SID attached
        buffer.write_u32_le(self.nt_version)?;
        buffer.write_u16_le(LM_TOKEN)?;
        buffer.write_u16_le(LM_TOKEN)?;
        Ok(())
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<SamLogonRequest> {
        let op = buffer.read_u16_le()?;
        if op != opcode::LOGON_SAM_LOGON_REQUEST {
            return Err(WireError::UnknownOpcode);
        }

        let _request_count = buffer.read_u16_le()?;
        let computer_name = buffer.read_unicode_z()?;
        let user_name = buffer.read_unicode_z()?;
        let mailslot_name = buffer.read_string_z()?;
        let account_control = buffer.read_u32_le()?;

        let sid_size = buffer.read_u32_le()? as usize;
        if sid_size > 0 {
            // the SID field is 4-aligned
            let pad = (4 - (buffer.pos() & 3)) & 3;
            buffer.step(pad + sid_size)?;
        }

        let nt_version = buffer.read_u32_le()?;
        let _lmnt = buffer.read_u16_le()?;
        let _lm20 = buffer.read_u16_le()?;

        Ok(SamLogonRequest {
            computer_name,
            user_name,
            mailslot_name,
            account_control,
            nt_version,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::new();
        self.write(&mut buffer)?;
        Ok(buffer.buffer)
    }
}

/// NT4-generation response: unicode strings only, no capability flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamLogonResponseNt40 {
    pub opcode: u16,
    pub logon_server: String,
    pub user_name: String,
    pub domain_name: String,
}

impl SamLogonResponseNt40 {
    fn read_body<T: PacketBuffer>(op: u16, buffer: &mut T) -> Result<SamLogonResponseNt40> {
        let logon_server = buffer.read_unicode_z()?;
        let user_name = buffer.read_unicode_z()?;
        let domain_name = buffer.read_unicode_z()?;
        let _nt_version = buffer.read_u32_le()?;
        let _lmnt = buffer.read_u16_le()?;
        let _lm20 = buffer.read_u16_le()?;

        Ok(SamLogonResponseNt40 {
            opcode: op,
            logon_server,
            user_name,
            domain_name,
        })
    }

    fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16_le(self.opcode)?;
        buffer.write_unicode_z(&self.logon_server)?;
        buffer.write_unicode_z(&self.user_name)?;
        buffer.write_unicode_z(&self.domain_name)?;
        buffer.write_u32_le(ntver::V1)?;
        buffer.write_u16_le(LM_TOKEN)?;
        buffer.write_u16_le(LM_TOKEN)?;
        Ok(())
    }
}

/// NT5-generation response: NT4 layout plus domain GUID and DNS names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamLogonResponseNt5 {
    pub opcode: u16,
    pub logon_server: String,
    pub user_name: String,
    pub domain_name: String,
    pub domain_guid: Uuid,
    pub dns_forest_name: String,
    pub dns_domain_name: String,
    pub dns_host_name: String,
    pub dc_ip: Ipv4Addr,
    pub server_flags: ServerFlags,
}

impl SamLogonResponseNt5 {
    fn read_body<T: PacketBuffer>(op: u16, buffer: &mut T) -> Result<SamLogonResponseNt5> {
        let logon_server = buffer.read_unicode_z()?;
        let user_name = buffer.read_unicode_z()?;
        let domain_name = buffer.read_unicode_z()?;
        let domain_guid = read_guid(buffer)?;
        let _null_guid = read_guid(buffer)?;

        let mut dns_forest_name = String::new();
        buffer.read_qname(&mut dns_forest_name)?;
        let mut dns_domain_name = String::new();
        buffer.read_qname(&mut dns_domain_name)?;
        let mut dns_host_name = String::new();
        buffer.read_qname(&mut dns_host_name)?;

        let ip = buffer.read_bytes(4)?;
        let dc_ip = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);

        let server_flags = ServerFlags(buffer.read_u32_le()?);
        let _nt_version = buffer.read_u32_le()?;
        let _lmnt = buffer.read_u16_le()?;
        let _lm20 = buffer.read_u16_le()?;

        Ok(SamLogonResponseNt5 {
            opcode: op,
            logon_server,
            user_name,
            domain_name,
            domain_guid,
            dns_forest_name,
            dns_domain_name,
            dns_host_name,
            dc_ip,
            server_flags,
        })
    }

    fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16_le(self.opcode)?;
        buffer.write_unicode_z(&self.logon_server)?;
        buffer.write_unicode_z(&self.user_name)?;
        buffer.write_unicode_z(&self.domain_name)?;
        write_guid(buffer, &self.domain_guid)?;
        write_guid(buffer, &Uuid::nil())?;
        buffer.write_qname(&self.dns_forest_name)?;
        buffer.write_qname(&self.dns_domain_name)?;
        buffer.write_qname(&self.dns_host_name)?;
        buffer.write_bytes(&self.dc_ip.octets())?;
        buffer.write_u32_le(self.server_flags.0)?;
        buffer.write_u32_le(ntver::V1 | ntver::V5)?;
        buffer.write_u16_le(LM_TOKEN)?;
        buffer.write_u16_le(LM_TOKEN)?;
        Ok(())
    }
}

/// NT5-EX-generation response: compressed names and site information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamLogonResponseNt5Ex {
    pub opcode: u16,
    pub server_flags: ServerFlags,
    pub domain_guid: Uuid,
    pub dns_forest_name: String,
    pub dns_domain_name: String,
    pub dns_host_name: String,
    pub netbios_domain_name: String,
    pub netbios_host_name: String,
    pub user_name: String,
    pub dc_site_name: String,
    pub client_site_name: String,
    pub dc_ip: Option<Ipv4Addr>,
    pub next_closest_site_name: Option<String>,
}

impl SamLogonResponseNt5Ex {
    fn read_body<T: PacketBuffer>(
        op: u16,
        buffer: &mut T,
        requested: u32,
    ) -> Result<SamLogonResponseNt5Ex> {
        let _sbz = buffer.read_u16_le()?;
        let server_flags = ServerFlags(buffer.read_u32_le()?);
        let domain_guid = read_guid(buffer)?;

        let mut names = [
            String::new(), // forest
            String::new(), // dns domain
            String::new(), // dns host
            String::new(), // netbios domain
            String::new(), // netbios host
            String::new(), // user
            String::new(), // dc site
            String::new(), // client site
        ];
        for name in names.iter_mut() {
            buffer.read_qname(name)?;
        }

        let dc_ip = if requested & ntver::V5EX_WITH_IP != 0 {
            let size = buffer.read()? as usize;
            if size < 8 {
                return Err(WireError::TruncatedPayload);
            }
            let sockaddr = buffer.read_bytes(size)?;
            // sockaddr_in: family(2) port(2) addr(4) zero-pad
            Some(Ipv4Addr::new(
                sockaddr[4],
                sockaddr[5],
                sockaddr[6],
                sockaddr[7],
            ))
        } else {
            None
        };

        let next_closest_site_name = if requested & ntver::WITH_CLOSEST_SITE != 0 {
            let mut site = String::new();
            buffer.read_qname(&mut site)?;
            Some(site)
        } else {
            None
        };

        let _nt_version = buffer.read_u32_le()?;
        let _lmnt = buffer.read_u16_le()?;
        let _lm20 = buffer.read_u16_le()?;

        let [dns_forest_name, dns_domain_name, dns_host_name, netbios_domain_name, netbios_host_name, user_name, dc_site_name, client_site_name] =
            names;

        Ok(SamLogonResponseNt5Ex {
            opcode: op,
            server_flags,
            domain_guid,
            dns_forest_name,
            dns_domain_name,
            dns_host_name,
            netbios_domain_name,
            netbios_host_name,
            user_name,
            dc_site_name,
            client_site_name,
            dc_ip,
            next_closest_site_name,
        })
    }

    fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16_le(self.opcode)?;
        buffer.write_u16_le(0)?; // sbz
        buffer.write_u32_le(self.server_flags.0)?;
        write_guid(buffer, &self.domain_guid)?;

        buffer.write_qname(&self.dns_forest_name)?;
        buffer.write_qname(&self.dns_domain_name)?;
        buffer.write_qname(&self.dns_host_name)?;
        buffer.write_qname(&self.netbios_domain_name)?;
        buffer.write_qname(&self.netbios_host_name)?;
        buffer.write_qname(&self.user_name)?;
        buffer.write_qname(&self.dc_site_name)?;
        buffer.write_qname(&self.client_site_name)?;

        if let Some(ip) = self.dc_ip {
            buffer.write(16)?;
            buffer.write_u16_le(2)?; // AF_INET
            buffer.write_u16_le(0)?; // port, unused
            buffer.write_bytes(&ip.octets())?;
            buffer.write_bytes(&[0u8; 8])?;
        }

        if let Some(ref site) = self.next_closest_site_name {
            buffer.write_qname(site)?;
        }

        buffer.write_u32_le(self.nt_version())?;
        buffer.write_u16_le(LM_TOKEN)?;
        buffer.write_u16_le(LM_TOKEN)?;
        Ok(())
    }

    fn nt_version(&self) -> u32 {
        let mut ver = ntver::V1 | ntver::V5EX;
        if self.dc_ip.is_some() {
            ver |= ntver::V5EX_WITH_IP;
        }
        if self.next_closest_site_name.is_some() {
            ver |= ntver::WITH_CLOSEST_SITE;
        }
        ver
    }
}

/// A netlogon response of any generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetlogonResponse {
    Nt40(SamLogonResponseNt40),
    Nt5(SamLogonResponseNt5),
    Nt5Ex(SamLogonResponseNt5Ex),
}

impl NetlogonResponse {
    /// Parse a response, using the NT-version mask the request carried to
    /// decide which generation and which optional fields to expect.
    pub fn read<T: PacketBuffer>(buffer: &mut T, requested: u32) -> Result<NetlogonResponse> {
        let op = buffer.read_u16_le()?;

        match op {
            opcode::LOGON_SAM_LOGON_RESPONSE_EX
            | opcode::LOGON_SAM_PAUSE_RESPONSE_EX
            | opcode::LOGON_SAM_USER_UNKNOWN_EX => Ok(NetlogonResponse::Nt5Ex(
                SamLogonResponseNt5Ex::read_body(op, buffer, requested)?,
            )),
            opcode::LOGON_SAM_LOGON_RESPONSE
            | opcode::LOGON_SAM_PAUSE_RESPONSE
            | opcode::LOGON_SAM_USER_UNKNOWN
            | opcode::LOGON_PRIMARY_RESPONSE => {
                if requested & ntver::V5 != 0 {
                    Ok(NetlogonResponse::Nt5(SamLogonResponseNt5::read_body(
                        op, buffer,
                    )?))
                } else {
                    Ok(NetlogonResponse::Nt40(SamLogonResponseNt40::read_body(
                        op, buffer,
                    )?))
                }
            }
            _ => Err(WireError::UnknownOpcode),
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        match self {
            NetlogonResponse::Nt40(r) => r.write(buffer),
            NetlogonResponse::Nt5(r) => r.write(buffer),
            NetlogonResponse::Nt5Ex(r) => r.write(buffer),
        }
    }

    /// Parse a response from raw bytes. Every generation ends with
    /// `NtVersion (4) LmNtToken (2) Lm20Token (2)`, so the version mask that
    /// governs the layout can be sniffed from the tail; a blob is
    /// self-describing and the cache stores it verbatim.
    pub fn from_bytes(bytes: &[u8]) -> Result<NetlogonResponse> {
        if bytes.len() < 12 {
            return Err(WireError::TruncatedPayload);
        }

        let tail = bytes.len() - 8;
        let mask = (bytes[tail] as u32)
            | ((bytes[tail + 1] as u32) << 8)
            | ((bytes[tail + 2] as u32) << 16)
            | ((bytes[tail + 3] as u32) << 24);

        let mut buffer = VectorPacketBuffer::from_bytes(bytes);
        NetlogonResponse::read(&mut buffer, mask)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::new();
        self.write(&mut buffer)?;
        Ok(buffer.buffer)
    }

    /// The NT-version mask whose optional-field layout this response was
    /// serialized with.
    pub fn version_mask(&self) -> u32 {
        match self {
            NetlogonResponse::Nt40(_) => ntver::V1,
            NetlogonResponse::Nt5(_) => ntver::V1 | ntver::V5,
            NetlogonResponse::Nt5Ex(r) => r.nt_version(),
        }
    }

    /// Project any response generation onto the common field set.
    pub fn info(&self) -> NetlogonInfo {
        match self {
            NetlogonResponse::Nt40(r) => NetlogonInfo {
                server_flags: ServerFlags(0),
                domain_guid: None,
                dns_forest_name: None,
                dns_domain_name: None,
                dns_host_name: None,
                netbios_domain_name: non_empty(&r.domain_name),
                netbios_host_name: non_empty(strip_unc(&r.logon_server)),
                dc_site_name: None,
                client_site_name: None,
                dc_ip: None,
            },
            NetlogonResponse::Nt5(r) => NetlogonInfo {
                server_flags: r.server_flags,
                domain_guid: guid_or_none(r.domain_guid),
                dns_forest_name: non_empty(&r.dns_forest_name),
                dns_domain_name: non_empty(&r.dns_domain_name),
                dns_host_name: non_empty(&r.dns_host_name),
                netbios_domain_name: non_empty(&r.domain_name),
                netbios_host_name: non_empty(strip_unc(&r.logon_server)),
                dc_site_name: None,
                client_site_name: None,
                dc_ip: Some(r.dc_ip),
            },
            NetlogonResponse::Nt5Ex(r) => NetlogonInfo {
                server_flags: r.server_flags,
                domain_guid: guid_or_none(r.domain_guid),
                dns_forest_name: non_empty(&r.dns_forest_name),
                dns_domain_name: non_empty(&r.dns_domain_name),
                dns_host_name: non_empty(&r.dns_host_name),
                netbios_domain_name: non_empty(&r.netbios_domain_name),
                netbios_host_name: non_empty(&r.netbios_host_name),
                dc_site_name: non_empty(&r.dc_site_name),
                client_site_name: non_empty(&r.client_site_name),
                dc_ip: r.dc_ip,
            },
        }
    }
}

/// Common projection of the three response generations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetlogonInfo {
    pub server_flags: ServerFlags,
    pub domain_guid: Option<Uuid>,
    pub dns_forest_name: Option<String>,
    pub dns_domain_name: Option<String>,
    pub dns_host_name: Option<String>,
    pub netbios_domain_name: Option<String>,
    pub netbios_host_name: Option<String>,
    pub dc_site_name: Option<String>,
    pub client_site_name: Option<String>,
    pub dc_ip: Option<Ipv4Addr>,
}

fn read_guid<T: PacketBuffer>(buffer: &mut T) -> Result<Uuid> {
    let bytes = buffer.read_bytes(16)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&bytes);
    Ok(Uuid::from_bytes_le(raw))
}

fn write_guid<T: PacketBuffer>(buffer: &mut T, guid: &Uuid) -> Result<()> {
    buffer.write_bytes(&guid.to_bytes_le())?;
    Ok(())
}

fn guid_or_none(guid: Uuid) -> Option<Uuid> {
    if guid.is_nil() {
        None
    } else {
        Some(guid)
    }
}

fn strip_unc(name: &str) -> &str {
    name.trim_start_matches('\\')
}

fn non_empty(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn sample_ex() -> SamLogonResponseNt5Ex {
        SamLogonResponseNt5Ex {
            opcode: opcode::LOGON_SAM_LOGON_RESPONSE_EX,
            server_flags: ServerFlags(
                ServerFlags::PDC | ServerFlags::LDAP | ServerFlags::DS | ServerFlags::KDC,
            ),
            domain_guid: Uuid::parse_str("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap(),
            dns_forest_name: "example.com".to_string(),
            dns_domain_name: "example.com".to_string(),
            dns_host_name: "dc01.example.com".to_string(),
            netbios_domain_name: "EXAMPLE".to_string(),
            netbios_host_name: "DC01".to_string(),
            user_name: "".to_string(),
            dc_site_name: "Default-First-Site-Name".to_string(),
            client_site_name: "Default-First-Site-Name".to_string(),
            dc_ip: None,
            next_closest_site_name: None,
        }
    }

    #[test]
    fn test_nt40_roundtrip() {
        let response = NetlogonResponse::Nt40(SamLogonResponseNt40 {
            opcode: opcode::LOGON_SAM_LOGON_RESPONSE,
            logon_server: "\\\\DC01".to_string(),
            user_name: "".to_string(),
            domain_name: "EXAMPLE".to_string(),
        });

        let bytes = response.to_bytes().unwrap();
        let parsed = NetlogonResponse::from_bytes(&bytes).unwrap();
        assert_eq!(response, parsed);

        let info = parsed.info();
        assert_eq!(Some("DC01".to_string()), info.netbios_host_name);
        assert_eq!(Some("EXAMPLE".to_string()), info.netbios_domain_name);
        assert!(info.server_flags.is_empty());
        assert_eq!(None, info.dc_site_name);
    }

    #[test]
    fn test_nt5_roundtrip() {
        let response = NetlogonResponse::Nt5(SamLogonResponseNt5 {
            opcode: opcode::LOGON_SAM_LOGON_RESPONSE,
            logon_server: "\\\\DC01".to_string(),
            user_name: "".to_string(),
            domain_name: "EXAMPLE".to_string(),
            domain_guid: Uuid::parse_str("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap(),
            dns_forest_name: "example.com".to_string(),
            dns_domain_name: "example.com".to_string(),
            dns_host_name: "dc01.example.com".to_string(),
            dc_ip: "192.0.2.10".parse().unwrap(),
            server_flags: ServerFlags(ServerFlags::LDAP | ServerFlags::DS),
        });

        let bytes = response.to_bytes().unwrap();
        let parsed = NetlogonResponse::from_bytes(&bytes).unwrap();
        assert_eq!(response, parsed);

        let info = parsed.info();
        assert_eq!(Some("dc01.example.com".to_string()), info.dns_host_name);
        assert_eq!(Some("192.0.2.10".parse::<Ipv4Addr>().unwrap()), info.dc_ip);
    }

    #[test]
    fn test_nt5ex_roundtrip() {
        let response = NetlogonResponse::Nt5Ex(sample_ex());
        let bytes = response.to_bytes().unwrap();
        let parsed = NetlogonResponse::from_bytes(&bytes).unwrap();
        assert_eq!(response, parsed);

        let info = parsed.info();
        assert!(info.server_flags.contains(ServerFlags::PDC));
        assert_eq!(Some("Default-First-Site-Name".to_string()), info.dc_site_name);
        assert_eq!(Some("EXAMPLE".to_string()), info.netbios_domain_name);
    }

    #[test]
    fn test_nt5ex_optional_fields() {
        let mut ex = sample_ex();
        ex.dc_ip = Some("192.0.2.10".parse().unwrap());
        ex.next_closest_site_name = Some("Branch-Site".to_string());
        let response = NetlogonResponse::Nt5Ex(ex);

        let bytes = response.to_bytes().unwrap();

        // The trailing version mask advertises both optional fields, so a
        // blob round-trips without out-of-band context
        let parsed = NetlogonResponse::from_bytes(&bytes).unwrap();
        assert_eq!(response, parsed);
        assert_eq!(
            ntver::V1 | ntver::V5EX | ntver::V5EX_WITH_IP | ntver::WITH_CLOSEST_SITE,
            parsed.version_mask()
        );
    }

    #[test]
    fn test_request_roundtrip() {
        let request = SamLogonRequest {
            computer_name: "WKSTN01".to_string(),
            user_name: "".to_string(),
            mailslot_name: "\\MAILSLOT\\NET\\GETDC01ab".to_string(),
            account_control: 0,
            nt_version: ntver::V1,
        };

        let bytes = request.to_bytes().unwrap();
        let mut buffer = VectorPacketBuffer::from_bytes(&bytes);
        let parsed = SamLogonRequest::read(&mut buffer).unwrap();
        assert_eq!(request, parsed);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut bytes = vec![0x63u8, 0x00];
        bytes.extend_from_slice(&[0u8; 10]);
        assert!(NetlogonResponse::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let response = NetlogonResponse::Nt5Ex(sample_ex());
        let bytes = response.to_bytes().unwrap();
        assert!(NetlogonResponse::from_bytes(&bytes[..8]).is_err());
    }
}
