//! NetBIOS collaborators and the legacy GETDC mailslot client
//!
//! The crate does not own a NetBIOS stack: name queries and datagram
//! transmission go through a local name-resolution broker reached via the
//! `NetbiosBroker` capability, and mailslot replies come back through the
//! `MailslotExchange` rendezvous. The GETDC client only builds and parses
//! the mailslot payloads and drives one request/reply round per candidate.

use std::net::IpAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use derive_more::{Display, Error, From};
use rand::random;

use crate::netlogon::wire::{
    ntver, opcode, NetlogonResponse, SamLogonRequest, SamLogonResponseNt40,
};

#[derive(Debug, Display, From, Error)]
pub enum NetbiosError {
    Wire(crate::netlogon::wire::WireError),
    Io(std::io::Error),
    Disabled,
    TimeOut,
    DomainMismatch,
}

type Result<T> = std::result::Result<T, NetbiosError>;

/// NetBIOS suffix types used by DC discovery.
pub const NB_PDC: u8 = 0x1B;
pub const NB_LOGON_SERVERS: u8 = 0x1C;
pub const NB_SERVER: u8 = 0x20;

pub const MAILSLOT_NTLOGON: &str = "\\MAILSLOT\\NET\\NTLOGON";
pub const MAILSLOT_GETDC: &str = "\\MAILSLOT\\NET\\GETDC";

/// The broker capability. The production implementation talks to the local
/// name-resolution daemon; tests substitute stubs, and a pure-library
/// NetBIOS stack can slot in behind the same trait.
pub trait NetbiosBroker: Send + Sync {
    /// Name-service lookup: every address registered under `<name><nb_type>`.
    fn resolve_name(&self, name: &str, nb_type: u8) -> Result<Vec<IpAddr>>;

    /// Hand a mailslot datagram to the broker for transmission.
    /// Fire-and-forget: the reply, if any, arrives through the
    /// `MailslotExchange` under the same transaction id.
    fn send_mailslot(&self, target: IpAddr, slot: &str, payload: &[u8], dgm_id: u16)
        -> Result<()>;

    /// Direct node-status lookup against `target`: the server name owning
    /// one of `nb_types`, if the node answers at all.
    fn query_name_status(&self, target: IpAddr, nb_types: &[u8]) -> Result<Option<String>>;
}

/// Stand-in used when NetBIOS is administratively disabled or the broker
/// cannot be reached; every operation fails fast.
pub struct DisabledBroker;

impl NetbiosBroker for DisabledBroker {
    fn resolve_name(&self, _name: &str, _nb_type: u8) -> Result<Vec<IpAddr>> {
        Err(NetbiosError::Disabled)
    }

    fn send_mailslot(
        &self,
        _target: IpAddr,
        _slot: &str,
        _payload: &[u8],
        _dgm_id: u16,
    ) -> Result<()> {
        Err(NetbiosError::Disabled)
    }

    fn query_name_status(&self, _target: IpAddr, _nb_types: &[u8]) -> Result<Option<String>> {
        Err(NetbiosError::Disabled)
    }
}

struct PendingReply {
    dgm_id: u16,
    tx: Sender<Vec<u8>>,
}

/// Rendezvous between a suspended GETDC exchange and the broker's
/// asynchronous reply delivery, keyed by the 15-bit transaction id.
#[derive(Default)]
pub struct MailslotExchange {
    pending: Mutex<Vec<PendingReply>>,
}

impl MailslotExchange {
    pub fn new() -> MailslotExchange {
        MailslotExchange {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Register interest in replies carrying `dgm_id`.
    pub fn register(&self, dgm_id: u16) -> Receiver<Vec<u8>> {
        let (tx, rx) = channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(PendingReply { dgm_id, tx });
        }
        rx
    }

    /// Deliver a reply payload from the broker. Unmatched ids are dropped;
    /// stale replies for abandoned exchanges are expected after timeouts.
    pub fn deliver(&self, dgm_id: u16, payload: Vec<u8>) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(idx) = pending.iter().position(|p| p.dgm_id == dgm_id) {
                let entry = pending.remove(idx);
                let _ = entry.tx.send(payload);
                return;
            }
        }
        log::info!("discarding mailslot reply with unknown id 0x{:04x}", dgm_id);
    }

    /// Drop a registration whose exchange timed out.
    pub fn forget(&self, dgm_id: u16) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|p| p.dgm_id != dgm_id);
        }
    }
}

/// A DC located over the mailslot path. Legacy replies carry no capability
/// flags, only names.
#[derive(Clone, Debug)]
pub struct GetdcReply {
    pub dc_name: String,
    pub domain_name: String,
    pub response: NetlogonResponse,
}

/// The GETDC exchange client.
pub struct GetdcClient {
    computer_name: String,
}

impl GetdcClient {
    pub fn new(computer_name: &str) -> GetdcClient {
        GetdcClient {
            computer_name: computer_name.to_string(),
        }
    }

    /// Run one GETDC round against `target`: send the request through the
    /// broker, wait for the mailslot reply, and fall back to a direct
    /// name-status lookup when no reply arrives in time.
    pub fn get_dc(
        &self,
        broker: &dyn NetbiosBroker,
        exchange: &MailslotExchange,
        target: IpAddr,
        domain: &str,
        timeout: Duration,
    ) -> Result<GetdcReply> {
        let dgm_id = random::<u16>() & 0x7FFF;
        let reply_slot = format!("{}{:04x}", MAILSLOT_GETDC, dgm_id);

        let request = SamLogonRequest {
            computer_name: self.computer_name.clone(),
            user_name: String::new(),
            mailslot_name: reply_slot,
            account_control: 0,
            nt_version: ntver::V1,
        };
        let payload = request.to_bytes()?;

        let rx = exchange.register(dgm_id);
        if let Err(err) = broker.send_mailslot(target, MAILSLOT_NTLOGON, &payload, dgm_id) {
            exchange.forget(dgm_id);
            return Err(err);
        }

        match rx.recv_timeout(timeout) {
            Ok(bytes) => self.accept_reply(&bytes, domain),
            Err(_) => {
                exchange.forget(dgm_id);
                log::info!("no GETDC mailslot reply from {}, trying name status", target);

                match broker.query_name_status(target, &[NB_SERVER])? {
                    Some(server) => Ok(synthesize_reply(&server, domain)),
                    None => Err(NetbiosError::TimeOut),
                }
            }
        }
    }

    fn accept_reply(&self, bytes: &[u8], domain: &str) -> Result<GetdcReply> {
        let response = NetlogonResponse::from_bytes(bytes)?;
        let info = response.info();

        let domain_name = info.netbios_domain_name.unwrap_or_default();
        if !domain_name.eq_ignore_ascii_case(domain) {
            log::warn!(
                "GETDC reply names domain {:?}, requested {:?} - rejecting",
                domain_name,
                domain
            );
            return Err(NetbiosError::DomainMismatch);
        }

        let dc_name = info.netbios_host_name.unwrap_or_default();

        Ok(GetdcReply {
            dc_name,
            domain_name,
            response,
        })
    }
}

/// A name-status answer proves the host is up and serving the domain, but
/// carries nothing else; synthesize the minimal legacy record for it.
fn synthesize_reply(server: &str, domain: &str) -> GetdcReply {
    let domain_name = domain.to_uppercase();
    let response = NetlogonResponse::Nt40(SamLogonResponseNt40 {
        opcode: opcode::LOGON_SAM_LOGON_RESPONSE,
        logon_server: format!("\\\\{}", server),
        user_name: String::new(),
        domain_name: domain_name.clone(),
    });

    GetdcReply {
        dc_name: server.to_string(),
        domain_name,
        response,
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;
    use crate::netlogon::buffer::VectorPacketBuffer;
    use std::sync::Arc;

    /// Broker stub that records sends and can deliver a canned reply
    /// synchronously, or answer name-status lookups.
    pub struct StubBroker {
        pub exchange: Arc<MailslotExchange>,
        pub reply: Mutex<Option<Vec<u8>>>,
        pub name_status: Option<String>,
        pub sent: Mutex<Vec<(IpAddr, String, Vec<u8>, u16)>>,
    }

    impl StubBroker {
        pub fn new(exchange: Arc<MailslotExchange>) -> StubBroker {
            StubBroker {
                exchange,
                reply: Mutex::new(None),
                name_status: None,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl NetbiosBroker for StubBroker {
        fn resolve_name(&self, _name: &str, _nb_type: u8) -> Result<Vec<IpAddr>> {
            Ok(vec!["192.0.2.30".parse().unwrap()])
        }

        fn send_mailslot(
            &self,
            target: IpAddr,
            slot: &str,
            payload: &[u8],
            dgm_id: u16,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((target, slot.to_string(), payload.to_vec(), dgm_id));

            if let Some(reply) = self.reply.lock().unwrap().take() {
                self.exchange.deliver(dgm_id, reply);
            }
            Ok(())
        }

        fn query_name_status(&self, _target: IpAddr, _nb_types: &[u8]) -> Result<Option<String>> {
            Ok(self.name_status.clone())
        }
    }

    fn nt40_reply(domain: &str, server: &str) -> Vec<u8> {
        NetlogonResponse::Nt40(SamLogonResponseNt40 {
            opcode: opcode::LOGON_SAM_LOGON_RESPONSE,
            logon_server: format!("\\\\{}", server),
            user_name: String::new(),
            domain_name: domain.to_string(),
        })
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn test_getdc_roundtrip() {
        let exchange = Arc::new(MailslotExchange::new());
        let broker = StubBroker::new(exchange.clone());
        *broker.reply.lock().unwrap() = Some(nt40_reply("EXAMPLE", "DC01"));

        let client = GetdcClient::new("WKSTN01");
        let reply = client
            .get_dc(
                &broker,
                &exchange,
                "192.0.2.30".parse().unwrap(),
                "example",
                Duration::from_millis(100),
            )
            .unwrap();

        assert_eq!("DC01", reply.dc_name);
        assert_eq!("EXAMPLE", reply.domain_name);

        // Inspect the request that went out
        let sent = broker.sent.lock().unwrap();
        assert_eq!(1, sent.len());
        let (_, ref slot, ref payload, dgm_id) = sent[0];

        // transaction id fits in 15 bits and names the reply slot
        assert_eq!(0, dgm_id & 0x8000);
        assert_eq!(format!("{}{:04x}", MAILSLOT_GETDC, dgm_id), *slot);

        let mut buffer = VectorPacketBuffer::from_bytes(payload);
        let request = SamLogonRequest::read(&mut buffer).unwrap();
        assert_eq!("WKSTN01", request.computer_name);
        assert_eq!(*slot, request.mailslot_name);
        assert_eq!(ntver::V1, request.nt_version);
    }

    #[test]
    fn test_getdc_rejects_mismatched_domain() {
        let exchange = Arc::new(MailslotExchange::new());
        let broker = StubBroker::new(exchange.clone());
        *broker.reply.lock().unwrap() = Some(nt40_reply("OTHERDOM", "DC01"));

        let client = GetdcClient::new("WKSTN01");
        let err = client
            .get_dc(
                &broker,
                &exchange,
                "192.0.2.30".parse().unwrap(),
                "EXAMPLE",
                Duration::from_millis(100),
            )
            .unwrap_err();

        assert!(matches!(err, NetbiosError::DomainMismatch));
    }

    #[test]
    fn test_getdc_name_status_fallback() {
        let exchange = Arc::new(MailslotExchange::new());
        let mut broker = StubBroker::new(exchange.clone());
        broker.name_status = Some("DC02".to_string());

        let client = GetdcClient::new("WKSTN01");
        let reply = client
            .get_dc(
                &broker,
                &exchange,
                "192.0.2.30".parse().unwrap(),
                "example",
                Duration::from_millis(10),
            )
            .unwrap();

        assert_eq!("DC02", reply.dc_name);
        assert_eq!("EXAMPLE", reply.domain_name);
        assert!(reply.response.info().server_flags.is_empty());
    }

    #[test]
    fn test_getdc_timeout_without_fallback() {
        let exchange = Arc::new(MailslotExchange::new());
        let broker = StubBroker::new(exchange.clone());

        let client = GetdcClient::new("WKSTN01");
        let err = client
            .get_dc(
                &broker,
                &exchange,
                "192.0.2.30".parse().unwrap(),
                "EXAMPLE",
                Duration::from_millis(10),
            )
            .unwrap_err();

        assert!(matches!(err, NetbiosError::TimeOut));
    }

    #[test]
    fn test_exchange_drops_unknown_id() {
        let exchange = MailslotExchange::new();
        let rx = exchange.register(0x17);

        exchange.deliver(0x18, vec![1, 2, 3]);
        assert!(rx.try_recv().is_err());

        exchange.deliver(0x17, vec![4, 5, 6]);
        assert_eq!(vec![4, 5, 6], rx.try_recv().unwrap());
    }

    #[test]
    fn test_disabled_broker_fails_fast() {
        let broker = DisabledBroker;
        assert!(matches!(
            broker.resolve_name("EXAMPLE", NB_LOGON_SERVERS),
            Err(NetbiosError::Disabled)
        ));
    }
}
