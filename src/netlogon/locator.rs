//! the locator: cache-first lookup, rediscovery, the candidate probe loop
//! and the site-affinity re-query
//!
//! `DcLocator` composes the other components behind one operation,
//! `discover_domain_controller`. Candidates are probed strictly in list
//! order, one at a time, and a candidate that failed is never retried.
//! Candidate-level failures stay here - callers only ever see one of the
//! four `LocatorError` kinds.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};
use serde_derive::Serialize;
use uuid::Uuid;

use crate::netlogon::cache::{Clock, DiscoveryCache, KvStore, MemoryKvStore, SiteNameCache, SystemClock};
use crate::netlogon::cldap::{self, CldapClient, NetlogonPing};
use crate::netlogon::discovery::{
    CandidateDiscovery, CandidateOrigin, DcCandidate, DiscoveryError, DnsSrvResolver, SrvResolver,
};
use crate::netlogon::flags::{satisfies_requirements, DiscoveryFlags, ServerFlags};
use crate::netlogon::netbios::{
    DisabledBroker, GetdcClient, MailslotExchange, NetbiosBroker, NetbiosError,
};
use crate::netlogon::wire::{NetlogonInfo, NetlogonResponse};

/// What callers of `discover_domain_controller` can see go wrong.
#[derive(Copy, Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum LocatorError {
    InvalidParameter,
    NotSupported,
    DomainControllerNotFound,
    InvalidNetworkResponse,
}

type Result<T> = std::result::Result<T, LocatorError>;

/// Candidate-level failures, consumed by the probe loop.
#[derive(Debug, Display, From, Error)]
enum ProbeError {
    Cldap(crate::netlogon::cldap::CldapError),
    Netbios(NetbiosError),
    Rejected,
    UnusableReply,
}

/// Locator tuning knobs.
///
/// `overall_timeout` bounds the whole discovery operation across every
/// candidate and pass; the reference behavior is unbounded, so the default
/// is `None` and setting it is a deliberate strengthening.
#[derive(Clone, Debug)]
pub struct LocatorConfig {
    /// Per-candidate probe timeout.
    pub probe_timeout: Duration,
    /// Deadline across the whole `discover_domain_controller` call.
    pub overall_timeout: Option<Duration>,
    /// NetBIOS discovery/probing paths are skipped entirely when disabled.
    pub netbios_enabled: bool,
    /// Our name, quoted in GETDC mailslot requests.
    pub computer_name: String,
}

impl Default for LocatorConfig {
    fn default() -> LocatorConfig {
        LocatorConfig {
            probe_timeout: Duration::from_secs(10),
            overall_timeout: None,
            netbios_enabled: true,
            computer_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

/// Collaborators and configuration shared by a locator instance. All the
/// seams are trait objects so tests and alternative stacks can inject their
/// own.
pub struct LocatorContext {
    pub srv: Arc<dyn SrvResolver>,
    pub pinger: Arc<dyn NetlogonPing>,
    pub broker: Arc<dyn NetbiosBroker>,
    pub exchange: Arc<MailslotExchange>,
    pub store: Arc<dyn KvStore>,
    pub clock: Arc<dyn Clock>,
    pub config: LocatorConfig,
}

impl LocatorContext {
    /// Production wiring: system DNS, a real CLDAP socket, an in-memory
    /// cache, and no NetBIOS broker (inject one to enable that path).
    pub fn new(config: LocatorConfig) -> std::io::Result<LocatorContext> {
        Ok(LocatorContext {
            srv: Arc::new(DnsSrvResolver::new()?),
            pinger: Arc::new(CldapClient::new()),
            broker: Arc::new(DisabledBroker),
            exchange: Arc::new(MailslotExchange::new()),
            store: Arc::new(MemoryKvStore::new()),
            clock: Arc::new(SystemClock),
            config,
        })
    }
}

/// How the returned DC is addressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DcAddressType {
    Inet,
    NetbiosOnly,
}

/// The resolved result: one live, suitable domain controller.
/// Immutable once built; the caller owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DcInfo {
    pub dc_name: String,
    pub dc_address: String,
    pub address_type: DcAddressType,
    pub domain_name: String,
    pub dns_forest_name: Option<String>,
    pub domain_guid: Option<Uuid>,
    pub flags: ServerFlags,
    pub dc_site_name: Option<String>,
    pub client_site_name: Option<String>,
}

pub struct DcLocator {
    context: Arc<LocatorContext>,
    discovery: CandidateDiscovery,
    cache: DiscoveryCache,
    sites: SiteNameCache,
    getdc: GetdcClient,
}

impl DcLocator {
    pub fn new(context: Arc<LocatorContext>) -> DcLocator {
        let discovery = CandidateDiscovery::new(
            context.srv.clone(),
            context.broker.clone(),
            context.config.netbios_enabled,
        );
        let cache = DiscoveryCache::new(context.store.clone(), context.clock.clone());
        let sites = SiteNameCache::new(context.store.clone());
        let getdc = GetdcClient::new(&context.config.computer_name);

        DcLocator {
            context,
            discovery,
            cache,
            sites,
            getdc,
        }
    }

    /// Find a live domain controller for `domain` that satisfies `flags`.
    ///
    /// When no site is given, the realm's recorded site affinity supplies a
    /// best-effort default; if that default leads nowhere the operation is
    /// retried exactly once with an explicit empty site, covering the case
    /// where a stale site hint excludes the only reachable DC.
    pub fn discover_domain_controller(
        &self,
        domain: &str,
        domain_guid: Option<Uuid>,
        site_name: Option<&str>,
        flags: DiscoveryFlags,
    ) -> Result<DcInfo> {
        if domain.trim().is_empty() || flags.conflicting() {
            return Err(LocatorError::InvalidParameter);
        }

        log::info!(
            "locating domain controller for {} (flags: 0x{:08x})",
            domain,
            flags.0
        );

        let deadline = self
            .context
            .config
            .overall_timeout
            .map(|timeout| Instant::now() + timeout);

        let mut used_default_site = false;
        let query_site = match site_name {
            Some(site) if !site.is_empty() => Some(site.to_string()),
            _ => {
                let site = self.sites.get(domain);
                used_default_site = site.is_some();
                site
            }
        };

        let result = self.locate(domain, domain_guid, query_site.as_deref(), flags, deadline);

        if used_default_site && matches!(result, Err(LocatorError::DomainControllerNotFound)) {
            log::info!(
                "no DC for {} in remembered site {:?}, retrying without a site",
                domain,
                query_site
            );
            return self.locate(domain, domain_guid, None, flags, deadline);
        }

        result
    }

    /// One full pass: cache, rediscovery, then at most one re-query scoped
    /// to the client's own site when the answer is not topologically
    /// optimal. Site affinity is an optimization - a non-closest DC is
    /// still a success.
    fn locate(
        &self,
        domain: &str,
        domain_guid: Option<Uuid>,
        site: Option<&str>,
        flags: DiscoveryFlags,
        deadline: Option<Instant>,
    ) -> Result<DcInfo> {
        if !flags.contains(DiscoveryFlags::FORCE_REDISCOVERY) {
            if let Some(info) = self.cached(domain, flags) {
                log::debug!("cache satisfied discovery for {}", domain);
                return Ok(info);
            }
            if flags.contains(DiscoveryFlags::BACKGROUND_ONLY) {
                return Err(LocatorError::DomainControllerNotFound);
            }
        }

        let first = self.rediscover(domain, domain_guid, site, flags, deadline)?;
        if is_closest_site(&first) {
            return Ok(first);
        }

        let own_site = match first.client_site_name.clone() {
            Some(site) => site,
            None => return Ok(first),
        };

        log::info!(
            "{} is not in our site, re-querying scoped to {}",
            first.dc_name,
            own_site
        );

        match self.rediscover(domain, domain_guid, Some(&own_site), flags, deadline) {
            Ok(second) => Ok(second),
            Err(err) => {
                log::info!(
                    "site-scoped re-query found nothing ({}), keeping first answer",
                    err
                );
                Ok(first)
            }
        }
    }

    /// Cache lookup with the same required-flag validation a live probe
    /// gets: a stale record that no longer satisfies this call's
    /// requirements counts as a miss.
    fn cached(&self, domain: &str, flags: DiscoveryFlags) -> Option<DcInfo> {
        let payload = self.cache.get(domain)?;

        let response = match NetlogonResponse::from_bytes(&payload) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("deleting corrupt cache entry for {}: {}", domain, err);
                self.cache.delete(domain);
                return None;
            }
        };

        let info = response.info();
        if !satisfies_requirements(info.server_flags, flags) {
            return None;
        }

        self.build_dc_info(None, &info, flags)
    }

    /// Run the applicable discovery paths in order - DNS first unless the
    /// flat-name hint pins NetBIOS - and probe each path's candidates until
    /// one satisfies the requirements.
    fn rediscover(
        &self,
        domain: &str,
        domain_guid: Option<Uuid>,
        site: Option<&str>,
        flags: DiscoveryFlags,
        deadline: Option<Instant>,
    ) -> Result<DcInfo> {
        let is_flat = flags.contains(DiscoveryFlags::IS_FLAT_NAME);
        let is_dns = flags.contains(DiscoveryFlags::IS_DNS_NAME);

        if !is_flat {
            match self.discovery.dns_candidates(domain, domain_guid, flags, site) {
                Ok(candidates) => {
                    if let Some(info) = self.probe_candidates(&candidates, domain, flags, deadline)?
                    {
                        return Ok(info);
                    }
                }
                Err(err) => {
                    log::info!("DNS discovery for {} found nothing: {}", domain, err)
                }
            }

            if is_dns {
                return Err(LocatorError::DomainControllerNotFound);
            }
        }

        match self.discovery.netbios_candidates(domain, flags) {
            Ok(candidates) => {
                match self.probe_candidates(&candidates, domain, flags, deadline)? {
                    Some(info) => Ok(info),
                    None => Err(LocatorError::DomainControllerNotFound),
                }
            }
            Err(DiscoveryError::Netbios(NetbiosError::Disabled)) if is_flat => {
                Err(LocatorError::NotSupported)
            }
            Err(err) => {
                log::info!("NetBIOS discovery for {} found nothing: {}", domain, err);
                Err(LocatorError::DomainControllerNotFound)
            }
        }
    }

    /// Strictly ordered probe loop: one candidate at a time, failures are
    /// logged and the next candidate tried, never retried.
    fn probe_candidates(
        &self,
        candidates: &[DcCandidate],
        domain: &str,
        flags: DiscoveryFlags,
        deadline: Option<Instant>,
    ) -> Result<Option<DcInfo>> {
        for candidate in candidates {
            let timeout = match self.attempt_timeout(deadline) {
                Some(timeout) => timeout,
                None => {
                    log::warn!("discovery deadline reached while probing {}", domain);
                    return Err(LocatorError::DomainControllerNotFound);
                }
            };

            match self.probe_one(candidate, domain, flags, timeout) {
                Ok(info) => return Ok(Some(info)),
                Err(err) => {
                    log::info!("candidate {} rejected: {}", candidate.addr, err);
                }
            }
        }

        Ok(None)
    }

    fn attempt_timeout(&self, deadline: Option<Instant>) -> Option<Duration> {
        let probe = self.context.config.probe_timeout;
        match deadline {
            None => Some(probe),
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                if remaining.is_zero() {
                    None
                } else {
                    Some(probe.min(remaining))
                }
            }
        }
    }

    fn probe_one(
        &self,
        candidate: &DcCandidate,
        domain: &str,
        flags: DiscoveryFlags,
        timeout: Duration,
    ) -> std::result::Result<DcInfo, ProbeError> {
        match candidate.origin {
            CandidateOrigin::Dns => {
                let nt_version = cldap::request_nt_version(flags);
                let response =
                    self.context
                        .pinger
                        .ping(candidate.addr, domain, nt_version, timeout)?;

                let info = response.info();
                if !satisfies_requirements(info.server_flags, flags) {
                    return Err(ProbeError::Rejected);
                }

                self.accept(candidate, response, flags)
            }
            CandidateOrigin::Netbios => {
                let reply = self.getdc.get_dc(
                    self.context.broker.as_ref(),
                    &self.context.exchange,
                    candidate.addr,
                    domain,
                    timeout,
                )?;

                self.accept(candidate, reply.response, flags)
            }
        }
    }

    /// Acceptance: stamp the probed address into the reply so the cached
    /// blob is self-contained, store it under both realm keys, refresh the
    /// site-affinity records, and build the caller's record.
    fn accept(
        &self,
        candidate: &DcCandidate,
        mut response: NetlogonResponse,
        flags: DiscoveryFlags,
    ) -> std::result::Result<DcInfo, ProbeError> {
        inject_address(&mut response, candidate.addr);
        let info = response.info();

        let dc_info = self
            .build_dc_info(Some(candidate.addr), &info, flags)
            .ok_or(ProbeError::UnusableReply)?;

        match response.to_bytes() {
            Ok(payload) => {
                if let Some(ref netbios) = info.netbios_domain_name {
                    self.cache.put(netbios, &payload);
                }
                if let Some(ref dns) = info.dns_domain_name {
                    self.cache.put(dns, &payload);
                }

                if let Some(ref client_site) = info.client_site_name {
                    if let Some(ref netbios) = info.netbios_domain_name {
                        self.sites.put(netbios, client_site);
                    }
                    if let Some(ref dns) = info.dns_domain_name {
                        self.sites.put(dns, client_site);
                    }
                }
            }
            Err(err) => log::warn!("not caching reply from {}: {}", candidate.addr, err),
        }

        Ok(dc_info)
    }

    fn build_dc_info(
        &self,
        probed: Option<IpAddr>,
        info: &NetlogonInfo,
        flags: DiscoveryFlags,
    ) -> Option<DcInfo> {
        let (dc_name, domain_name) = choose_names(info, flags)?;

        let (dc_address, address_type) = match probed.or_else(|| info.dc_ip.map(IpAddr::V4)) {
            Some(ip) => (ip.to_string(), DcAddressType::Inet),
            None => {
                let flat = info.netbios_host_name.clone()?;
                (format!("\\\\{}", flat), DcAddressType::NetbiosOnly)
            }
        };

        Some(DcInfo {
            dc_name,
            dc_address,
            address_type,
            domain_name,
            dns_forest_name: info.dns_forest_name.clone(),
            domain_guid: info.domain_guid,
            flags: info.server_flags,
            dc_site_name: info.dc_site_name.clone(),
            client_site_name: info.client_site_name.clone(),
        })
    }
}

/// Map the reply's name forms per the caller's return-name preference,
/// preferring DNS forms when both are present and the flag allows.
fn choose_names(info: &NetlogonInfo, flags: DiscoveryFlags) -> Option<(String, String)> {
    let dns = info
        .dns_host_name
        .clone()
        .zip(info.dns_domain_name.clone());
    let flat = info
        .netbios_host_name
        .clone()
        .zip(info.netbios_domain_name.clone());

    if flags.contains(DiscoveryFlags::RETURN_FLAT_NAME) {
        flat.or(dns)
    } else {
        dns.or(flat)
    }
}

/// A DC counts as closest when it says so, when we have no site affinity at
/// all, or when its site is exactly ours.
fn is_closest_site(info: &DcInfo) -> bool {
    if info.flags.contains(ServerFlags::CLOSEST) {
        return true;
    }

    let client = match &info.client_site_name {
        Some(client) => client,
        None => return true,
    };

    match &info.dc_site_name {
        Some(dc_site) => dc_site == client,
        None => false,
    }
}

fn inject_address(response: &mut NetlogonResponse, addr: IpAddr) {
    if let IpAddr::V4(v4) = addr {
        match response {
            NetlogonResponse::Nt5(r) => r.dc_ip = v4,
            NetlogonResponse::Nt5Ex(r) => r.dc_ip = Some(v4),
            NetlogonResponse::Nt40(_) => {}
        }
    }
}
