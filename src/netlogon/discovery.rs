//! candidate discovery: DNS SRV lookups and NetBIOS name queries
//!
//! Turns a domain name plus requirement flags into an ordered, deduplicated
//! list of candidate endpoints. The DNS path picks one SRV record shape per
//! requirement (PDC, GC, KDC, generic, GUID-scoped), site-scoped first with
//! a site-less retry; the NetBIOS path asks the broker for the logon-server
//! or primary-DC name. Answer order is preserved - the probe loop depends
//! on it.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use derive_more::{Display, Error, From};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;
use uuid::Uuid;

use crate::netlogon::flags::DiscoveryFlags;
use crate::netlogon::netbios::{NetbiosBroker, NetbiosError, NB_LOGON_SERVERS, NB_PDC};

#[derive(Debug, Display, From, Error)]
pub enum DiscoveryError {
    Netbios(NetbiosError),
    Resolver(hickory_resolver::error::ResolveError),
    NoCandidates,
}

type Result<T> = std::result::Result<T, DiscoveryError>;

pub const LDAP_PORT: u16 = 389;
pub const GC_PORT: u16 = 3268;

/// Which SRV record shape to query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SrvKind {
    Pdc,
    Gc,
    Kdc,
    DirectoryServer,
    DirectoryServerByGuid(Uuid),
}

/// The `_msdcs` record name for a query. The PDC and GUID-scoped records
/// have no site-scoped form.
pub fn srv_record_name(kind: &SrvKind, realm: &str, site: Option<&str>) -> String {
    match (kind, site) {
        (SrvKind::Pdc, _) => format!("_ldap._tcp.pdc._msdcs.{}", realm),
        (SrvKind::Gc, Some(site)) => format!("_ldap._tcp.{}._sites.gc._msdcs.{}", site, realm),
        (SrvKind::Gc, None) => format!("_ldap._tcp.gc._msdcs.{}", realm),
        (SrvKind::Kdc, Some(site)) => {
            format!("_kerberos._tcp.{}._sites.dc._msdcs.{}", site, realm)
        }
        (SrvKind::Kdc, None) => format!("_kerberos._tcp.dc._msdcs.{}", realm),
        (SrvKind::DirectoryServer, Some(site)) => {
            format!("_ldap._tcp.{}._sites.dc._msdcs.{}", site, realm)
        }
        (SrvKind::DirectoryServer, None) => format!("_ldap._tcp.dc._msdcs.{}", realm),
        (SrvKind::DirectoryServerByGuid(guid), _) => {
            format!("_ldap._tcp.{}.domains._msdcs.{}", guid, realm)
        }
    }
}

/// One SRV answer with its resolved addresses.
#[derive(Clone, Debug)]
pub struct SrvEndpoint {
    pub host: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub addresses: Vec<IpAddr>,
}

/// The DNS collaborator seam.
pub trait SrvResolver: Send + Sync {
    fn query_srv(&self, kind: &SrvKind, realm: &str, site: Option<&str>)
        -> Result<Vec<SrvEndpoint>>;
}

/// SRV resolver backed by the system's DNS configuration.
pub struct DnsSrvResolver {
    resolver: Resolver,
}

impl DnsSrvResolver {
    pub fn new() -> std::io::Result<DnsSrvResolver> {
        let resolver = Resolver::from_system_conf()
            .or_else(|_| Resolver::new(ResolverConfig::default(), ResolverOpts::default()))?;
        Ok(DnsSrvResolver { resolver })
    }
}

impl SrvResolver for DnsSrvResolver {
    fn query_srv(
        &self,
        kind: &SrvKind,
        realm: &str,
        site: Option<&str>,
    ) -> Result<Vec<SrvEndpoint>> {
        let name = srv_record_name(kind, realm, site);

        let lookup = match self.resolver.srv_lookup(name.as_str()) {
            Ok(lookup) => lookup,
            Err(err) => {
                log::info!("SRV query {} returned nothing: {}", name, err);
                return Ok(Vec::new());
            }
        };

        let mut records = lookup.iter().cloned().collect::<Vec<_>>();
        // stable by priority, answer order within a priority
        records.sort_by_key(|r| r.priority());

        let mut endpoints = Vec::new();
        for record in records {
            let target = record.target().to_utf8();
            let host = target.trim_end_matches('.').to_string();

            let addresses = match self.resolver.lookup_ip(target.as_str()) {
                Ok(ips) => ips.iter().collect::<Vec<IpAddr>>(),
                Err(err) => {
                    log::info!("dropping unresolvable SRV target {}: {}", host, err);
                    continue;
                }
            };

            endpoints.push(SrvEndpoint {
                host,
                port: record.port(),
                priority: record.priority(),
                weight: record.weight(),
                addresses,
            });
        }

        Ok(endpoints)
    }
}

/// Where a candidate came from decides which probe protocol validates it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CandidateOrigin {
    Dns,
    Netbios,
}

/// One probeable endpoint. Ephemeral, consumed by the probe loop.
#[derive(Clone, Debug)]
pub struct DcCandidate {
    pub addr: IpAddr,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub origin: CandidateOrigin,
}

/// Produces the ordered candidate list for one discovery pass.
pub struct CandidateDiscovery {
    srv: Arc<dyn SrvResolver>,
    broker: Arc<dyn NetbiosBroker>,
    netbios_enabled: bool,
}

impl CandidateDiscovery {
    pub fn new(
        srv: Arc<dyn SrvResolver>,
        broker: Arc<dyn NetbiosBroker>,
        netbios_enabled: bool,
    ) -> CandidateDiscovery {
        CandidateDiscovery {
            srv,
            broker,
            netbios_enabled,
        }
    }

    /// DNS path: one SRV query shape selected by the requirements, resolved
    /// addresses deduplicated in answer order.
    pub fn dns_candidates(
        &self,
        domain: &str,
        domain_guid: Option<Uuid>,
        flags: DiscoveryFlags,
        site: Option<&str>,
    ) -> Result<Vec<DcCandidate>> {
        let kind = if flags.contains(DiscoveryFlags::PDC_REQUIRED) {
            SrvKind::Pdc
        } else if flags.contains(DiscoveryFlags::GC_REQUIRED) {
            SrvKind::Gc
        } else if flags.contains(DiscoveryFlags::KDC_REQUIRED) {
            SrvKind::Kdc
        } else if let Some(guid) = domain_guid {
            SrvKind::DirectoryServerByGuid(guid)
        } else {
            SrvKind::DirectoryServer
        };

        let mut endpoints = match self.srv.query_srv(&kind, domain, site) {
            Ok(endpoints) => endpoints,
            Err(err) if site.is_some() => {
                log::info!("site-scoped SRV query failed: {}", err);
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        if endpoints.is_empty() && site.is_some() {
            log::info!(
                "no site-scoped SRV answers for {}, retrying without site",
                domain
            );
            endpoints = self.srv.query_srv(&kind, domain, None)?;
        }

        let default_port = if kind == SrvKind::Gc {
            GC_PORT
        } else {
            LDAP_PORT
        };

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for endpoint in &endpoints {
            for addr in &endpoint.addresses {
                if !seen.insert(*addr) {
                    continue;
                }
                candidates.push(DcCandidate {
                    addr: *addr,
                    port: Some(if endpoint.port != 0 {
                        endpoint.port
                    } else {
                        default_port
                    }),
                    hostname: Some(endpoint.host.clone()),
                    origin: CandidateOrigin::Dns,
                });
            }
        }

        if candidates.is_empty() {
            return Err(DiscoveryError::NoCandidates);
        }
        Ok(candidates)
    }

    /// NetBIOS path: one name-service query for the logon-server group name
    /// (or the primary-DC name when a PDC is required).
    pub fn netbios_candidates(
        &self,
        domain: &str,
        flags: DiscoveryFlags,
    ) -> Result<Vec<DcCandidate>> {
        if !self.netbios_enabled {
            return Err(DiscoveryError::Netbios(NetbiosError::Disabled));
        }

        let nb_type = if flags.contains(DiscoveryFlags::PDC_REQUIRED) {
            NB_PDC
        } else {
            NB_LOGON_SERVERS
        };

        let addresses = self.broker.resolve_name(domain, nb_type)?;

        let mut seen = HashSet::new();
        let candidates = addresses
            .into_iter()
            .filter(|addr| seen.insert(*addr))
            .map(|addr| DcCandidate {
                addr,
                port: None,
                hostname: None,
                origin: CandidateOrigin::Netbios,
            })
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Err(DiscoveryError::NoCandidates);
        }
        Ok(candidates)
    }
}
