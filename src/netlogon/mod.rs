//! Domain Controller Location
//!
//! Given a domain name (plus optional site and domain-GUID hints and a
//! bitmask of requirements), find a live, suitable domain controller and
//! report its address, names, capabilities and site.
//!
//! # Module Structure
//!
//! * `buffer` - low-level packet buffer shared by the wire codecs
//! * `flags` - requirement and capability bitmasks
//! * `wire` - netlogon request/response payload formats
//! * `cldap` - connectionless-LDAP netlogon ping client
//! * `netbios` - NetBIOS broker seam and the GETDC mailslot client
//! * `discovery` - DNS SRV and NetBIOS candidate discovery
//! * `cache` - last-known-good discovery cache and site-name records
//! * `locator` - the orchestrator and its public entry point

/// Low-level buffer operations for the wire codecs
pub mod buffer;

/// Requirement and capability bitmasks
pub mod flags;

/// Netlogon payload formats (NT4/NT5/NT5-EX)
pub mod wire;

/// CLDAP netlogon ping client
pub mod cldap;

/// NetBIOS collaborators and the GETDC mailslot client
pub mod netbios;

/// Candidate discovery over DNS SRV and NetBIOS name queries
pub mod discovery;

/// Discovery cache and per-realm site-name records
pub mod cache;

/// The locator orchestrator
pub mod locator;
