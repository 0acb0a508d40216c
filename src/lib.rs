//! Domain-controller locator
//!
//! A client-side implementation of Active Directory's DC locator: DNS SRV
//! and NetBIOS candidate discovery, CLDAP "netlogon ping" probing, the
//! legacy GETDC mailslot exchange, a TTL'd last-known-good cache, and a
//! site-affinity loop that re-queries when the first answer is not
//! topologically optimal.
//!
//! # Architecture
//!
//! Everything lives under the `netlogon` module; the public entry point is
//! `netlogon::locator::DcLocator::discover_domain_controller`. External
//! collaborators (DNS SRV resolution, the NetBIOS name-service broker, the
//! cache backing store, the clock) are injected trait objects.

/// Domain controller location and the netlogon protocol family
pub mod netlogon;
