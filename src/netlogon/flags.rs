//! requirement and capability bitmasks for domain controller discovery
//!
//! `DiscoveryFlags` is what a caller asks for, `ServerFlags` is what a DC
//! reports about itself. Both follow the documented DS_* bit layouts so the
//! masks can travel on the wire unchanged.

use serde_derive::{Deserialize, Serialize};

/// Caller requirements and behavior modifiers for a discovery call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFlags(pub u32);

impl DiscoveryFlags {
    pub const FORCE_REDISCOVERY: u32 = 0x0000_0001;
    pub const DS_REQUIRED: u32 = 0x0000_0010;
    pub const DS_PREFERRED: u32 = 0x0000_0020;
    pub const GC_REQUIRED: u32 = 0x0000_0040;
    pub const PDC_REQUIRED: u32 = 0x0000_0080;
    pub const BACKGROUND_ONLY: u32 = 0x0000_0100;
    pub const IP_REQUIRED: u32 = 0x0000_0200;
    pub const KDC_REQUIRED: u32 = 0x0000_0400;
    pub const TIMESERV_REQUIRED: u32 = 0x0000_0800;
    pub const WRITABLE_REQUIRED: u32 = 0x0000_1000;
    pub const GOOD_TIMESERV_PREFERRED: u32 = 0x0000_2000;
    pub const ONLY_LDAP_NEEDED: u32 = 0x0000_8000;
    pub const IS_FLAT_NAME: u32 = 0x0001_0000;
    pub const IS_DNS_NAME: u32 = 0x0002_0000;
    pub const TRY_NEXTCLOSEST_SITE: u32 = 0x0004_0000;
    pub const RETURN_DNS_NAME: u32 = 0x4000_0000;
    pub const RETURN_FLAT_NAME: u32 = 0x8000_0000;

    pub fn new(bits: u32) -> DiscoveryFlags {
        DiscoveryFlags(bits)
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    /// The four requirement/behavior combinations that can never be
    /// satisfied. Callers presenting one of them are rejected before any
    /// collaborator is consulted.
    pub fn conflicting(self) -> bool {
        const PAIRS: [(u32, u32); 4] = [
            (DiscoveryFlags::GC_REQUIRED, DiscoveryFlags::PDC_REQUIRED),
            (DiscoveryFlags::RETURN_DNS_NAME, DiscoveryFlags::RETURN_FLAT_NAME),
            (DiscoveryFlags::IS_FLAT_NAME, DiscoveryFlags::IS_DNS_NAME),
            (DiscoveryFlags::BACKGROUND_ONLY, DiscoveryFlags::FORCE_REDISCOVERY),
        ];

        PAIRS
            .iter()
            .any(|&(a, b)| self.contains(a) && self.contains(b))
    }
}

/// Capability bits a domain controller reports in its netlogon responses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFlags(pub u32);

impl ServerFlags {
    pub const PDC: u32 = 0x0000_0001;
    pub const GC: u32 = 0x0000_0004;
    pub const LDAP: u32 = 0x0000_0008;
    pub const DS: u32 = 0x0000_0010;
    pub const KDC: u32 = 0x0000_0020;
    pub const TIMESERV: u32 = 0x0000_0040;
    pub const CLOSEST: u32 = 0x0000_0080;
    pub const WRITABLE: u32 = 0x0000_0100;
    pub const GOOD_TIMESERV: u32 = 0x0000_0200;
    pub const NDNC: u32 = 0x0000_0400;

    pub fn new(bits: u32) -> ServerFlags {
        ServerFlags(bits)
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Check a DC's reported capabilities against the caller's requirements.
///
/// A legacy reply without any capability bits (`ret_flags == 0`) is accepted
/// unconditionally; such servers predate the flags field entirely.
pub fn satisfies_requirements(ret_flags: ServerFlags, required: DiscoveryFlags) -> bool {
    if ret_flags.is_empty() {
        return true;
    }

    let checks = [
        (DiscoveryFlags::PDC_REQUIRED, ServerFlags::PDC),
        (DiscoveryFlags::GC_REQUIRED, ServerFlags::GC),
        (DiscoveryFlags::KDC_REQUIRED, ServerFlags::KDC),
        (DiscoveryFlags::DS_REQUIRED, ServerFlags::DS),
        (DiscoveryFlags::DS_PREFERRED, ServerFlags::DS),
        (DiscoveryFlags::TIMESERV_REQUIRED, ServerFlags::TIMESERV),
        (DiscoveryFlags::WRITABLE_REQUIRED, ServerFlags::WRITABLE),
        (DiscoveryFlags::ONLY_LDAP_NEEDED, ServerFlags::LDAP),
    ];

    for &(req_bit, srv_bit) in checks.iter() {
        if required.contains(req_bit) && !ret_flags.contains(srv_bit) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {

    use super::*;
    use proptest::prelude::*;

    const FORBIDDEN_PAIRS: [(u32, u32); 4] = [
        (DiscoveryFlags::GC_REQUIRED, DiscoveryFlags::PDC_REQUIRED),
        (DiscoveryFlags::RETURN_DNS_NAME, DiscoveryFlags::RETURN_FLAT_NAME),
        (DiscoveryFlags::IS_FLAT_NAME, DiscoveryFlags::IS_DNS_NAME),
        (DiscoveryFlags::BACKGROUND_ONLY, DiscoveryFlags::FORCE_REDISCOVERY),
    ];

    #[test]
    fn test_forbidden_pairs_conflict() {
        for &(a, b) in FORBIDDEN_PAIRS.iter() {
            assert!(DiscoveryFlags(a | b).conflicting());
            assert!(!DiscoveryFlags(a).conflicting());
            assert!(!DiscoveryFlags(b).conflicting());
        }
    }

    #[test]
    fn test_empty_flags_satisfy_nothing_required() {
        assert!(satisfies_requirements(
            ServerFlags(ServerFlags::LDAP | ServerFlags::DS),
            DiscoveryFlags(0)
        ));
    }

    #[test]
    fn test_legacy_reply_accepted_unconditionally() {
        assert!(satisfies_requirements(
            ServerFlags(0),
            DiscoveryFlags(DiscoveryFlags::PDC_REQUIRED | DiscoveryFlags::GC_REQUIRED)
        ));
    }

    #[test]
    fn test_missing_pdc_bit_rejected() {
        let ret = ServerFlags(ServerFlags::LDAP | ServerFlags::DS | ServerFlags::KDC);
        assert!(!satisfies_requirements(
            ret,
            DiscoveryFlags(DiscoveryFlags::PDC_REQUIRED)
        ));
        assert!(satisfies_requirements(
            ret,
            DiscoveryFlags(DiscoveryFlags::KDC_REQUIRED)
        ));
    }

    #[test]
    fn test_ds_preferred_checks_ds_bit() {
        assert!(!satisfies_requirements(
            ServerFlags(ServerFlags::LDAP),
            DiscoveryFlags(DiscoveryFlags::DS_PREFERRED)
        ));
    }

    proptest! {
        // Any mask avoiding the four forbidden pairs passes validation
        #[test]
        fn valid_combinations_never_conflict(bits in any::<u32>()) {
            let mut mask = bits;
            for &(a, b) in FORBIDDEN_PAIRS.iter() {
                if mask & a != 0 && mask & b != 0 {
                    mask &= !b;
                }
            }
            prop_assert!(!DiscoveryFlags(mask).conflicting());
        }
    }
}
