use std::env;
use std::sync::Arc;
use std::time::Duration;

use getopts::Options;
use uuid::Uuid;

use dclocator::netlogon::flags::DiscoveryFlags;
use dclocator::netlogon::locator::{DcInfo, DcLocator, LocatorConfig, LocatorContext};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options] DOMAIN", program);
    print!("{}", opts.usage(&brief));
}

fn print_info(info: &DcInfo) {
    println!("Domain controller: {}", info.dc_name);
    println!("Address:           {} ({:?})", info.dc_address, info.address_type);
    println!("Domain:            {}", info.domain_name);
    if let Some(ref forest) = info.dns_forest_name {
        println!("Forest:            {}", forest);
    }
    if let Some(ref guid) = info.domain_guid {
        println!("Domain GUID:       {}", guid);
    }
    println!("Server flags:      0x{:08x}", info.flags.0);
    if let Some(ref site) = info.dc_site_name {
        println!("DC site:           {}", site);
    }
    if let Some(ref site) = info.client_site_name {
        println!("Client site:       {}", site);
    }
}

/// Main entry point for the dclocate CLI
fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("s", "site", "Prefer DCs in this site", "SITE");
    opts.optopt("g", "guid", "Locate the domain by its GUID", "GUID");
    opts.optflag("", "pdc", "Require the primary domain controller");
    opts.optflag("", "gc", "Require a global catalog server");
    opts.optflag("", "kdc", "Require a Kerberos KDC");
    opts.optflag("", "writable", "Require a writable DC");
    opts.optflag("", "force", "Skip the discovery cache");
    opts.optflag("", "background", "Cache-only lookup, no network activity");
    opts.optflag("", "flat", "Treat DOMAIN as a flat (NetBIOS) name");
    opts.optflag("", "dns", "Treat DOMAIN as a DNS name");
    opts.optflag(
        "",
        "try-next-closest-site",
        "Ask servers for the next closest site",
    );
    opts.optflag("", "return-flat", "Return flat names instead of DNS names");
    opts.optopt(
        "t",
        "timeout",
        "Overall discovery deadline in seconds",
        "SECS",
    );
    opts.optopt(
        "",
        "probe-timeout",
        "Per-candidate probe timeout in seconds (default 10)",
        "SECS",
    );
    opts.optflag("j", "json", "Print the result as JSON");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            std::process::exit(2);
        }
    };

    if opt_matches.opt_present("h") || opt_matches.free.is_empty() {
        print_usage(&program, opts);
        std::process::exit(if opt_matches.opt_present("h") { 0 } else { 2 });
    }

    let domain = opt_matches.free[0].clone();

    let domain_guid = match opt_matches.opt_str("g") {
        Some(raw) => match Uuid::parse_str(&raw) {
            Ok(guid) => Some(guid),
            Err(err) => {
                eprintln!("Invalid domain GUID {}: {}", raw, err);
                std::process::exit(2);
            }
        },
        None => None,
    };

    let mut bits = 0u32;
    if opt_matches.opt_present("pdc") {
        bits |= DiscoveryFlags::PDC_REQUIRED;
    }
    if opt_matches.opt_present("gc") {
        bits |= DiscoveryFlags::GC_REQUIRED;
    }
    if opt_matches.opt_present("kdc") {
        bits |= DiscoveryFlags::KDC_REQUIRED;
    }
    if opt_matches.opt_present("writable") {
        bits |= DiscoveryFlags::WRITABLE_REQUIRED;
    }
    if opt_matches.opt_present("force") {
        bits |= DiscoveryFlags::FORCE_REDISCOVERY;
    }
    if opt_matches.opt_present("background") {
        bits |= DiscoveryFlags::BACKGROUND_ONLY;
    }
    if opt_matches.opt_present("flat") {
        bits |= DiscoveryFlags::IS_FLAT_NAME;
    }
    if opt_matches.opt_present("dns") {
        bits |= DiscoveryFlags::IS_DNS_NAME;
    }
    if opt_matches.opt_present("try-next-closest-site") {
        bits |= DiscoveryFlags::TRY_NEXTCLOSEST_SITE;
    }
    if opt_matches.opt_present("return-flat") {
        bits |= DiscoveryFlags::RETURN_FLAT_NAME;
    } else {
        bits |= DiscoveryFlags::RETURN_DNS_NAME;
    }
    let flags = DiscoveryFlags(bits);

    let mut config = LocatorConfig::default();
    if let Some(secs) = opt_matches.opt_str("t").and_then(|x| x.parse::<u64>().ok()) {
        config.overall_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = opt_matches
        .opt_str("probe-timeout")
        .and_then(|x| x.parse::<u64>().ok())
    {
        config.probe_timeout = Duration::from_secs(secs);
    }

    let context = match LocatorContext::new(config) {
        Ok(context) => Arc::new(context),
        Err(err) => {
            eprintln!("Failed to initialize the locator: {}", err);
            std::process::exit(1);
        }
    };

    let locator = DcLocator::new(context);
    let site = opt_matches.opt_str("s");

    match locator.discover_domain_controller(&domain, domain_guid, site.as_deref(), flags) {
        Ok(info) => {
            if opt_matches.opt_present("j") {
                match serde_json::to_string_pretty(&info) {
                    Ok(json) => println!("{}", json),
                    Err(err) => {
                        eprintln!("Failed to serialize result: {}", err);
                        std::process::exit(1);
                    }
                }
            } else {
                print_info(&info);
            }
        }
        Err(err) => {
            eprintln!("Discovery failed for {}: {}", domain, err);
            std::process::exit(1);
        }
    }
}
