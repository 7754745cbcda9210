//! The built-in set of IPv4 addresses historically observed as DNS
//! injection targets. A UDP response whose single answer is a member of
//! this set (unioned with any caller-supplied additions) is treated as
//! forged, not authentic.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use once_cell::sync::Lazy;

/// The compile-time constant part of the forged-answer set.
pub static BUILTIN: Lazy<HashSet<Ipv4Addr>> = Lazy::new(|| {
    [
        "4.36.66.178",
        "8.7.198.45",
        "37.61.54.158",
        "46.82.174.68",
        "59.24.3.173",
        "64.33.88.161",
        "64.33.99.47",
        "64.66.163.251",
        "65.104.202.252",
        "65.160.219.113",
        "66.45.252.237",
        "72.14.205.99",
        "72.14.205.104",
        "78.16.49.15",
        "93.46.8.89",
        "128.121.126.139",
        "159.106.121.75",
        "169.132.13.103",
        "192.67.198.6",
        "202.106.1.2",
        "202.181.7.85",
        "203.161.230.171",
        "203.98.7.65",
        "207.12.88.98",
        "208.56.31.43",
        "209.36.73.33",
        "209.145.54.50",
        "209.220.30.174",
        "211.94.66.147",
        "213.169.251.35",
        "216.221.188.182",
        "216.234.179.13",
        "243.185.187.39",
        // plus.google.com
        "74.125.127.102",
        "74.125.155.102",
        "74.125.39.113",
        "74.125.39.102",
        "209.85.229.138",
        // opendns
        "67.215.65.132",
    ]
    .into_iter()
    .map(|ip| ip.parse().expect("builtin forged IPs are valid literals"))
    .collect()
});

/// Unions the built-in set with a caller-supplied set of extra forged
/// addresses, e.g. ones passed on the `resolve` CLI with `--wrong-answer`.
pub fn union(extra: impl IntoIterator<Item = Ipv4Addr>) -> HashSet<Ipv4Addr> {
    let mut set = BUILTIN.clone();
    set.extend(extra);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_has_expected_size() {
        assert_eq!(BUILTIN.len(), 40);
    }

    #[test]
    fn builtin_contains_known_entries() {
        assert!(BUILTIN.contains(&Ipv4Addr::new(78, 16, 49, 15)));
        assert!(BUILTIN.contains(&Ipv4Addr::new(67, 215, 65, 132)));
    }

    #[test]
    fn union_adds_caller_supplied_addresses() {
        let extra = Ipv4Addr::new(1, 2, 3, 4);
        let set = union([extra]);

        assert!(set.contains(&extra));
        assert!(set.contains(&Ipv4Addr::new(78, 16, 49, 15)));
    }
}
