//! The `discover` subcommand: learn forged IPv4 answers for a set of
//! domains and print them as a JSON array.

use std::time::Duration;

use crate::cli::DiscoverArgs;

/// Domains probed when `--domain` is absent.
const DEFAULT_DOMAINS: &[&str] = &[
    "facebook.com",
    "youtube.com",
    "twitter.com",
    "plus.google.com",
    "drive.google.com",
];

pub async fn run(args: DiscoverArgs, factory: socket_factory::SocketFactory) -> serde_json::Value {
    let timeout = Duration::from_secs_f64(args.timeout);
    let domains: Vec<String> = if args.domain.is_empty() {
        DEFAULT_DOMAINS.iter().map(|s| s.to_string()).collect()
    } else {
        args.domain
    };

    let learned = fqdns_server::discover(&domains, args.at, timeout, args.repeat, args.only_new, &factory).await;

    let mut sorted: Vec<String> = learned.into_iter().map(|ip| ip.to_string()).collect();
    sorted.sort();

    serde_json::to_value(sorted).expect("a list of IP strings always serializes")
}
