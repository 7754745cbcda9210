//! The `fqdns` command-line surface: `resolve`, `discover`, and `serve`,
//! plus the outbound/logging flags shared by all three.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fqdns_core::Strategy;
use fqdns_wire::{RecordType, UpstreamEndpoint};

#[derive(Parser)]
#[command(name = "fqdns", about = "An anti-censorship DNS resolver and forwarder")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags every subcommand accepts, mirroring the original tool's
/// top-level argument parser rather than each subcommand's own.
#[derive(clap::Args)]
pub struct GlobalArgs {
    /// Outbound `SO_MARK` applied to every socket this process opens, e.g. `0xcafe`. Linux only.
    #[arg(long, value_parser = parse_mark)]
    pub outbound_mark: Option<u32>,

    /// Source address used for every outbound socket this process opens.
    #[arg(long)]
    pub outbound_ip: Option<Ipv4Addr>,

    /// Rotating log file path. Logs to stdout only when absent.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

fn parse_mark(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve one or more domains against a chosen set of upstreams.
    Resolve(ResolveArgs),
    /// Learn forged IPv4 answers for a set of domains.
    Discover(DiscoverArgs),
    /// Run the forwarding DNS server.
    Serve(ServeArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServerType {
    Udp,
    Tcp,
}

#[derive(clap::Args)]
pub struct ResolveArgs {
    /// One or more domain names to query.
    #[arg(required = true)]
    pub domain: Vec<String>,

    /// One or more upstream DNS servers. Defaults to `8.8.8.8:53` when absent.
    #[arg(long = "at")]
    pub at: Vec<UpstreamEndpoint>,

    #[arg(long, default_value = "pick-right")]
    pub strategy: Strategy,

    /// Additional IPv4 addresses to treat as forged, on top of the built-in set.
    #[arg(long = "wrong-answer")]
    pub wrong_answer: Vec<Ipv4Addr>,

    #[arg(long, default_value_t = 1.0)]
    pub timeout: f64,

    #[arg(long = "server-type", default_value = "udp")]
    pub server_type: ServerType,

    #[arg(long = "record-type", default_value = "A")]
    pub record_type: RecordType,

    #[arg(long, default_value_t = 1)]
    pub retry: usize,
}

#[derive(clap::Args)]
pub struct DiscoverArgs {
    #[arg(long = "at", default_value = "8.8.8.8:53")]
    pub at: UpstreamEndpoint,

    #[arg(long, default_value_t = 1.0)]
    pub timeout: f64,

    #[arg(long, default_value_t = 30)]
    pub repeat: usize,

    #[arg(long = "only-new")]
    pub only_new: bool,

    /// Domains suspected of being blocked, e.g. `twitter.com`.
    #[arg(long = "domain")]
    pub domain: Vec<String>,
}

#[derive(clap::Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "*:53")]
    pub listen: UpstreamEndpoint,

    /// Upstream resolvers for non-China domains. Defaults to Google + OpenDNS.
    #[arg(long = "upstream")]
    pub upstream: Vec<UpstreamEndpoint>,

    /// Upstream resolvers for China domains, used only with `--enable-china-domain`.
    #[arg(long = "china-upstream")]
    pub china_upstream: Vec<UpstreamEndpoint>,

    /// Domains to alias under `--hosted-at`, used only with `--enable-hosted-domain`.
    #[arg(long = "hosted-domain")]
    pub hosted_domain: Vec<String>,

    #[arg(long = "hosted-at", default_value = "fqrouter.com")]
    pub hosted_at: String,

    /// Relay every request to the first upstream verbatim, bypassing strategy selection.
    #[arg(long)]
    pub direct: bool,

    #[arg(long = "enable-china-domain")]
    pub enable_china_domain: bool,

    #[arg(long = "enable-hosted-domain")]
    pub enable_hosted_domain: bool,

    #[arg(long = "fallback-timeout", default_value_t = 1.0)]
    pub fallback_timeout: f64,

    #[arg(long, default_value = "pick-right")]
    pub strategy: Strategy,
}
