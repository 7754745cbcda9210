//! The `serve` subcommand: run the forwarding DNS server until killed.

use std::net::Ipv4Addr;
use std::time::Duration;

use fqdns_server::{Server, ServerConfig};
use fqdns_wire::UpstreamEndpoint;

use crate::cli::ServeArgs;

fn default_upstreams() -> Vec<UpstreamEndpoint> {
    vec![
        UpstreamEndpoint::new(Ipv4Addr::new(8, 8, 8, 8), 53),
        UpstreamEndpoint::new(Ipv4Addr::new(208, 67, 222, 222), 5353),
    ]
}

fn default_china_upstreams() -> Vec<UpstreamEndpoint> {
    vec![
        UpstreamEndpoint::new(Ipv4Addr::new(114, 114, 114, 114), 53),
        UpstreamEndpoint::new(Ipv4Addr::new(114, 114, 115, 115), 53),
    ]
}

pub async fn run(args: ServeArgs, factory: socket_factory::SocketFactory) -> anyhow::Result<()> {
    let china_upstreams = if args.enable_china_domain {
        if args.china_upstream.is_empty() { default_china_upstreams() } else { args.china_upstream }
    } else {
        Vec::new()
    };

    let hosted_domains = if args.enable_hosted_domain {
        if args.hosted_domain.is_empty() {
            fqdns_core::hosted::DEFAULT_HOSTED_DOMAINS.iter().map(|s| s.to_string()).collect()
        } else {
            args.hosted_domain.into_iter().collect()
        }
    } else {
        Default::default()
    };

    let config = ServerConfig {
        listen: args.listen,
        upstreams: if args.upstream.is_empty() { default_upstreams() } else { args.upstream },
        china_upstreams,
        hosted_domains,
        hosted_at: args.hosted_at,
        direct: args.direct,
        enable_china_domain: args.enable_china_domain,
        enable_hosted_domain: args.enable_hosted_domain,
        fallback_timeout: Duration::from_secs_f64(args.fallback_timeout),
        strategy: args.strategy,
    };

    tracing::info!(listen = %config.listen, "Starting fqdns forwarding server");

    let server = Server::bind(config, factory).await?;
    server.run().await?;

    Ok(())
}
