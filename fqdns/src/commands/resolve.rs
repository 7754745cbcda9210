//! The `resolve` subcommand: query a name against a chosen set of
//! upstreams and print the answers as JSON.

use std::collections::HashMap;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use fqdns_core::concurrent::{self, Transport};
use fqdns_wire::{RecordType, UpstreamEndpoint};

use crate::cli::{ResolveArgs, ServerType};

fn default_server() -> UpstreamEndpoint {
    UpstreamEndpoint::new(Ipv4Addr::new(8, 8, 8, 8), 53)
}

pub async fn run(args: ResolveArgs, factory: socket_factory::SocketFactory) -> serde_json::Value {
    let servers: Vec<UpstreamEndpoint> = if args.at.is_empty() { vec![default_server()] } else { args.at };
    let names: HashSet<String> = args.domain.into_iter().collect();
    let timeout = Duration::from_secs_f64(args.timeout);
    let transport = match args.server_type {
        ServerType::Udp => Transport::Udp,
        ServerType::Tcp => Transport::Tcp,
    };

    match args.record_type {
        RecordType::A => {
            let forged = Arc::new(fqdns_core::forged::union(args.wrong_answer));
            let answers = concurrent::resolve(
                &names,
                transport,
                &servers,
                timeout,
                args.strategy,
                forged,
                &factory,
                args.retry,
            )
            .await;

            let flattened: HashMap<String, Vec<Ipv4Addr>> = answers
                .into_iter()
                .map(|(name, answers)| (name, answers.into_flat()))
                .collect();

            serde_json::to_value(flattened).expect("a map of strings to IP addresses always serializes")
        }
        RecordType::Txt => {
            let answers = concurrent::resolve_raw(&names, RecordType::Txt, transport, &servers, timeout, args.retry, &factory).await;

            // Raw TXT rdata isn't valid UTF-8 in general; hex-encode it so
            // the JSON output stays representable either way.
            let hex_encoded: HashMap<String, Vec<String>> = answers
                .into_iter()
                .map(|(name, records)| (name, records.iter().map(hex::encode).collect()))
                .collect();

            serde_json::to_value(hex_encoded).expect("a map of strings to hex strings always serializes")
        }
    }
}
