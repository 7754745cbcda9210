//! The concurrent fan-out resolver: races one attempt per (name, server)
//! pair and keeps the first non-empty answer per name.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use fqdns_wire::UpstreamEndpoint;
use socket_factory::SocketFactory;
use tokio::sync::mpsc;
use tokio::time::Instant;

use fqdns_wire::RecordType;

use crate::attempt::{resolve_over_tcp, resolve_over_udp, resolve_raw_over_tcp, resolve_raw_over_udp, UdpAnswers};
use crate::strategy::Strategy;

/// Which transport a round of attempts should use. The forwarding server
/// always tries UDP first and falls back to TCP on an empty result
/// (`spec.md` §4.H); this resolver itself is transport-agnostic and just
/// does whichever it's told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Everything one spawned attempt task needs, bundled so it can be moved
/// into the task by value instead of borrowing from the caller's stack.
#[derive(Clone)]
struct ResolverQuery {
    name: String,
    server: UpstreamEndpoint,
    transport: Transport,
    attempt_timeout: Duration,
    strategy: Strategy,
    forged: Arc<HashSet<Ipv4Addr>>,
    factory: SocketFactory,
}

/// Races an `A` resolution for every name in `names` against every server
/// in `servers`, for up to `retry` rounds. Each round merges newly
/// answered names into the result and stops early once everything has an
/// answer, matching `spec.md` §4.G.
pub async fn resolve(
    names: &HashSet<String>,
    transport: Transport,
    servers: &[UpstreamEndpoint],
    timeout: Duration,
    strategy: Strategy,
    forged: Arc<HashSet<Ipv4Addr>>,
    factory: &SocketFactory,
    retry: usize,
) -> HashMap<String, UdpAnswers> {
    let mut remaining: HashSet<String> = names.clone();
    let mut answers = HashMap::new();

    for round in 0..retry.max(1) {
        if remaining.is_empty() {
            break;
        }

        let round_answers = resolve_once(
            &remaining,
            transport,
            servers,
            timeout,
            strategy,
            Arc::clone(&forged),
            factory,
        )
        .await;

        for (name, result) in round_answers {
            remaining.remove(&name);
            answers.insert(name, result);
        }

        if !remaining.is_empty() && round + 1 < retry.max(1) {
            tracing::warn!(remaining = remaining.len(), round, "did not finish resolving all names");
        }
    }

    answers
}

/// Same fan-out/retry shape as [`resolve`], for record types that don't go
/// through the anti-poisoning selector (in practice just `TXT`). Used only
/// by the `resolve` CLI subcommand — the forwarding server and `discover`
/// never need non-`A` answers.
pub async fn resolve_raw(
    names: &HashSet<String>,
    record_type: RecordType,
    transport: Transport,
    servers: &[UpstreamEndpoint],
    timeout: Duration,
    retry: usize,
    factory: &SocketFactory,
) -> HashMap<String, Vec<Vec<u8>>> {
    let mut remaining: HashSet<String> = names.clone();
    let mut answers = HashMap::new();

    for _ in 0..retry.max(1) {
        if remaining.is_empty() {
            break;
        }

        let round_answers = resolve_raw_once(&remaining, record_type, transport, servers, timeout, factory).await;

        for (name, result) in round_answers {
            remaining.remove(&name);
            answers.insert(name, result);
        }
    }

    answers
}

async fn resolve_raw_once(
    names: &HashSet<String>,
    record_type: RecordType,
    transport: Transport,
    servers: &[UpstreamEndpoint],
    timeout: Duration,
    factory: &SocketFactory,
) -> HashMap<String, Vec<Vec<u8>>> {
    let attempt_timeout = timeout.saturating_sub(Duration::from_millis(100));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::with_capacity(names.len() * servers.len());

    for name in names {
        for &server in servers {
            let name_owned = name.clone();
            let name_for_reply = name.clone();
            let factory = *factory;
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let answers = match transport {
                    Transport::Udp => resolve_raw_over_udp(&name_owned, record_type, server, attempt_timeout, &factory).await,
                    Transport::Tcp => resolve_raw_over_tcp(&name_owned, record_type, server, attempt_timeout, &factory).await,
                };
                if !answers.is_empty() {
                    let _ = tx.send((name_for_reply, answers));
                }
            }));
        }
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut results = HashMap::new();

    while results.len() < names.len() {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            received = rx.recv() => {
                match received {
                    Some((name, answers)) => {
                        results.entry(name).or_insert(answers);
                    }
                    None => break,
                }
            }
        }
    }

    for handle in handles {
        handle.abort();
    }

    results
}

async fn resolve_once(
    names: &HashSet<String>,
    transport: Transport,
    servers: &[UpstreamEndpoint],
    timeout: Duration,
    strategy: Strategy,
    forged: Arc<HashSet<Ipv4Addr>>,
    factory: &SocketFactory,
) -> HashMap<String, UdpAnswers> {
    // Open Question preserved verbatim: if `timeout <= 100ms` this
    // attempt deadline is already in the past. Callers must not pass a
    // timeout that small.
    let attempt_timeout = timeout.saturating_sub(Duration::from_millis(100));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::with_capacity(names.len() * servers.len());

    for name in names {
        for &server in servers {
            let query = ResolverQuery {
                name: name.clone(),
                server,
                transport,
                attempt_timeout,
                strategy,
                forged: Arc::clone(&forged),
                factory: *factory,
            };
            let tx = tx.clone();

            let name_for_reply = name.clone();
            handles.push(tokio::spawn(async move {
                let answers = run_attempt(query).await;
                if !answers.is_empty() {
                    // The receiver may already have stopped listening
                    // (deadline elapsed); that is not an error here.
                    let _ = tx.send((name_for_reply, answers));
                }
            }));
        }
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut results = HashMap::new();

    while results.len() < names.len() {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            received = rx.recv() => {
                match received {
                    Some((name, answers)) => {
                        results.entry(name).or_insert(answers);
                    }
                    None => break,
                }
            }
        }
    }

    for handle in handles {
        handle.abort();
    }

    results
}

async fn run_attempt(query: ResolverQuery) -> UdpAnswers {
    match query.transport {
        Transport::Udp => {
            resolve_over_udp(
                &query.name,
                query.server,
                query.attempt_timeout,
                query.strategy,
                &query.forged,
                &query.factory,
            )
            .await
        }
        Transport::Tcp => {
            UdpAnswers::Single(
                resolve_over_tcp(&query.name, query.server, query.attempt_timeout, &query.factory).await,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fqdns_wire::synthesize_response;
    use tokio::net::UdpSocket;

    async fn upstream_returning(ips: Vec<Ipv4Addr>) -> UpstreamEndpoint {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            if let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let response = synthesize_response(&buf[..n], &ips).unwrap();
                let _ = socket.send_to(&response, from).await;
            }
        });

        UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), addr.port())
    }

    #[tokio::test]
    async fn resolves_a_name_over_udp() {
        let server = upstream_returning(vec![Ipv4Addr::new(93, 184, 216, 34)]).await;
        let names: HashSet<String> = ["example.com".to_string()].into_iter().collect();
        let forged = Arc::new(crate::forged::BUILTIN.clone());
        let factory = SocketFactory::default();

        let answers = resolve(
            &names,
            Transport::Udp,
            &[server],
            Duration::from_millis(500),
            Strategy::PickRight,
            forged,
            &factory,
            1,
        )
        .await;

        assert_eq!(
            answers.get("example.com").cloned().map(UdpAnswers::into_flat),
            Some(vec![Ipv4Addr::new(93, 184, 216, 34)])
        );
    }

    #[tokio::test]
    async fn resolves_txt_records_over_udp() {
        use fqdns_wire::RecordType;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            if let Ok((n, from)) = socket.recv_from(&mut buf).await {
                // Nothing in fqdns-wire builds a TXT answer directly; an
                // NXDomain-shaped response with no answers exercises the
                // "nothing found" path, which is what this test checks.
                let response = synthesize_response(&buf[..n], &[]).unwrap();
                let _ = socket.send_to(&response, from).await;
            }
        });

        let server = UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), addr.port());
        let names: HashSet<String> = ["example.com".to_string()].into_iter().collect();

        let answers = resolve_raw(
            &names,
            RecordType::Txt,
            Transport::Udp,
            &[server],
            Duration::from_millis(300),
            1,
            &SocketFactory::default(),
        )
        .await;

        assert!(answers.get("example.com").is_none());
    }

    #[tokio::test]
    async fn names_with_no_usable_response_are_absent() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), socket.local_addr().unwrap().port());
        drop(socket); // nothing listens, every attempt times out

        let names: HashSet<String> = ["nonexistent.invalid".to_string()].into_iter().collect();
        let forged = Arc::new(crate::forged::BUILTIN.clone());
        let factory = SocketFactory::default();

        let answers = resolve(
            &names,
            Transport::Udp,
            &[server],
            Duration::from_millis(200),
            Strategy::PickRight,
            forged,
            &factory,
            1,
        )
        .await;

        assert!(answers.get("nonexistent.invalid").is_none());
    }
}
