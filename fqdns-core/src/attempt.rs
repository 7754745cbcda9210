//! A single (name, server, transport) resolution attempt: send one query,
//! collect whatever comes back, select the usable answer.
//!
//! `A` queries run through the anti-poisoning selector (`select.rs`);
//! everything else (just `TXT`, in practice) is a single receive with no
//! selection logic, matching the original's type-specific branch in
//! `resolve_over_udp`/`resolve_over_tcp`.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use fqdns_wire::{RecordType, UpstreamEndpoint, MAX_UDP_RESPONSE_SIZE};
use socket_factory::SocketFactory;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use crate::select::{is_right_response, select_responses};
use crate::strategy::Strategy;

/// The attempt's connect timeout for TCP, fixed regardless of the caller's
/// overall timeout (`spec.md` §4.F).
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// The two shapes an `A` resolution over UDP can return, kept distinct
/// rather than flattened into one `Vec` so callers can't mistake one for
/// the other: a single qualifying response under most strategies, or one
/// list per accepted response under `pick-all`. This mirrors — and
/// narrows — the original's untyped "list or list-of-lists" return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpAnswers {
    Single(Vec<Ipv4Addr>),
    Multiple(Vec<Vec<Ipv4Addr>>),
}

impl UdpAnswers {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(answers) => answers.is_empty(),
            Self::Multiple(answers) => answers.is_empty(),
        }
    }

    /// Flattens either shape into one address list, preserving order.
    pub fn into_flat(self) -> Vec<Ipv4Addr> {
        match self {
            Self::Single(answers) => answers,
            Self::Multiple(answers) => answers.into_iter().flatten().collect(),
        }
    }

    /// One answer list per accepted response, preserving the boundary
    /// between responses that `into_flat` discards. `discover` needs this:
    /// it judges each response's A-list individually rather than the
    /// merged set of addresses.
    pub fn into_responses(self) -> Vec<Vec<Ipv4Addr>> {
        match self {
            Self::Single(answers) => vec![answers],
            Self::Multiple(answers) => answers,
        }
    }
}

/// Resolves `name`'s `A` records via UDP against `endpoint`. Any socket or
/// parse error is logged and folded into an empty result; this function
/// never returns `Err` to its caller, matching the "resolver never
/// raises" propagation policy (`spec.md` §7).
pub async fn resolve_over_udp(
    name: &str,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    strategy: Strategy,
    forged: &HashSet<Ipv4Addr>,
    factory: &SocketFactory,
) -> UdpAnswers {
    match resolve_over_udp_inner(name, endpoint, timeout, strategy, forged, factory).await {
        Ok(answers) => answers,
        Err(error) => {
            tracing::warn!(%error, %name, %endpoint, "UDP resolution attempt failed");
            UdpAnswers::Single(Vec::new())
        }
    }
}

async fn resolve_over_udp_inner(
    name: &str,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    strategy: Strategy,
    forged: &HashSet<Ipv4Addr>,
    factory: &SocketFactory,
) -> Result<UdpAnswers, crate::ResolveError> {
    let socket = factory.udp_socket()?;
    let (query, _id) = fqdns_wire::build_query(name, RecordType::A)?;
    socket.send_to(&query, endpoint.socket_addr()).await?;

    let deadline = Instant::now() + timeout;
    let responses = select_responses(&socket, deadline, strategy, forged).await;

    Ok(match responses.len() {
        0 => UdpAnswers::Single(Vec::new()),
        1 => UdpAnswers::Single(responses[0].a_answers()?),
        _ => {
            let mut per_response = Vec::with_capacity(responses.len());
            for response in &responses {
                per_response.push(response.a_answers()?);
            }
            UdpAnswers::Multiple(per_response)
        }
    })
}

/// Resolves `name`'s `A` records via TCP against `endpoint`. Filters the
/// response through [`is_right_response`] against the built-in forged
/// set, which in practice catches things like OpenDNS's NXDOMAIN landing
/// page rather than anything UDP-injected (TCP responses aren't subject
/// to the UDP poisoning this system otherwise defends against).
pub async fn resolve_over_tcp(
    name: &str,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    factory: &SocketFactory,
) -> Vec<Ipv4Addr> {
    match resolve_over_tcp_inner(name, endpoint, timeout, factory).await {
        Ok(answers) => answers,
        Err(error) => {
            tracing::warn!(%error, %name, %endpoint, "TCP resolution attempt failed");
            Vec::new()
        }
    }
}

async fn resolve_over_tcp_inner(
    name: &str,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    factory: &SocketFactory,
) -> Result<Vec<Ipv4Addr>, crate::ResolveError> {
    let message = tcp_round_trip(name, RecordType::A, endpoint, timeout, factory).await?;

    if !is_right_response(&message, &crate::forged::BUILTIN) {
        return Ok(Vec::new());
    }

    Ok(message.a_answers()?)
}

/// Resolves `name`'s raw rdata for any non-`A` record type (`TXT`, here)
/// via a single UDP receive, no selection logic — the anti-poisoning
/// selector only exists to choose among competing `A` answers.
pub async fn resolve_raw_over_udp(
    name: &str,
    record_type: RecordType,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    factory: &SocketFactory,
) -> Vec<Vec<u8>> {
    match resolve_raw_over_udp_inner(name, record_type, endpoint, timeout, factory).await {
        Ok(answers) => answers,
        Err(error) => {
            tracing::warn!(%error, %name, %endpoint, "UDP resolution attempt failed");
            Vec::new()
        }
    }
}

async fn resolve_raw_over_udp_inner(
    name: &str,
    record_type: RecordType,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    factory: &SocketFactory,
) -> Result<Vec<Vec<u8>>, crate::ResolveError> {
    let socket = factory.udp_socket()?;
    let (query, _id) = fqdns_wire::build_query(name, record_type)?;
    socket.send_to(&query, endpoint.socket_addr()).await?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_UDP_RESPONSE_SIZE];

    match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => Ok(fqdns_wire::Message::parse(&buf[..n])?.raw_answers()?),
        Ok(Err(error)) => Err(error.into()),
        Err(_) => Ok(Vec::new()),
    }
}

/// Resolves `name`'s raw rdata for any non-`A` record type via TCP.
pub async fn resolve_raw_over_tcp(
    name: &str,
    record_type: RecordType,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    factory: &SocketFactory,
) -> Vec<Vec<u8>> {
    match tcp_round_trip(name, record_type, endpoint, timeout, factory).await {
        Ok(message) => message.raw_answers().unwrap_or_default(),
        Err(error) => {
            tracing::warn!(%error, %name, %endpoint, "TCP resolution attempt failed");
            Vec::new()
        }
    }
}

async fn tcp_round_trip(
    name: &str,
    record_type: RecordType,
    endpoint: UpstreamEndpoint,
    timeout: Duration,
    factory: &SocketFactory,
) -> Result<fqdns_wire::Message, crate::ResolveError> {
    let socket = factory.tcp_socket()?;
    let mut stream = tokio::time::timeout(TCP_CONNECT_TIMEOUT, socket.connect(endpoint.socket_addr()))
        .await
        .map_err(|_| crate::ResolveError::Timeout)??;

    let (query, _id) = fqdns_wire::build_query(name, record_type)?;
    let framed = fqdns_wire::encode_tcp_frame(&query)?;

    tokio::time::timeout(timeout, stream.write_all(&framed))
        .await
        .map_err(|_| crate::ResolveError::Timeout)??;

    let mut len_buf = [0u8; 2];
    tokio::time::timeout(timeout, stream.read_exact(&mut len_buf))
        .await
        .map_err(|_| crate::ResolveError::Timeout)??;

    let mut body = vec![0u8; fqdns_wire::decode_tcp_length_prefix(len_buf)];
    tokio::time::timeout(timeout, stream.read_exact(&mut body))
        .await
        .map_err(|_| crate::ResolveError::Timeout)??;

    Ok(fqdns_wire::Message::parse(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket};

    #[tokio::test]
    async fn udp_attempt_returns_empty_on_timeout() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = UpstreamEndpoint::new(
            Ipv4Addr::new(127, 0, 0, 1),
            upstream.local_addr().unwrap().port(),
        );
        let factory = SocketFactory::default();

        let answers = resolve_over_udp(
            "example.com",
            endpoint,
            Duration::from_millis(100),
            Strategy::PickRight,
            &crate::forged::BUILTIN,
            &factory,
        )
        .await;

        assert!(answers.is_empty());
    }

    #[tokio::test]
    async fn tcp_attempt_returns_empty_when_nothing_is_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), addr.port());
        let factory = SocketFactory::default();

        let answers = resolve_over_tcp(
            "example.com",
            endpoint,
            Duration::from_millis(200),
            &factory,
        )
        .await;

        assert!(answers.is_empty());
    }
}
