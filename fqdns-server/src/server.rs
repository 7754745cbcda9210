//! The forwarding server: a UDP listener that answers `A` queries by
//! racing upstream resolvers through `fqdns_core::concurrent::resolve`,
//! with China-domain routing and hosted-alias rewriting.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use fqdns_core::concurrent::{self, Transport};
use fqdns_core::Strategy;
use fqdns_wire::{Message, UpstreamEndpoint, MAX_UDP_RESPONSE_SIZE};
use socket_factory::SocketFactory;
use tokio::net::UdpSocket;

const IGNORE_HOSTED_PREFIX: &str = "ignore-hosted-domain.";

/// Static configuration for one forwarding server instance. Immutable
/// after construction; shared read-only across every spawned request
/// handler via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: UpstreamEndpoint,
    pub upstreams: Vec<UpstreamEndpoint>,
    pub china_upstreams: Vec<UpstreamEndpoint>,
    pub hosted_domains: HashSet<String>,
    pub hosted_at: String,
    pub direct: bool,
    pub enable_china_domain: bool,
    pub enable_hosted_domain: bool,
    pub fallback_timeout: Duration,
    pub strategy: Strategy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: UpstreamEndpoint::new(Ipv4Addr::UNSPECIFIED, 53),
            upstreams: vec![
                UpstreamEndpoint::new(Ipv4Addr::new(8, 8, 8, 8), 53),
                UpstreamEndpoint::new(Ipv4Addr::new(208, 67, 222, 222), 5353),
            ],
            china_upstreams: vec![
                UpstreamEndpoint::new(Ipv4Addr::new(114, 114, 114, 114), 53),
                UpstreamEndpoint::new(Ipv4Addr::new(114, 114, 115, 115), 53),
            ],
            hosted_domains: HashSet::new(),
            hosted_at: "fqrouter.com".to_owned(),
            direct: false,
            enable_china_domain: false,
            enable_hosted_domain: false,
            fallback_timeout: Duration::from_secs(1),
            strategy: Strategy::default(),
        }
    }
}

/// A running forwarding server: the listener socket plus the outbound
/// socket factory every spawned handler shares.
pub struct Server {
    socket: Arc<UdpSocket>,
    config: Arc<ServerConfig>,
    factory: SocketFactory,
}

impl Server {
    pub async fn bind(config: ServerConfig, factory: SocketFactory) -> Result<Self, Error> {
        let socket = UdpSocket::bind(config.listen.socket_addr())
            .await
            .map_err(Error::Bind)?;

        Ok(Self {
            socket: Arc::new(socket),
            config: Arc::new(config),
            factory,
        })
    }

    /// Runs the accept loop forever, spawning one handler task per
    /// incoming datagram (`spec.md` §5: "no admission control").
    pub async fn run(&self) -> Result<(), Error> {
        let mut buf = [0u8; MAX_UDP_RESPONSE_SIZE];

        loop {
            let (n, client) = self.socket.recv_from(&mut buf).await.map_err(Error::Recv)?;
            let request = buf[..n].to_vec();

            let socket = Arc::clone(&self.socket);
            let config = Arc::clone(&self.config);
            let factory = self.factory;

            tokio::spawn(async move {
                if let Err(error) = handle_datagram(&request, client, &socket, &config, &factory).await {
                    tracing::warn!(%error, %client, "Failed to handle DNS request");
                }
            });
        }
    }
}

async fn handle_datagram(
    request: &[u8],
    client: std::net::SocketAddr,
    socket: &UdpSocket,
    config: &ServerConfig,
    factory: &SocketFactory,
) -> Result<(), Error> {
    let message = Message::parse(request).map_err(Error::Malformed)?;
    let questions = message.a_question_names().map_err(Error::Malformed)?;

    if config.direct || questions.len() != 1 {
        let response = relay_verbatim(request, &config.upstreams[0], factory).await?;
        if let Some(response) = response {
            socket.send_to(&response, client).await.map_err(Error::Send)?;
        }
        return Ok(());
    }

    let d = &questions[0];
    let pool = if config.enable_china_domain
        && !config.china_upstreams.is_empty()
        && fqdns_core::china::is_china_domain(d, fqdns_core::china::DEFAULT_CHINA_DOMAINS)
    {
        &config.china_upstreams
    } else {
        &config.upstreams
    };

    let q = querying_name(d, config);
    let names: HashSet<String> = [q.clone()].into_iter().collect();
    let forged = Arc::new(fqdns_core::forged::BUILTIN.clone());

    let mut answers = concurrent::resolve(
        &names,
        Transport::Udp,
        pool,
        config.fallback_timeout,
        config.strategy,
        Arc::clone(&forged),
        factory,
        1,
    )
    .await
    .remove(&q)
    .map(fqdns_core::UdpAnswers::into_flat)
    .unwrap_or_default();

    if answers.is_empty() {
        answers = concurrent::resolve(
            &names,
            Transport::Tcp,
            pool,
            config.fallback_timeout * 2,
            config.strategy,
            forged,
            factory,
            1,
        )
        .await
        .remove(&q)
        .map(fqdns_core::UdpAnswers::into_flat)
        .unwrap_or_default();
    }

    if answers.is_empty() {
        tracing::debug!(name = %d, "No upstream answer; dropping client request");
        return Ok(());
    }

    let response = fqdns_wire::synthesize_response(request, &answers).map_err(Error::Malformed)?;
    socket.send_to(&response, client).await.map_err(Error::Send)?;

    Ok(())
}

/// The name actually sent upstream: the hosted-alias prefix stripped, the
/// hosted suffix appended, or `d` unchanged — in that priority order, per
/// `spec.md` §4.H step 3.
fn querying_name(d: &str, config: &ServerConfig) -> String {
    if let Some(stripped) = d.strip_prefix(IGNORE_HOSTED_PREFIX) {
        stripped.to_owned()
    } else if config.enable_hosted_domain && config.hosted_domains.contains(d) {
        format!("{d}.{}", config.hosted_at)
    } else {
        d.to_owned()
    }
}

/// Relays `request` verbatim to `upstream` and returns whatever comes
/// back, unparsed. Used for direct mode and any request carrying more (or
/// fewer) than one `A` question, where no strategy logic applies.
async fn relay_verbatim(
    request: &[u8],
    upstream: &UpstreamEndpoint,
    factory: &SocketFactory,
) -> Result<Option<Vec<u8>>, Error> {
    let socket = factory.udp_socket().map_err(Error::Socket)?;
    socket
        .send_to(request, upstream.socket_addr())
        .await
        .map_err(Error::Send)?;

    let mut buf = [0u8; MAX_UDP_RESPONSE_SIZE];
    match tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf)).await {
        Ok(Ok(n)) => Ok(Some(buf[..n].to_vec())),
        Ok(Err(error)) => Err(Error::Recv(error)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    #[error("failed to receive datagram: {0}")]
    Recv(std::io::Error),
    #[error("failed to send datagram: {0}")]
    Send(std::io::Error),
    #[error("failed to construct outbound socket: {0}")]
    Socket(socket_factory::Error),
    #[error("malformed DNS message: {0}")]
    Malformed(fqdns_wire::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fqdns_wire::{build_query, synthesize_response, RecordType};
    use std::net::SocketAddr;

    async fn upstream_returning(ips: Vec<Ipv4Addr>) -> (UpstreamEndpoint, Arc<std::sync::atomic::AtomicUsize>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            if let Ok((n, from)) = socket.recv_from(&mut buf).await {
                hits_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let response = synthesize_response(&buf[..n], &ips).unwrap();
                let _ = socket.send_to(&response, from).await;
            }
        });

        (UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), addr.port()), hits)
    }

    async fn client_roundtrip(listen: SocketAddr, query: &[u8]) -> Vec<u8> {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(query, listen).await.unwrap();

        let mut buf = [0u8; 512];
        let n = tokio::time::timeout(Duration::from_secs(2), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn china_domain_is_routed_to_china_pool_only() {
        let (china, china_hits) = upstream_returning(vec![Ipv4Addr::new(111, 13, 100, 92)]).await;
        let (default, default_hits) = upstream_returning(vec![Ipv4Addr::new(1, 1, 1, 1)]).await;

        let config = ServerConfig {
            listen: UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), 0),
            upstreams: vec![default],
            china_upstreams: vec![china],
            enable_china_domain: true,
            fallback_timeout: Duration::from_millis(300),
            ..ServerConfig::default()
        };

        let server = Server::bind(config, SocketFactory::default()).await.unwrap();
        let listen_addr = server.socket.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let (query, _id) = build_query("weibo.com", RecordType::A).unwrap();
        let response = client_roundtrip(listen_addr, &query).await;
        let parsed = Message::parse(&response).unwrap();

        assert_eq!(parsed.a_answers().unwrap(), vec![Ipv4Addr::new(111, 13, 100, 92)]);
        assert_eq!(china_hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hosted_domain_is_aliased_upstream_but_not_to_the_client() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let seen_name = Arc::new(std::sync::Mutex::new(None));
        let seen_name_clone = Arc::clone(&seen_name);

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            if let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let parsed = Message::parse(&buf[..n]).unwrap();
                *seen_name_clone.lock().unwrap() = parsed.question_name().map(|n| n.to_string());
                let response = synthesize_response(&buf[..n], &[Ipv4Addr::new(93, 184, 216, 34)]).unwrap();
                let _ = socket.send_to(&response, from).await;
            }
        });
        let upstream = UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), addr.port());

        let config = ServerConfig {
            listen: UpstreamEndpoint::new(Ipv4Addr::new(127, 0, 0, 1), 0),
            upstreams: vec![upstream],
            hosted_domains: ["google.com".to_owned()].into_iter().collect(),
            hosted_at: "fqrouter.com".to_owned(),
            enable_hosted_domain: true,
            fallback_timeout: Duration::from_millis(300),
            ..ServerConfig::default()
        };

        let server = Server::bind(config, SocketFactory::default()).await.unwrap();
        let listen_addr = server.socket.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let (query, _id) = build_query("google.com", RecordType::A).unwrap();
        let response = client_roundtrip(listen_addr, &query).await;
        let parsed = Message::parse(&response).unwrap();

        assert_eq!(
            seen_name.lock().unwrap().as_deref(),
            Some("google.com.fqrouter.com.")
        );
        assert_eq!(
            parsed.question_name().map(|n| n.to_string()).as_deref(),
            Some("google.com.")
        );
        assert_eq!(parsed.a_answers().unwrap(), vec![Ipv4Addr::new(93, 184, 216, 34)]);
    }
}
