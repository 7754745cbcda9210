//! The UDP anti-poisoning response selector.
//!
//! Reads datagrams off an already-queried socket until either a
//! strategy-specific terminating rule fires or the shared deadline
//! elapses, discarding along the way whatever the adversary model in
//! [`is_right_response`] judges forged.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use fqdns_wire::{Message, MAX_UDP_RESPONSE_SIZE};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::strategy::Strategy;

/// True if a response is authentic enough to act on: a non-empty A-answer
/// list that either has more than one address, or whose single address is
/// not a known-forged one.
///
/// The adversary is assumed to forge at most one answer per datagram, and
/// may forge empty replies — kept in one function, per the original
/// design notes, so the assumption can be revised in one place.
pub fn is_right_response(message: &Message, forged: &HashSet<Ipv4Addr>) -> bool {
    match message.a_answers() {
        Ok(answers) => match answers.as_slice() {
            [] => false,
            [single] => !forged.contains(single),
            _ => true,
        },
        Err(_) => false,
    }
}

/// Drains responses from `socket` until `deadline`, applying `strategy`'s
/// selection rule to each one. Returns the accumulated pick: empty if
/// nothing qualified, a single message for every strategy but `pick-all`,
/// and the full in-order sequence of accepted messages under `pick-all`.
pub async fn select_responses(
    socket: &UdpSocket,
    deadline: Instant,
    strategy: Strategy,
    forged: &HashSet<Ipv4Addr>,
) -> Vec<Message> {
    let mut held = Vec::new();
    let mut buf = [0u8; MAX_UDP_RESPONSE_SIZE];

    loop {
        let recv = tokio::time::timeout_at(deadline, socket.recv(&mut buf));

        let n = match recv.await {
            Ok(Ok(n)) => n,
            Ok(Err(error)) => {
                tracing::warn!(%error, "UDP receive failed while selecting a response");
                break;
            }
            Err(_) => break,
        };

        let message = match Message::parse(&buf[..n]) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%error, "Discarding malformed UDP response");
                continue;
            }
        };

        if strategy == Strategy::PickFirst {
            return vec![message];
        }

        let is_multi_answer = message.a_answers().map(|a| a.len() > 1).unwrap_or(false);
        if strategy != Strategy::PickAll && is_multi_answer {
            return vec![message];
        }

        match strategy {
            Strategy::PickLater => held = vec![message],
            Strategy::PickRight => {
                if is_right_response(&message, forged) {
                    return vec![message];
                }
            }
            Strategy::PickRightLater => {
                if is_right_response(&message, forged) {
                    held = vec![message];
                }
            }
            Strategy::PickAll => held.push(message),
            Strategy::PickFirst => unreachable!("returned above"),
        }
    }

    held
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fqdns_wire::synthesize_response;
    use tokio::net::UdpSocket;

    fn forged_set() -> HashSet<Ipv4Addr> {
        [Ipv4Addr::new(78, 16, 49, 15)].into_iter().collect()
    }

    async fn responder() -> (UdpSocket, std::net::SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn response_for(query: &[u8], ips: &[Ipv4Addr]) -> Vec<u8> {
        synthesize_response(query, ips).unwrap()
    }

    #[tokio::test]
    async fn pick_right_filters_single_forged_then_accepts_real() {
        let (client, client_addr) = responder().await;
        let (server, server_addr) = responder().await;

        let (query, _id) = fqdns_wire::build_query("twitter.com", fqdns_wire::RecordType::A).unwrap();
        client.connect(server_addr).await.unwrap();
        client.send(&query).await.unwrap();

        let forged = response_for(&query, &[Ipv4Addr::new(78, 16, 49, 15)]);
        let real = response_for(&query, &[Ipv4Addr::new(199, 59, 148, 10)]);

        server.send_to(&forged, client_addr).await.unwrap();
        server.send_to(&real, client_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(500);
        let picked = select_responses(&client, deadline, Strategy::PickRight, &forged_set()).await;

        assert_eq!(picked.len(), 1);
        assert_eq!(
            picked[0].a_answers().unwrap(),
            vec![Ipv4Addr::new(199, 59, 148, 10)]
        );
    }

    #[tokio::test]
    async fn multi_answer_short_circuits_even_under_pick_later() {
        let (client, client_addr) = responder().await;
        let (server, server_addr) = responder().await;

        let (query, _id) = fqdns_wire::build_query("example.com", fqdns_wire::RecordType::A).unwrap();
        client.connect(server_addr).await.unwrap();
        client.send(&query).await.unwrap();

        let multi = response_for(
            &query,
            &[Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8)],
        );
        server.send_to(&multi, client_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let picked = select_responses(&client, deadline, Strategy::PickLater, &forged_set()).await;

        assert_eq!(picked.len(), 1);
        assert_eq!(
            picked[0].a_answers().unwrap(),
            vec![Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8)]
        );
    }

    #[tokio::test]
    async fn pick_right_times_out_empty_when_all_responses_are_forged() {
        let (client, client_addr) = responder().await;
        let (server, server_addr) = responder().await;

        let (query, _id) = fqdns_wire::build_query("twitter.com", fqdns_wire::RecordType::A).unwrap();
        client.connect(server_addr).await.unwrap();
        client.send(&query).await.unwrap();

        let forged = response_for(&query, &[Ipv4Addr::new(78, 16, 49, 15)]);
        server.send_to(&forged, client_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(100);
        let picked = select_responses(&client, deadline, Strategy::PickRight, &forged_set()).await;

        assert!(picked.is_empty());
    }

    #[tokio::test]
    async fn pick_all_accumulates_every_response_in_order() {
        let (client, client_addr) = responder().await;
        let (server, server_addr) = responder().await;

        let (query, _id) = fqdns_wire::build_query("example.com", fqdns_wire::RecordType::A).unwrap();
        client.connect(server_addr).await.unwrap();
        client.send(&query).await.unwrap();

        let first = response_for(&query, &[Ipv4Addr::new(1, 1, 1, 1)]);
        let second = response_for(&query, &[Ipv4Addr::new(2, 2, 2, 2)]);
        server.send_to(&first, client_addr).await.unwrap();
        server.send_to(&second, client_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(300);
        let picked = select_responses(&client, deadline, Strategy::PickAll, &forged_set()).await;

        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].a_answers().unwrap(), vec![Ipv4Addr::new(1, 1, 1, 1)]);
        assert_eq!(picked[1].a_answers().unwrap(), vec![Ipv4Addr::new(2, 2, 2, 2)]);
    }
}
