//! DNS wire encode/decode, built on the `domain` crate the way
//! `connlib/tunnel/src/dns.rs` uses it: a `MessageBuilder` to construct
//! messages and a parsed `Message` to read them back.
//!
//! Queries are only ever built for `A` or `TXT` — `fqdns` has no use for
//! AAAA/MX/etc. Responses can still carry other record types ahead of the
//! answer we asked for (most often a `CNAME`), and [`Message::raw_answers`]
//! gives callers the rdata bytes of those so the discovery tool can diff
//! whole response shapes rather than just addresses. Response synthesis
//! is `A`-only, since that is all the forwarding server ever answers with.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::{Dname, Message as DomainMessage, MessageBuilder, ParsedDname, ToDname};
use domain::rdata::{A, UnknownRecordData};
use rand::Rng;

/// Upstream UDP receive buffer size. Responses larger than this are
/// truncated by the kernel before we ever see them, which is how a direct
/// (non-forwarding) UDP client is expected to behave per `spec.md` §4.H.
pub const MAX_UDP_RESPONSE_SIZE: usize = 512;

const DEFAULT_PORT: u16 = 53;
const SYNTHESIZED_TTL: u32 = 3600;

/// An IPv4 upstream or listen address, parsed from `"ip:port"`, bare
/// `"ip"` (port defaults to 53), or `"*"` (unspecified address, listener
/// use only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamEndpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl UpstreamEndpoint {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.addr, self.port))
    }
}

impl FromStr for UpstreamEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT));
        }

        match s.rsplit_once(':') {
            Some((ip, port)) => {
                let addr = ip
                    .parse()
                    .map_err(|_| Error::InvalidEndpoint(s.to_owned()))?;
                let port = port
                    .parse()
                    .map_err(|_| Error::InvalidEndpoint(s.to_owned()))?;
                Ok(Self::new(addr, port))
            }
            None => {
                let addr = s
                    .parse()
                    .map_err(|_| Error::InvalidEndpoint(s.to_owned()))?;
                Ok(Self::new(addr, DEFAULT_PORT))
            }
        }
    }
}

impl fmt::Display for UpstreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// The record types this resolver ever asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Txt,
}

impl RecordType {
    fn rtype(self) -> Rtype {
        match self {
            Self::A => Rtype::A,
            Self::Txt => Rtype::Txt,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::Txt => "TXT",
        })
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "TXT" => Ok(Self::Txt),
            other => Err(Error::InvalidName(other.to_owned())),
        }
    }
}

/// Builds a query for `name` of the given record type, with a fresh
/// random transaction id.
///
/// Returns the encoded message and the id it was stamped with, so the
/// caller can match it against whichever response comes back first.
pub fn build_query(name: &str, record_type: RecordType) -> Result<(Vec<u8>, u16), Error> {
    let qname =
        Dname::<Vec<u8>>::from_str(name).map_err(|_| Error::InvalidName(name.to_owned()))?;
    let id = rand::thread_rng().gen_range(1..=u16::MAX);

    let mut builder = MessageBuilder::from_target(Vec::new())
        .expect("Vec<u8> is always a valid MessageBuilder target");
    let header = builder.header_mut();
    header.set_id(id);
    header.set_rd(true);

    let mut question = builder.question();
    question
        .push((&qname, record_type.rtype(), Class::In))
        .map_err(|_| Error::MessageTooLarge)?;

    Ok((question.finish(), id))
}

/// Prefixes `message` with its big-endian `u16` length, as DNS-over-TCP
/// requires.
pub fn encode_tcp_frame(message: &[u8]) -> Result<Vec<u8>, Error> {
    let len: u16 = message.len().try_into().map_err(|_| Error::MessageTooLarge)?;

    let mut framed = Vec::with_capacity(2 + message.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);

    Ok(framed)
}

/// Decodes a DNS-over-TCP length prefix into the byte count of the
/// message that follows it.
pub fn decode_tcp_length_prefix(prefix: [u8; 2]) -> usize {
    u16::from_be_bytes(prefix) as usize
}

/// A parsed DNS message, owning its wire bytes.
pub struct Message {
    inner: DomainMessage<Vec<u8>>,
}

impl Message {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let inner = DomainMessage::from_octets(bytes.to_vec()).map_err(|_| Error::ShortMessage)?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> u16 {
        self.inner.header().id()
    }

    pub fn is_response(&self) -> bool {
        self.inner.header().qr()
    }

    pub fn rcode(&self) -> Rcode {
        self.inner.header().rcode()
    }

    pub fn question_name(&self) -> Option<ParsedDname<&[u8]>> {
        self.inner.first_question().map(|q| q.qname().clone())
    }

    /// Names of every `A`-type question in the message, in order, with the
    /// root label's trailing dot stripped. `domain`'s `Dname::to_string()`
    /// renders the fully-qualified form (`"google.com."`); callers that
    /// classify or alias against dot-less data (`china::DEFAULT_CHINA_DOMAINS`,
    /// `ServerConfig::hosted_domains`) need the same dot-less form, or
    /// nothing ever matches. Used by the forwarding server to decide
    /// whether a request is a plain single-question `A` lookup or
    /// something it should just relay verbatim.
    pub fn a_question_names(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for question in self.inner.question() {
            let question = question.map_err(|_| Error::Malformed)?;
            if question.qtype() == Rtype::A {
                names.push(question.qname().to_string().trim_end_matches('.').to_owned());
            }
        }

        Ok(names)
    }

    /// The raw wire bytes of this message, for verbatim relay.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_slice()
    }

    /// Addresses of every `A` answer record, in answer order.
    pub fn a_answers(&self) -> Result<Vec<Ipv4Addr>, Error> {
        let answer = self.inner.answer().map_err(|_| Error::Malformed)?;

        let mut addrs = Vec::new();
        for record in answer.limit_to::<A>() {
            let record = record.map_err(|_| Error::Malformed)?;
            addrs.push(record.data().addr());
        }

        Ok(addrs)
    }

    /// Raw rdata bytes of every answer record whose type is not `A`, in
    /// answer order. Used by the discovery tool to compare whole response
    /// shapes, not just the addresses we care about when resolving.
    pub fn raw_answers(&self) -> Result<Vec<Vec<u8>>, Error> {
        let answer = self.inner.answer().map_err(|_| Error::Malformed)?;

        let mut raw = Vec::new();
        for record in answer.limit_to::<UnknownRecordData<_>>() {
            let record = record.map_err(|_| Error::Malformed)?;
            if record.rtype() == Rtype::A {
                continue;
            }
            raw.push(record.data().data().as_ref().to_vec());
        }

        Ok(raw)
    }
}

/// Builds a response for `request`, reusing its transaction id and
/// question section. `answers` becomes the `A` record set; an empty slice
/// produces an `NXDOMAIN` response instead.
///
/// This does not round-trip `request` byte-for-byte — only its header id,
/// opcode/rd bits and first question survive — which is fine, since
/// nothing downstream inspects anything else in it.
pub fn synthesize_response(request: &[u8], answers: &[Ipv4Addr]) -> Result<Vec<u8>, Error> {
    let request = DomainMessage::from_octets(request.to_vec()).map_err(|_| Error::ShortMessage)?;
    let qname = request
        .first_question()
        .ok_or(Error::Malformed)?
        .qname()
        .clone();

    let builder = MessageBuilder::from_target(Vec::with_capacity(request.as_slice().len() * 2))
        .expect("Vec<u8> is always a valid MessageBuilder target");

    if answers.is_empty() {
        let answer = builder
            .start_answer(&request, Rcode::NXDomain)
            .map_err(|_| Error::MessageTooLarge)?;
        return Ok(answer.finish());
    }

    let mut answer = builder
        .start_answer(&request, Rcode::NoError)
        .map_err(|_| Error::MessageTooLarge)?;

    for ip in answers {
        answer
            .push((&qname, Class::In, SYNTHESIZED_TTL, A::new(*ip)))
            .map_err(|_| Error::MessageTooLarge)?;
    }

    Ok(answer.finish())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("'{0}' is not a valid endpoint (expected ip, ip:port, or '*')")]
    InvalidEndpoint(String),
    #[error("'{0}' is not a valid domain name")]
    InvalidName(String),
    #[error("message is too short to be a valid DNS message")]
    ShortMessage,
    #[error("message is malformed")]
    Malformed,
    #[error("message exceeded the wire format's size limits")]
    MessageTooLarge,
}
