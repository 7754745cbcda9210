//! The resolver engine: known-forged-answer set, China-domain
//! classifier, UDP response selector, per-attempt resolver, and the
//! concurrent fan-out resolver that ties them together.

pub mod attempt;
pub mod china;
pub mod concurrent;
pub mod forged;
pub mod hosted;
pub mod select;
pub mod strategy;

pub use attempt::UdpAnswers;
pub use strategy::Strategy;

/// Errors a single resolution attempt can hit. Never propagated past the
/// attempt boundary — `attempt.rs` logs these and converts them to an
/// empty answer, per `spec.md` §7's propagation policy.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("attempt timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("malformed DNS message: {0}")]
    Malformed(#[from] fqdns_wire::Error),
    #[error("socket construction failed: {0}")]
    Socket(#[from] socket_factory::Error),
}
