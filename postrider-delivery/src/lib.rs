//! Delivery core for the postrider mail dispatcher.
//!
//! Everything between the queues and the remote SMTP servers lives here:
//!
//! - [`circuit_breaker`] — per-sender-domain admission control
//! - [`dns`] — MX resolution with a TTL-bounded cache
//! - [`signer`] — DKIM signature generation
//! - [`message`] — RFC 5322 message assembly
//! - [`engine`] — the delivery routine (resolve, connect, send)
//! - [`shard`] — bulk request fan-out into dispatch units
//! - [`consumer`] — queue workers turning outcomes into ack / requeue / drop

pub mod circuit_breaker;
pub mod consumer;
pub mod dns;
pub mod engine;
pub mod error;
pub mod message;
pub mod shard;
pub mod signer;

pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use consumer::{Consumer, ConsumerConfig, PayloadKind, UnitDeliverer};
pub use dns::{DnsConfig, DnsError, HostResolver, MailExchanger, MxResolver};
pub use engine::{
    DeliveryEngine, MailSession, SessionError, SessionFactory, SmtpConfig, SmtpSessionFactory,
};
pub use error::{DeliveryError, DispatchError};
pub use shard::shard;
pub use signer::DkimSigner;
