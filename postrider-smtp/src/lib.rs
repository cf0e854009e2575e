//! Outbound SMTP client.
//!
//! Speaks just enough client-side SMTP for direct-to-MX delivery: EHLO,
//! opportunistic STARTTLS, MAIL FROM / RCPT TO / DATA, QUIT. Timeouts and
//! policy live with the caller; this crate only moves bytes and parses
//! replies.

pub mod client;
pub mod error;
pub mod response;

pub use client::SmtpClient;
pub use error::ClientError;
pub use response::Response;

pub type Result<T> = std::result::Result<T, ClientError>;
