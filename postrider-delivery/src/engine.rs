//! The delivery routine.
//!
//! Given one dispatch unit, resolve the recipient domain's mail exchangers,
//! establish a session with the first host that will take one, and send every
//! item in order. Hosts are failover candidates, not fan-out targets: once a
//! session is established the unit's fate is decided on that host and no
//! later exchanger is tried.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use postrider_common::DispatchUnit;
use postrider_smtp::{Response, SmtpClient};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    dns::HostResolver,
    error::DeliveryError,
    message::MailMessage,
    signer::DkimSigner,
};

/// Delivery always targets the standard SMTP relay port.
pub const SMTP_PORT: u16 = 25;

/// Transport-level settings for outbound sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for each command/response exchange in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Name presented in EHLO.
    #[serde(default = "default_helo_name")]
    pub helo_name: String,
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_send_timeout_secs() -> u64 {
    10
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            helo_name: default_helo_name(),
        }
    }
}

/// Errors from establishing or using one SMTP session.
///
/// The engine classifies by *where* the error happened, not what it was:
/// anything during session establishment is a connection problem, anything
/// after is a send problem.
#[derive(Debug, Error)]
pub enum SessionError {
    /// TCP connect failed.
    #[error("connect to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    /// An exchange did not complete in time.
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    /// The server answered a command with a non-success status.
    #[error("{command} rejected: {code} {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },

    /// Protocol or transport failure in the client.
    #[error(transparent)]
    Client(#[from] postrider_smtp::ClientError),
}

/// One established SMTP session, ready to carry messages.
#[async_trait]
pub trait MailSession: Send {
    /// Run one envelope through the session: MAIL FROM, RCPT TO, DATA,
    /// message content.
    async fn send(&mut self, from: &str, to: &str, message: &[u8]) -> Result<(), SessionError>;

    /// Say goodbye and drop the connection. Best effort.
    async fn close(&mut self);
}

/// Opens sessions with mail exchanger hosts.
///
/// A trait seam so the engine can be exercised with scripted sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, host: &str) -> Result<Box<dyn MailSession>, SessionError>;
}

/// Production [`SessionFactory`]: TCP to port 25, EHLO, opportunistic
/// STARTTLS.
pub struct SmtpSessionFactory {
    config: SmtpConfig,
}

impl SmtpSessionFactory {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for SmtpSessionFactory {
    async fn open(&self, host: &str) -> Result<Box<dyn MailSession>, SessionError> {
        let addr = format!("{host}:{SMTP_PORT}");
        let connect = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            SmtpClient::connect(&addr),
        );

        let mut client = match connect.await {
            Ok(Ok(client)) => client,
            Ok(Err(err)) => {
                return Err(SessionError::Connect {
                    host: host.to_string(),
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                return Err(SessionError::Connect {
                    host: host.to_string(),
                    reason: format!(
                        "timed out after {} seconds",
                        self.config.connect_timeout_secs
                    ),
                });
            }
        };

        let timeout = self.config.send_timeout_secs;

        let greeting = exchange(timeout, client.read_greeting()).await?;
        expect_success("greeting", &greeting)?;

        let ehlo = exchange(timeout, client.ehlo(&self.config.helo_name)).await?;
        expect_success("EHLO", &ehlo)?;

        if advertises_starttls(&ehlo) {
            let response = exchange(timeout, client.starttls(host)).await?;
            if response.is_success() {
                // RFC 3207: state resets after the handshake, greet again.
                let ehlo = exchange(timeout, client.ehlo(&self.config.helo_name)).await?;
                expect_success("EHLO", &ehlo)?;
            } else {
                tracing::debug!(
                    host,
                    code = response.code,
                    "STARTTLS declined, continuing in the clear"
                );
            }
        }

        Ok(Box::new(SmtpSession {
            client,
            timeout_secs: timeout,
        }))
    }
}

fn advertises_starttls(ehlo: &Response) -> bool {
    ehlo.lines
        .iter()
        .any(|line| line.to_uppercase().contains("STARTTLS"))
}

async fn exchange(
    secs: u64,
    operation: impl Future<Output = postrider_smtp::Result<Response>> + Send,
) -> Result<Response, SessionError> {
    match tokio::time::timeout(Duration::from_secs(secs), operation).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::Timeout(secs)),
    }
}

fn expect_success(command: &'static str, response: &Response) -> Result<(), SessionError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(SessionError::Rejected {
            command,
            code: response.code,
            message: response.message(),
        })
    }
}

struct SmtpSession {
    client: SmtpClient,
    timeout_secs: u64,
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn send(&mut self, from: &str, to: &str, message: &[u8]) -> Result<(), SessionError> {
        let timeout = self.timeout_secs;

        let response = exchange(timeout, self.client.mail_from(from)).await?;
        expect_success("MAIL FROM", &response)?;

        let response = exchange(timeout, self.client.rcpt_to(to)).await?;
        expect_success("RCPT TO", &response)?;

        let response = exchange(timeout, self.client.data()).await?;
        if !response.is_intermediate() {
            return Err(SessionError::Rejected {
                command: "DATA",
                code: response.code,
                message: response.message(),
            });
        }

        let response = exchange(timeout, self.client.send_message(message)).await?;
        expect_success("message content", &response)?;

        Ok(())
    }

    async fn close(&mut self) {
        let _ = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            self.client.quit(),
        )
        .await;
    }
}

/// Delivers dispatch units over SMTP.
pub struct DeliveryEngine {
    resolver: Arc<dyn HostResolver>,
    sessions: Arc<dyn SessionFactory>,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(resolver: Arc<dyn HostResolver>, sessions: Arc<dyn SessionFactory>) -> Self {
        Self { resolver, sessions }
    }

    /// Deliver every item of `unit` to its recipient domain.
    ///
    /// # Errors
    ///
    /// `DeliveryError::Connection` when no resolved exchanger accepted a
    /// session (retryable); `DeliveryError::Send` when a session was
    /// established but an item was refused, or the unit itself is unusable
    /// (terminal).
    pub async fn deliver(&self, unit: &DispatchUnit) -> Result<(), DeliveryError> {
        if unit.mail.is_empty() {
            return Err(DeliveryError::Send("dispatch unit has no items".to_string()));
        }

        // A broken key can never succeed, so fail it before any network work.
        let signer = match unit.private_key.as_deref() {
            Some(pem) => Some(
                DkimSigner::from_pem(unit.from_host.clone(), pem)
                    .map_err(|e| DeliveryError::Send(e.to_string()))?,
            ),
            None => None,
        };

        let exchangers = self.resolver.resolve(&unit.to_host).await?;

        let mut last_refusal = None;
        for exchanger in &exchangers {
            match self.sessions.open(&exchanger.host).await {
                Ok(mut session) => {
                    tracing::debug!(
                        host = %exchanger.host,
                        domain = %unit.to_host,
                        "session established"
                    );
                    let outcome = send_all(session.as_mut(), unit, signer.as_ref()).await;
                    session.close().await;
                    return outcome;
                }
                Err(err) => {
                    tracing::debug!(
                        host = %exchanger.host,
                        %err,
                        "mail exchanger refused session"
                    );
                    last_refusal = Some(err);
                }
            }
        }

        Err(DeliveryError::Connection(match last_refusal {
            Some(err) => format!(
                "no mail exchanger for {} accepted a session: {err}",
                unit.to_host
            ),
            None => format!("no mail exchangers resolved for {}", unit.to_host),
        }))
    }
}

/// Send every item through an established session, in order, stopping at the
/// first refusal.
async fn send_all(
    session: &mut dyn MailSession,
    unit: &DispatchUnit,
    signer: Option<&DkimSigner>,
) -> Result<(), DeliveryError> {
    for item in &unit.mail {
        let message = MailMessage::assemble(unit, item);

        let signature = match signer {
            Some(signer) => Some(
                signer
                    .signature_header(message.headers(), message.body())
                    .map_err(|e| DeliveryError::Send(e.to_string()))?,
            ),
            None => None,
        };

        session
            .send(&unit.from, &item.to, &message.to_bytes(signature.as_deref()))
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))?;

        tracing::info!(to = %item.to, domain = %unit.to_host, "message accepted");
    }

    Ok(())
}
