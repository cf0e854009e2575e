//! The SMTP client connection.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig};

use crate::Result;
use crate::error::ClientError;
use crate::response::Response;

/// Size of each read from the socket.
const READ_CHUNK: usize = 4096;

/// Maximum buffered reply size before giving up on a server (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// A client connection that is either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Upgrade a plain connection to TLS.
    ///
    /// Certificate verification is disabled: delivery to arbitrary MX hosts
    /// on port 25 is opportunistic encryption, and most of those hosts
    /// present certificates that would never chain to a local root store.
    async fn upgrade_to_tls(self, server_name: &str) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let config = ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth();

                let connector = TlsConnector::from(Arc::new(config));
                let server_name = ServerName::try_from(server_name.to_string())
                    .map_err(|e| ClientError::TlsError(format!("invalid server name: {e}")))?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "connection is already TLS".to_string(),
            )),
        }
    }
}

/// A certificate verifier that accepts every certificate.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// An SMTP client for sending commands and reading replies.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    pending: Vec<u8>,
}

impl SmtpClient {
    /// Open a TCP connection to `addr` (`host:port`).
    ///
    /// The server greeting is *not* consumed here; call
    /// [`Self::read_greeting`] next.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Io)?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            pending: Vec::new(),
        })
    }

    /// Read the initial server greeting (usually 220).
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Send EHLO with the given client name.
    pub async fn ehlo(&mut self, name: &str) -> Result<Response> {
        self.command(&format!("EHLO {name}")).await
    }

    /// Issue STARTTLS and, on a 220 reply, upgrade the connection in place.
    ///
    /// A non-220 reply is returned untouched and the connection stays plain;
    /// the caller decides whether to proceed without encryption.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the TLS handshake does.
    pub async fn starttls(&mut self, server_name: &str) -> Result<Response> {
        let response = self.command("STARTTLS").await?;
        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            self.connection = Some(connection.upgrade_to_tls(server_name).await?);
            // Anything buffered before the handshake belongs to the
            // plaintext conversation and must not leak into it.
            self.pending.clear();
        }
        Ok(response)
    }

    /// Send MAIL FROM.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// Send RCPT TO.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Send DATA. The server should answer 354.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Transmit message content after an accepted DATA, dot-stuffed and
    /// terminated with `<CRLF>.<CRLF>`, then read the server's verdict.
    pub async fn send_message(&mut self, message: &[u8]) -> Result<Response> {
        let mut wire = dot_stuff(message);
        if !wire.ends_with(b"\r\n") {
            wire.extend_from_slice(b"\r\n");
        }
        wire.extend_from_slice(b".\r\n");

        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(&wire)
            .await?;
        self.read_response().await
    }

    /// Send QUIT.
    pub async fn quit(&mut self) -> Result<Response> {
        let response = self.command("QUIT").await?;
        self.connection = None;
        Ok(response)
    }

    async fn command(&mut self, command: &str) -> Result<Response> {
        let data = format!("{command}\r\n");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data.as_bytes())
            .await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.pending)? {
                self.pending.drain(..consumed);
                tracing::trace!(code = response.code, "server reply");
                return Ok(response);
            }

            if self.pending.len() > MAX_BUFFER_SIZE {
                return Err(ClientError::ParseError(
                    "reply exceeded maximum buffer size".to_string(),
                ));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .read(&mut chunk)
                .await?;
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Double any leading dot so message content can't terminate the DATA phase
/// early (RFC 5321 section 4.5.2).
fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len());
    let mut at_line_start = true;

    for &byte in message {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_stuffing_doubles_leading_dots() {
        assert_eq!(dot_stuff(b".hidden\r\n"), b"..hidden\r\n");
        assert_eq!(
            dot_stuff(b"line one\r\n.line two\r\n"),
            b"line one\r\n..line two\r\n"
        );
    }

    #[test]
    fn dot_stuffing_leaves_interior_dots_alone() {
        assert_eq!(dot_stuff(b"a.b.c\r\n"), b"a.b.c\r\n");
        assert_eq!(dot_stuff(b"end.\r\n"), b"end.\r\n");
    }
}
