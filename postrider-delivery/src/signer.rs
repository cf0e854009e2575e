//! DKIM signature generation.
//!
//! Produces a `DKIM-Signature` header value for an assembled message:
//! RSA-SHA256 over relaxed/relaxed canonicalized content, selector
//! `default`, with a fixed signature lifetime. The signed header set is
//! small and fixed; header fields listed but absent from the message
//! contribute nothing to the hash, which is the verifier-compatible way of
//! pinning them against later addition.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use postrider_common::Domain;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Selector published under `<selector>._domainkey.<domain>`.
pub const SELECTOR: &str = "default";

/// Signature lifetime: `x=` is set this many seconds after `t=`.
pub const SIGNATURE_EXPIRY_SECS: i64 = 3600;

/// Header fields bound by the signature, in `h=` order.
const SIGNED_HEADERS: &[&str] = &["from", "date", "mime-version", "received", "received"];

/// Errors produced while building a signature.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The supplied PEM did not decode to an RSA private key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The RSA signing operation itself failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Signs messages for one sending domain with one private key.
#[derive(Debug)]
pub struct DkimSigner {
    domain: Domain,
    key: RsaPrivateKey,
}

impl DkimSigner {
    /// Load a signer from a PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    ///
    /// # Errors
    ///
    /// Returns `SignerError::InvalidKey` if neither encoding decodes.
    pub fn from_pem(domain: Domain, pem: &str) -> Result<Self, SignerError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        Ok(Self { domain, key })
    }

    /// The domain this signer stamps into `d=`.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Build the value of a `DKIM-Signature` header for a message.
    ///
    /// `headers` are the message's headers in transmission order; `body` is
    /// the CRLF-delimited message body.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::Signing` if the RSA operation fails.
    pub fn signature_header(
        &self,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<String, SignerError> {
        let body_hash = BASE64.encode(Sha256::digest(canonicalize_body(body).as_bytes()));

        let timestamp = chrono::Utc::now().timestamp();
        let unsigned = format!(
            "v=1; a=rsa-sha256; c=relaxed/relaxed; d={}; s={}; t={}; x={}; h={}; bh={}; b=",
            self.domain,
            SELECTOR,
            timestamp,
            timestamp + SIGNATURE_EXPIRY_SECS,
            SIGNED_HEADERS.join(":"),
            body_hash,
        );

        let digest = Sha256::digest(signing_input(headers, &unsigned));
        let signature = self
            .key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        Ok(format!("{unsigned}{}", BASE64.encode(signature)))
    }
}

/// The bytes covered by the signature: each signed header in relaxed form,
/// then the DKIM-Signature header itself (with an empty `b=`) without a
/// trailing CRLF.
fn signing_input(headers: &[(String, String)], dkim_value: &str) -> Vec<u8> {
    let mut used = vec![false; headers.len()];
    let mut input = String::new();

    for name in SIGNED_HEADERS {
        // Repeated names in h= select instances bottom-up (RFC 6376 5.4.2).
        let found = headers
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (header, _))| !used[*i] && header.eq_ignore_ascii_case(name));

        if let Some((i, (header, value))) = found {
            used[i] = true;
            input.push_str(&canonicalize_header(header, value));
        }
    }

    let dkim = canonicalize_header("DKIM-Signature", dkim_value);
    input.push_str(dkim.trim_end_matches("\r\n"));
    input.into_bytes()
}

/// Relaxed header canonicalization: lowercased name, unfolded value with
/// whitespace runs collapsed, single colon, CRLF terminator.
fn canonicalize_header(name: &str, value: &str) -> String {
    let unfolded = value.replace("\r\n", "");
    let collapsed = collapse_whitespace(&unfolded);
    format!("{}:{}\r\n", name.to_lowercase(), collapsed.trim())
}

/// Relaxed body canonicalization: per-line whitespace reduction, trailing
/// empty lines removed, CRLF-terminated unless empty.
fn canonicalize_body(body: &str) -> String {
    let mut lines: Vec<String> = body.split("\r\n").map(collapse_whitespace).collect();

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    if lines.is_empty() {
        String::new()
    } else {
        lines.join("\r\n") + "\r\n"
    }
}

/// Reduce every run of SP/HTAB to a single SP and drop trailing whitespace.
fn collapse_whitespace(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut pending_space = false;

    for c in line.chars() {
        if c == ' ' || c == '\t' {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }

    out
}
