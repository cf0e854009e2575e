//! RFC 5322 message assembly.
//!
//! Turns one item of a dispatch unit into wire bytes: standard headers, a
//! generated Message-ID, an HTML body with CRLF line endings, and (when the
//! unit carries a signing key) a DKIM-Signature header prepended by the
//! engine.

use chrono::Utc;
use postrider_common::{BulkItem, DispatchUnit};
use ulid::Ulid;

/// An assembled message: ordered headers plus a CRLF-normalized body.
#[derive(Debug, Clone)]
pub struct MailMessage {
    headers: Vec<(String, String)>,
    body: String,
}

impl MailMessage {
    /// Assemble `item` using the sender identity carried by `unit`.
    #[must_use]
    pub fn assemble(unit: &DispatchUnit, item: &BulkItem) -> Self {
        let headers = vec![
            ("Date".to_string(), Utc::now().to_rfc2822()),
            (
                "From".to_string(),
                format!("{} <{}>", unit.from_name, unit.from),
            ),
            ("To".to_string(), item.to.clone()),
            ("Subject".to_string(), item.subject.clone()),
            (
                "Message-ID".to_string(),
                format!("<{}@{}>", Ulid::new(), unit.from_host),
            ),
            ("MIME-Version".to_string(), "1.0".to_string()),
            (
                "Content-Type".to_string(),
                "text/html; charset=utf-8".to_string(),
            ),
        ];

        Self {
            headers,
            body: normalize_crlf(&item.body),
        }
    }

    /// Headers in transmission order; the slice a DKIM signer hashes over.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The CRLF-normalized body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialize for the DATA phase, prepending a DKIM-Signature header when
    /// a signature was produced.
    #[must_use]
    pub fn to_bytes(&self, dkim_signature: Option<&str>) -> Vec<u8> {
        let mut wire = String::new();

        if let Some(signature) = dkim_signature {
            wire.push_str("DKIM-Signature: ");
            wire.push_str(signature);
            wire.push_str("\r\n");
        }

        for (name, value) in &self.headers {
            wire.push_str(name);
            wire.push_str(": ");
            wire.push_str(value);
            wire.push_str("\r\n");
        }

        wire.push_str("\r\n");
        wire.push_str(&self.body);
        wire.into_bytes()
    }
}

/// Rewrite bare LF line endings as CRLF, leaving existing CRLF untouched.
fn normalize_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_was_cr = false;

    for c in text.chars() {
        if c == '\n' && !previous_was_cr {
            out.push('\r');
        }
        previous_was_cr = c == '\r';
        out.push(c);
    }

    out
}
