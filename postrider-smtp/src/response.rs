//! SMTP reply parsing.

use crate::error::ClientError;

type Result<T> = std::result::Result<T, ClientError>;

/// One line of a (possibly multi-line) SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplyLine {
    code: u16,
    is_last: bool,
    message: String,
}

/// A complete SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The three-digit status code.
    pub code: u16,
    /// Message text of every line, in order.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined with newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx reply.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx reply; in practice the 354 "start mail input" after DATA.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    fn parse_line(line: &str) -> Result<ReplyLine> {
        // Work on bytes: an untrusted server can put multi-byte UTF-8
        // anywhere in the line, so no position is a safe str index until
        // the bytes before it are known to be ASCII.
        let bytes = line.as_bytes();

        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(ClientError::ParseError(format!(
                "invalid status code in reply line: {line:?}"
            )));
        }
        let code = bytes[..3]
            .iter()
            .fold(0u16, |code, digit| code * 10 + u16::from(digit - b'0'));

        // A space after the code marks the final line, a dash a continuation.
        let is_last = match bytes.get(3) {
            Some(b' ') | None => true,
            Some(b'-') => false,
            Some(_) => {
                return Err(ClientError::ParseError(format!(
                    "invalid separator in reply line: {line:?}"
                )));
            }
        };

        let message = line.get(4..).unwrap_or_default().to_string();

        Ok(ReplyLine {
            code,
            is_last,
            message,
        })
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns `None` if the buffer does not yet hold the whole reply;
    /// otherwise the reply and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` on malformed reply lines, including
    /// a continuation whose code differs from the first line's.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)?;
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        loop {
            let rest = &text[consumed..];
            let Some(end) = rest.find('\n') else {
                return Ok(None);
            };
            let raw = rest[..end].trim_end_matches('\r');
            consumed += end + 1;

            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(raw)?;
            match first_code {
                None => first_code = Some(line.code),
                Some(code) if code != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "status code changed mid-reply: {code} then {}",
                        line.code
                    )));
                }
                Some(_) => {}
            }

            lines.push(line.message);
            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }
    }
}
