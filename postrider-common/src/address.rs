//! Mailbox address splitting.
//!
//! Addresses are validated once, at ingestion; everything past the queue
//! trusts the split. The contract is deliberately loose: a single `@` with
//! non-empty halves is enough, and the split happens at the *first* `@`, so
//! `a@b@c` yields local part `a` and domain `b@c`.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Domain;

/// Errors produced when splitting an address into local part and domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address string is empty.
    #[error("address is empty")]
    Empty,

    /// The address has no `@` separator.
    #[error("address {0:?} has no '@' separator")]
    MissingSeparator(String),

    /// Nothing before the `@`.
    #[error("address {0:?} has an empty local part")]
    EmptyLocalPart(String),

    /// Nothing after the `@`.
    #[error("address {0:?} has an empty domain")]
    EmptyDomain(String),
}

/// A parsed mail address: local part plus domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub local_part: String,
    pub domain: Domain,
}

impl Mailbox {
    /// Split an address at the first `@`.
    ///
    /// # Errors
    ///
    /// Returns an `AddressError` if the input is empty, has no `@`, or
    /// either side of the split is empty.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        if address.is_empty() {
            return Err(AddressError::Empty);
        }

        let Some((local_part, domain)) = address.split_once('@') else {
            return Err(AddressError::MissingSeparator(address.to_string()));
        };

        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart(address.to_string()));
        }

        if domain.is_empty() {
            return Err(AddressError::EmptyDomain(address.to_string()));
        }

        Ok(Self {
            local_part: local_part.to_string(),
            domain: Domain::from(domain),
        })
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_valid_address() {
        let mailbox = Mailbox::parse("user@example.com").unwrap();
        assert_eq!(mailbox.local_part, "user");
        assert_eq!(mailbox.domain.as_str(), "example.com");
        assert_eq!(mailbox.to_string(), "user@example.com");
    }

    #[test]
    fn splits_at_first_separator() {
        let mailbox = Mailbox::parse("a@b@c").unwrap();
        assert_eq!(mailbox.local_part, "a");
        assert_eq!(mailbox.domain.as_str(), "b@c");
    }

    #[test]
    fn rejects_missing_separator() {
        assert_eq!(
            Mailbox::parse("nodomain"),
            Err(AddressError::MissingSeparator("nodomain".to_string()))
        );
    }

    #[test]
    fn rejects_empty_halves() {
        assert_eq!(Mailbox::parse(""), Err(AddressError::Empty));
        assert_eq!(
            Mailbox::parse("@example.com"),
            Err(AddressError::EmptyLocalPart("@example.com".to_string()))
        );
        assert_eq!(
            Mailbox::parse("user@"),
            Err(AddressError::EmptyDomain("user@".to_string()))
        );
    }
}
