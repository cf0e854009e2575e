//! Wire-level data model for the dispatcher.
//!
//! Two payload shapes travel through the queues: a [`MailItem`] (one message,
//! as accepted by the single-send endpoint) and a [`DispatchUnit`] (a batch of
//! messages sharing one recipient domain, produced by sharding a bulk
//! request). Field names are part of the wire contract and must not change.

use serde::{Deserialize, Serialize};

use crate::{AddressError, Domain, Mailbox};

/// Maximum number of messages a single [`DispatchUnit`] may carry.
pub const MAX_UNIT_ITEMS: usize = 100;

/// A single outbound message as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailItem {
    pub from: String,
    /// Display name for the From header. Defaults to the sender's local part
    /// at ingestion when absent.
    #[serde(rename = "senderName", default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// PEM-encoded RSA key; when present the message is DKIM-signed.
    #[serde(rename = "privateKey", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// One message of a bulk request. Sender identity lives on the enclosing
/// request/unit, not on the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItem {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// A bulk send request as accepted over HTTP: one sender, many messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub from: String,
    #[serde(rename = "fromName", default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(rename = "privateKey", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub mail: Vec<BulkItem>,
}

/// The unit of delivery work: sender identity plus an ordered batch of at
/// most [`MAX_UNIT_ITEMS`] messages, all bound for the same recipient domain.
///
/// Both domains are carried in the payload so a consumer never has to
/// re-split addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchUnit {
    pub from: String,
    #[serde(rename = "fromName")]
    pub from_name: String,
    #[serde(rename = "privateKey", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// The sender's domain; the circuit breaker is keyed by this.
    #[serde(rename = "fromHost")]
    pub from_host: Domain,
    /// The recipient domain all items share; MX resolution target.
    #[serde(rename = "toHost")]
    pub to_host: Domain,
    pub mail: Vec<BulkItem>,
}

impl DispatchUnit {
    /// Wrap a single submitted message into a one-item unit.
    ///
    /// # Errors
    ///
    /// Returns an `AddressError` if either address does not split.
    pub fn from_single(item: MailItem) -> Result<Self, AddressError> {
        let sender = Mailbox::parse(&item.from)?;
        let recipient = Mailbox::parse(&item.to)?;

        let from_name = match item.sender_name {
            Some(name) if !name.is_empty() => name,
            _ => sender.local_part,
        };

        Ok(Self {
            from: item.from,
            from_name,
            private_key: item.private_key,
            from_host: sender.domain,
            to_host: recipient.domain,
            mail: vec![BulkItem {
                to: item.to,
                subject: item.subject,
                body: item.body,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> MailItem {
        MailItem {
            from: "alice@example.com".to_string(),
            sender_name: None,
            to: "bob@example.org".to_string(),
            subject: "hello".to_string(),
            body: "<p>hi</p>".to_string(),
            private_key: None,
        }
    }

    #[test]
    fn mail_item_wire_field_names() {
        let mut mail = item();
        mail.sender_name = Some("Alice".to_string());
        mail.private_key = Some("---key---".to_string());

        let json = serde_json::to_value(&mail).unwrap();
        assert_eq!(json["from"], "alice@example.com");
        assert_eq!(json["senderName"], "Alice");
        assert_eq!(json["privateKey"], "---key---");

        let back: MailItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, mail);
    }

    #[test]
    fn mail_item_optional_fields_are_omitted() {
        let json = serde_json::to_value(item()).unwrap();
        assert!(json.get("senderName").is_none());
        assert!(json.get("privateKey").is_none());
    }

    #[test]
    fn dispatch_unit_round_trips() {
        let unit = DispatchUnit::from_single(item()).unwrap();
        let json = serde_json::to_string(&unit).unwrap();
        let back: DispatchUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["fromHost"], "example.com");
        assert_eq!(value["toHost"], "example.org");
        assert_eq!(value["fromName"], "alice");
        assert_eq!(value["mail"][0]["to"], "bob@example.org");
    }

    #[test]
    fn from_single_defaults_display_name_to_local_part() {
        let unit = DispatchUnit::from_single(item()).unwrap();
        assert_eq!(unit.from_name, "alice");

        let mut named = item();
        named.sender_name = Some("Alice A".to_string());
        let unit = DispatchUnit::from_single(named).unwrap();
        assert_eq!(unit.from_name, "Alice A");

        let mut blank = item();
        blank.sender_name = Some(String::new());
        let unit = DispatchUnit::from_single(blank).unwrap();
        assert_eq!(unit.from_name, "alice");
    }

    #[test]
    fn from_single_rejects_bad_addresses() {
        let mut bad = item();
        bad.from = "nodomain".to_string();
        assert!(DispatchUnit::from_single(bad).is_err());

        let mut bad = item();
        bad.to = "@example.org".to_string();
        assert!(DispatchUnit::from_single(bad).is_err());
    }
}
