//! Bulk request fan-out.
//!
//! A bulk request mixes recipients from many domains; delivery wants batches
//! that share one. Sharding groups items by recipient domain (keeping the
//! caller's order within each domain) and cuts each group into units of at
//! most [`MAX_UNIT_ITEMS`], every unit carrying its own copy of the sender
//! identity.

use ahash::AHashMap;
use postrider_common::{
    AddressError, BulkItem, BulkRequest, DispatchUnit, Domain, Mailbox,
    message::MAX_UNIT_ITEMS,
};

/// Split `request` into per-domain dispatch units.
///
/// Validates the sender and every recipient before producing anything, so a
/// single bad address rejects the whole request and nothing is half-queued.
///
/// # Errors
///
/// Returns the first `AddressError` encountered.
pub fn shard(request: &BulkRequest) -> Result<Vec<DispatchUnit>, AddressError> {
    let sender = Mailbox::parse(&request.from)?;

    let from_name = match &request.from_name {
        Some(name) if !name.is_empty() => name.clone(),
        _ => sender.local_part.clone(),
    };

    // First-seen order of domains, so output is deterministic.
    let mut order: Vec<Domain> = Vec::new();
    let mut groups: AHashMap<Domain, Vec<BulkItem>> = AHashMap::new();

    for item in &request.mail {
        let recipient = Mailbox::parse(&item.to)?;
        groups
            .entry(recipient.domain.clone())
            .or_insert_with(|| {
                order.push(recipient.domain.clone());
                Vec::new()
            })
            .push(item.clone());
    }

    let mut units = Vec::new();
    for domain in order {
        let items = groups.remove(&domain).unwrap_or_default();
        for chunk in items.chunks(MAX_UNIT_ITEMS) {
            units.push(DispatchUnit {
                from: request.from.clone(),
                from_name: from_name.clone(),
                private_key: request.private_key.clone(),
                from_host: sender.domain.clone(),
                to_host: domain.clone(),
                mail: chunk.to_vec(),
            });
        }
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(to: &str, subject: &str) -> BulkItem {
        BulkItem {
            to: to.to_string(),
            subject: subject.to_string(),
            body: "<p>hi</p>".to_string(),
        }
    }

    fn request(mail: Vec<BulkItem>) -> BulkRequest {
        BulkRequest {
            from: "alice@example.com".to_string(),
            from_name: Some("Alice".to_string()),
            private_key: None,
            mail,
        }
    }

    #[test]
    fn groups_by_recipient_domain() {
        let units = shard(&request(vec![
            item("a@one.example", "1"),
            item("b@two.example", "2"),
            item("c@one.example", "3"),
        ]))
        .unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].to_host.as_str(), "one.example");
        assert_eq!(units[0].mail.len(), 2);
        assert_eq!(units[1].to_host.as_str(), "two.example");
        assert_eq!(units[1].mail.len(), 1);
    }

    #[test]
    fn chunks_at_one_hundred_items() {
        let mail: Vec<BulkItem> = (0..250)
            .map(|i| item(&format!("user{i}@big.example"), &i.to_string()))
            .collect();

        let units = shard(&request(mail)).unwrap();

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].mail.len(), 100);
        assert_eq!(units[1].mail.len(), 100);
        assert_eq!(units[2].mail.len(), 50);
    }

    #[test]
    fn concatenation_preserves_per_domain_order() {
        let mail: Vec<BulkItem> = (0..250)
            .map(|i| item(&format!("user{i}@big.example"), &i.to_string()))
            .collect();

        let units = shard(&request(mail)).unwrap();

        let subjects: Vec<&str> = units
            .iter()
            .flat_map(|unit| unit.mail.iter().map(|m| m.subject.as_str()))
            .collect();
        let expected: Vec<String> = (0..250).map(|i| i.to_string()).collect();
        assert_eq!(subjects, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn units_carry_sender_identity() {
        let mut request = request(vec![item("a@one.example", "1")]);
        request.private_key = Some("---key---".to_string());

        let units = shard(&request).unwrap();

        assert_eq!(units[0].from, "alice@example.com");
        assert_eq!(units[0].from_name, "Alice");
        assert_eq!(units[0].from_host.as_str(), "example.com");
        assert_eq!(units[0].private_key.as_deref(), Some("---key---"));
    }

    #[test]
    fn display_name_defaults_to_sender_local_part() {
        let mut request = request(vec![item("a@one.example", "1")]);
        request.from_name = None;

        let units = shard(&request).unwrap();
        assert_eq!(units[0].from_name, "alice");
    }

    #[test]
    fn invalid_sender_rejects_everything() {
        let mut request = request(vec![item("a@one.example", "1")]);
        request.from = "nodomain".to_string();

        assert_eq!(
            shard(&request),
            Err(AddressError::MissingSeparator("nodomain".to_string()))
        );
    }

    #[test]
    fn invalid_recipient_rejects_everything() {
        let units = shard(&request(vec![
            item("good@one.example", "1"),
            item("bad@", "2"),
        ]));
        assert!(units.is_err());
    }

    #[test]
    fn empty_request_yields_no_units() {
        assert_eq!(shard(&request(vec![])).unwrap(), vec![]);
    }
}
