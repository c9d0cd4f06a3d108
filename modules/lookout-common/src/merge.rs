//! Field-level merge of a new capture into a stored record.
//!
//! Both capture channels observe overlapping data, so merging must be
//! commutative for complete observations: whatever order captures arrive in,
//! the stored record ends up equal to the newest one.
//!
//! Rules:
//! - A capture is *fresh* unless the stored record carries the ordering
//!   timestamp and the capture is older or has none.
//! - Fresh: every non-empty incoming field overwrites.
//! - Stale: incoming fields only fill fields the stored record lacks.
//! - Timestamps only ever move forward.

use chrono::{DateTime, Utc};

use crate::types::{ConnectionRecord, ConversationRecord};

pub trait Merge: Clone {
    /// Merge `incoming` into `self`. Returns true if `self` changed.
    fn merge_from(&mut self, incoming: &Self) -> bool;

    /// The record as first stored, with column defaults filled in. Later
    /// merges start from this, whichever store holds it.
    fn as_inserted(&self) -> Self {
        self.clone()
    }
}

impl Merge for ConnectionRecord {
    fn merge_from(&mut self, incoming: &Self) -> bool {
        let fresh = is_fresh(self.connected_at, incoming.connected_at);
        let mut changed = false;

        changed |= merge_field(&mut self.first_name, &incoming.first_name, fresh);
        changed |= merge_field(&mut self.last_name, &incoming.last_name, fresh);
        changed |= merge_field(&mut self.public_id, &incoming.public_id, fresh);
        changed |= merge_field(&mut self.hash_id, &incoming.hash_id, fresh);
        changed |= merge_field(&mut self.headline, &incoming.headline, fresh);
        changed |= merge_latest(&mut self.connected_at, incoming.connected_at);
        // `source` belongs to whoever inserted the row.

        changed
    }
}

impl Merge for ConversationRecord {
    fn as_inserted(&self) -> Self {
        Self {
            unread_count: Some(self.unread_count.unwrap_or(0).max(0)),
            is_group: Some(self.is_group.unwrap_or(false)),
            ..self.clone()
        }
    }

    fn merge_from(&mut self, incoming: &Self) -> bool {
        let fresh = is_fresh(self.last_activity_at, incoming.last_activity_at);
        let mut changed = false;

        changed |= merge_field(&mut self.hash_id, &incoming.hash_id, fresh);
        changed |= merge_field(&mut self.first_name, &incoming.first_name, fresh);
        changed |= merge_field(&mut self.last_name, &incoming.last_name, fresh);
        changed |= merge_field(&mut self.public_id, &incoming.public_id, fresh);
        changed |= merge_field(&mut self.unread_count, &incoming.unread_count, fresh);
        changed |= merge_field(&mut self.is_group, &incoming.is_group, fresh);
        changed |= merge_field(&mut self.last_message_text, &incoming.last_message_text, fresh);
        changed |= merge_field(
            &mut self.last_message_sender,
            &incoming.last_message_sender,
            fresh,
        );
        changed |= merge_field(&mut self.conversation_url, &incoming.conversation_url, fresh);
        changed |= merge_latest(
            &mut self.last_message_delivered_at,
            incoming.last_message_delivered_at,
        );
        changed |= merge_latest(&mut self.last_activity_at, incoming.last_activity_at);

        changed
    }
}

fn is_fresh(stored: Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) -> bool {
    match (stored, incoming) {
        (Some(stored), Some(incoming)) => incoming >= stored,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// Values that can be "present but empty" (a blank string).
trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for i32 {
    fn is_blank(&self) -> bool {
        false
    }
}

impl Blank for bool {
    fn is_blank(&self) -> bool {
        false
    }
}

fn merge_field<T: Blank + Clone + PartialEq>(
    stored: &mut Option<T>,
    incoming: &Option<T>,
    fresh: bool,
) -> bool {
    let Some(value) = incoming.as_ref().filter(|v| !v.is_blank()) else {
        return false;
    };
    let stored_blank = stored.as_ref().map_or(true, |v| v.is_blank());
    if !fresh && !stored_blank {
        return false;
    }
    if stored.as_ref() == Some(value) {
        return false;
    }
    *stored = Some(value.clone());
    true
}

fn merge_latest(stored: &mut Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) -> bool {
    match (*stored, incoming) {
        (_, None) => false,
        (Some(current), Some(new)) if new <= current => false,
        (_, Some(new)) => {
            *stored = Some(new);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 24, 6, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn conversation(at: i64, text: &str, unread: i32) -> ConversationRecord {
        ConversationRecord {
            hash_id: Some("ACoAAB".to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            public_id: Some("ada".to_string()),
            unread_count: Some(unread),
            is_group: Some(false),
            last_message_text: Some(text.to_string()),
            last_message_sender: Some("Ada Lovelace".to_string()),
            last_message_delivered_at: Some(t(at)),
            last_activity_at: Some(t(at)),
            conversation_url: Some("https://example.com/messaging/thread/2-abc".to_string()),
            ..ConversationRecord::new(7, "2-abc")
        }
    }

    #[test]
    fn inserted_conversation_gets_column_defaults() {
        let mut bare = ConversationRecord::new(7, "2-abc");
        bare.last_activity_at = Some(t(10));
        bare.unread_count = Some(-3);

        let mut stored = bare.as_inserted();
        assert_eq!(stored.unread_count, Some(0));
        assert_eq!(stored.is_group, Some(false));

        // A stale capture cannot fill a column that already holds its default.
        stored.merge_from(&conversation(5, "older", 4));
        assert_eq!(stored.unread_count, Some(0));
        assert_eq!(stored.is_group, Some(false));
    }

    #[test]
    fn stale_capture_never_regresses_last_activity() {
        let mut stored = conversation(10, "newest", 2);
        let changed = stored.merge_from(&conversation(5, "older", 1));

        assert!(!changed);
        assert_eq!(stored.last_activity_at, Some(t(10)));
        assert_eq!(stored.last_message_text.as_deref(), Some("newest"));
        assert_eq!(stored.unread_count, Some(2));
    }

    #[test]
    fn fresh_capture_overwrites_non_empty_fields() {
        let mut stored = conversation(5, "hello", 1);
        let changed = stored.merge_from(&conversation(10, "are you there?", 0));

        assert!(changed);
        assert_eq!(stored.last_activity_at, Some(t(10)));
        assert_eq!(stored.last_message_text.as_deref(), Some("are you there?"));
        assert_eq!(stored.unread_count, Some(0));
    }

    #[test]
    fn empty_incoming_fields_never_blank_stored_ones() {
        let mut stored = conversation(5, "hello", 1);
        let mut incoming = conversation(10, "", 1);
        incoming.first_name = None;
        incoming.public_id = Some("  ".to_string());

        stored.merge_from(&incoming);

        assert_eq!(stored.first_name.as_deref(), Some("Ada"));
        assert_eq!(stored.public_id.as_deref(), Some("ada"));
        assert_eq!(stored.last_message_text.as_deref(), Some("hello"));
        assert_eq!(stored.last_activity_at, Some(t(10)));
    }

    #[test]
    fn stale_capture_fills_gaps_only() {
        let mut stored = conversation(10, "newest", 2);
        stored.public_id = None;

        let changed = stored.merge_from(&conversation(5, "older", 9));

        assert!(changed);
        assert_eq!(stored.public_id.as_deref(), Some("ada"));
        assert_eq!(stored.unread_count, Some(2));
    }

    #[test]
    fn untimed_capture_is_stale_against_timed_record() {
        let mut stored = conversation(10, "newest", 2);
        let mut incoming = conversation(0, "no clock", 4);
        incoming.last_activity_at = None;
        incoming.last_message_delivered_at = None;

        assert!(!stored.merge_from(&incoming));
        assert_eq!(stored.last_message_text.as_deref(), Some("newest"));
    }

    #[test]
    fn identical_capture_is_unchanged() {
        let mut stored = conversation(10, "same", 1);
        assert!(!stored.merge_from(&conversation(10, "same", 1)));
    }

    #[test]
    fn any_arrival_order_converges_to_latest_capture() {
        let captures = [
            conversation(1, "one", 1),
            conversation(3, "three", 3),
            conversation(2, "two", 2),
        ];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for order in orders {
            let mut stored = captures[order[0]].clone();
            for &i in &order[1..] {
                stored.merge_from(&captures[i]);
            }
            assert_eq!(stored, captures[1], "order {order:?}");
        }
    }

    #[test]
    fn connection_source_is_sticky() {
        let mut stored = ConnectionRecord {
            source: crate::types::ConnectionSource::Discovered,
            connected_at: Some(t(1)),
            ..ConnectionRecord::new(7, "123")
        };
        let incoming = ConnectionRecord {
            headline: Some("Engineer".to_string()),
            connected_at: Some(t(2)),
            ..ConnectionRecord::new(7, "123")
        };

        assert!(stored.merge_from(&incoming));
        assert_eq!(stored.source, crate::types::ConnectionSource::Discovered);
        assert_eq!(stored.headline.as_deref(), Some("Engineer"));
        assert_eq!(stored.connected_at, Some(t(2)));
    }

    #[test]
    fn connection_timestamp_is_monotonic() {
        let mut stored = ConnectionRecord {
            headline: Some("Engineer".to_string()),
            connected_at: Some(t(5)),
            ..ConnectionRecord::new(7, "123")
        };
        let stale = ConnectionRecord {
            headline: Some("Intern".to_string()),
            connected_at: Some(t(1)),
            ..ConnectionRecord::new(7, "123")
        };

        assert!(!stored.merge_from(&stale));
        assert_eq!(stored.connected_at, Some(t(5)));
        assert_eq!(stored.headline.as_deref(), Some("Engineer"));
    }
}
