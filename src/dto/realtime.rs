use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row change carried by a realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// Which change kinds a topic wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventMask {
    /// Every change kind.
    #[default]
    All,
    /// Only inserts.
    Insert,
    /// Only updates.
    Update,
    /// Only deletes.
    Delete,
}

impl EventMask {
    /// Wire representation used in subscription requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventMask::All => "*",
            EventMask::Insert => "INSERT",
            EventMask::Update => "UPDATE",
            EventMask::Delete => "DELETE",
        }
    }

    /// Whether a change of `kind` passes this mask.
    pub fn admits(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventMask::All, _)
                | (EventMask::Insert, ChangeKind::Insert)
                | (EventMask::Update, ChangeKind::Update)
                | (EventMask::Delete, ChangeKind::Delete)
        )
    }
}

/// Equality filter on one column, rendered as `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    /// Column compared against `value`.
    pub column: String,
    /// Expected column value, compared as text.
    pub value: String,
}

impl RowFilter {
    /// Build an equality filter.
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(text)) => *text == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Identity of a realtime subscription: table, optional row filter and event mask.
///
/// Two subscribers asking for equal topics share one transport channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Table whose changes are streamed.
    pub table: String,
    /// Optional row filter.
    pub filter: Option<RowFilter>,
    /// Change kinds of interest.
    pub events: EventMask,
}

impl Topic {
    /// Topic on every change of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            events: EventMask::All,
        }
    }

    /// Restrict the topic to rows matching `filter`.
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restrict the topic to some change kinds.
    pub fn with_events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }

    /// Whether `event` belongs to this topic.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.events.admits(event.kind) {
            return false;
        }

        let Some(filter) = &self.filter else {
            return true;
        };

        event
            .record
            .as_ref()
            .or(event.old_record.as_ref())
            .is_some_and(|row| filter.matches(row))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}[{}]:{}", self.table, filter, self.events.as_str()),
            None => write!(f, "{}:{}", self.table, self.events.as_str()),
        }
    }
}

/// A row change pushed by the realtime service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the row belongs to.
    pub table: String,
    /// Kind of change.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Row after the change (absent for deletes).
    #[serde(default)]
    pub record: Option<Value>,
    /// Row before the change, when the service provides it.
    #[serde(default)]
    pub old_record: Option<Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn change(table: &str, kind: ChangeKind, record: Value) -> ChangeEvent {
        ChangeEvent {
            table: table.into(),
            kind,
            record: Some(record),
            old_record: None,
        }
    }

    #[test]
    fn topic_filters_on_table_mask_and_row() {
        let topic = Topic::table("answers")
            .with_filter(RowFilter::eq("game_id", "g1"))
            .with_events(EventMask::Insert);

        assert!(topic.matches(&change("answers", ChangeKind::Insert, json!({"game_id": "g1"}))));
        assert!(!topic.matches(&change("answers", ChangeKind::Update, json!({"game_id": "g1"}))));
        assert!(!topic.matches(&change("answers", ChangeKind::Insert, json!({"game_id": "g2"}))));
        assert!(!topic.matches(&change("sessions", ChangeKind::Insert, json!({"game_id": "g1"}))));
    }

    #[test]
    fn delete_events_match_on_old_record() {
        let topic = Topic::table("participants").with_filter(RowFilter::eq("game_id", 7));
        let event = ChangeEvent {
            table: "participants".into(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({"game_id": 7})),
        };
        assert!(topic.matches(&event));
    }

    #[test]
    fn topic_display_is_stable() {
        let topic = Topic::table("sessions").with_filter(RowFilter::eq("id", "abc"));
        assert_eq!(topic.to_string(), "sessions[id=eq.abc]:*");
    }
}
