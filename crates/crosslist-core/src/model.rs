//! Records kept for both sides of a list pair

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque side-specific metadata carried alongside a side-A item.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// One of the two systems being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl Side {
    /// The side on the other end of a link.
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Store-assigned identifier of a side-A row
    ItemAId
);
row_id!(
    /// Store-assigned identifier of a side-B row
    ItemBId
);
row_id!(
    /// Store-assigned identifier of a link row
    LinkId
);

/// An item as reported by an external system's fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub external_id: String,
    pub name: String,
    pub checked: bool,
    /// Modification time reported by the system, if it reports one
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl RemoteItem {
    pub fn new(external_id: impl Into<String>, name: impl Into<String>, checked: bool) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            checked,
            timestamp: None,
            attributes: Attributes::new(),
        }
    }

    /// Set the reported modification time
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach an opaque attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Side-A record.
///
/// Side A does not report trustworthy modification times, so the store derives
/// them: `last_seen_at` moves on every observation, `last_modified_at` only
/// when `name` or `checked` actually changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemA {
    pub id: ItemAId,
    pub external_id: String,
    pub list_id: String,
    pub name: String,
    pub checked: bool,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Side-B record. `updated_at` comes straight from side B.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemB {
    pub id: ItemBId,
    pub external_id: String,
    pub list_id: String,
    pub name: String,
    pub checked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    /// Only ever set when side-B tombstoning is enabled
    pub is_deleted: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Persisted correspondence between one A item and one B item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub item_a_id: ItemAId,
    pub item_b_id: ItemBId,
    pub confidence: f64,
    pub linked_at: DateTime<Utc>,
}

/// A link joined with both of its items.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkView {
    pub link: Link,
    pub item_a: ItemA,
    pub item_b: ItemB,
}

impl LinkView {
    pub fn in_conflict(&self) -> bool {
        self.item_a.checked != self.item_b.checked
    }

    /// Key used to look the pair up in a pre-pass snapshot
    pub fn snapshot_key(&self) -> (String, String) {
        (
            self.item_a.external_id.clone(),
            self.item_b.external_id.clone(),
        )
    }
}

/// Checked values of a linked pair at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairState {
    pub checked_a: bool,
    pub checked_b: bool,
}

/// Checked values of every linked pair, keyed by `(external_id_a, external_id_b)`.
pub type Snapshot = BTreeMap<(String, String), PairState>;

/// Kind of entry in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Conflict,
    Link,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Conflict => "CONFLICT",
            OperationKind::Link => "LINK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(OperationKind::Create),
            "UPDATE" => Some(OperationKind::Update),
            "DELETE" => Some(OperationKind::Delete),
            "CONFLICT" => Some(OperationKind::Conflict),
            "LINK" => Some(OperationKind::Link),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: i64,
    pub operation: OperationKind,
    pub item_a_id: Option<ItemAId>,
    pub item_b_id: Option<ItemBId>,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_round_trip() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
            OperationKind::Conflict,
            OperationKind::Link,
        ] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::parse("MERGE"), None);
    }

    #[test]
    fn side_other() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other(), Side::A);
        assert_eq!(Side::B.to_string(), "B");
    }

    #[test]
    fn remote_item_builder() {
        let item = RemoteItem::new("p-1", "Milk", false)
            .with_attribute("aisle", serde_json::json!("Dairy"));
        assert_eq!(item.attributes["aisle"], serde_json::json!("Dairy"));
        assert!(item.timestamp.is_none());
    }
}
