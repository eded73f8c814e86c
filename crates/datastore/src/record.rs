use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::crypto::KeyMaterial;
use crate::envelope;
use crate::error::{Error, Result};
use crate::patch;

/// One step of a record's backward-looking journal: `patch` applied to
/// the record's current `entry` yields the `entry` as it was before
/// the write at `created`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub created: DateTime<Utc>,
    pub patch: Value,
}

/// A stored credential record.
///
/// `entry` carries the kind-specific fields and is passed through
/// opaquely; a `login` entry has `username` and `password`. The field
/// order here is load-bearing: it is the top-level key order used for
/// telemetry field lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub entry: Value,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Caller-supplied fields for a new record; everything else is
/// assigned on add.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub entry: Value,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl Record {
    pub(crate) fn from_draft(draft: RecordDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            entry: draft.entry,
            origins: draft.origins,
            tags: draft.tags,
            created: now,
            modified: now,
            last_used: draft.last_used,
            history: Vec::new(),
        }
    }
}

/// Rejects entries the datastore cannot journal.
///
/// # Errors
/// Returns `INVALID` unless the entry is a JSON object.
pub(crate) fn validate_entry(entry: &Value) -> Result<()> {
    if entry.is_object() {
        Ok(())
    } else {
        Err(Error::invalid("record entry must be a JSON object"))
    }
}

/// Serializes a value with every object's keys sorted
/// lexicographically; list order is preserved. This byte form is what
/// gets encrypted, so equal records always produce equal plaintext.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&canonicalize(value))?)
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Encrypts a record to its persisted envelope text.
///
/// # Errors
/// Returns `CRYPTO` if sealing fails.
pub(crate) fn seal_record(key: &KeyMaterial, record: &Record) -> Result<String> {
    let value = serde_json::to_value(record)?;
    envelope::seal(key, &canonical_bytes(&value)?)
}

/// Decrypts and parses a persisted record blob.
///
/// # Errors
/// Returns `CRYPTO` on authentication failure and a serialization
/// error if the plaintext is not a record.
pub(crate) fn open_record(key: &KeyMaterial, blob: &[u8]) -> Result<Record> {
    let text = std::str::from_utf8(blob).map_err(|_| Error::crypto("malformed envelope"))?;
    let bytes = envelope::open(key, text)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// The dotted-path list of fields that differ between two versions of
/// a record, for the telemetry hook. Bookkeeping fields (`modified`,
/// `history`) are excluded. `None` when nothing else changed.
///
/// # Errors
/// Returns an error if either record fails to serialize.
pub(crate) fn changed_fields(old: &Record, new: &Record) -> Result<Option<String>> {
    let mut old_value = serde_json::to_value(old)?;
    let mut new_value = serde_json::to_value(new)?;
    for value in [&mut old_value, &mut new_value] {
        if let Value::Object(map) = value {
            map.remove("modified");
            map.remove("history");
        }
    }
    let diff = patch::diff(&new_value, &old_value);
    let paths = patch::field_paths(&diff, &new_value);
    if paths.is_empty() {
        Ok(None)
    } else {
        Ok(Some(paths.join(",")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::error::Reason;
    use serde_json::json;

    fn login_record(now: DateTime<Utc>) -> Record {
        Record::from_draft(
            RecordDraft {
                title: "My Item".into(),
                entry: json!({"kind": "login", "username": "foo", "password": "bar"}),
                origins: vec!["https://example.com".into()],
                ..RecordDraft::default()
            },
            now,
        )
    }

    #[test]
    fn test_from_draft_assigns_id_and_timestamps() {
        let now = Utc::now();
        let record = login_record(now);
        assert_eq!(record.id.len(), 36); // uuid v4, hyphenated
        assert_eq!(record.created, now);
        assert_eq!(record.modified, now);
        assert!(record.history.is_empty());
        assert!(record.last_used.is_none());
    }

    #[test]
    fn test_validate_entry_requires_object() {
        assert!(validate_entry(&json!({"kind": "login"})).is_ok());
        for bad in [json!(null), json!("text"), json!(7), json!([1, 2])] {
            let err = validate_entry(&bad).unwrap_err();
            assert_eq!(err.reason(), Some(Reason::Invalid));
        }
    }

    #[test]
    fn test_canonical_bytes_sorts_keys_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": 1, "y": [ {"q": 1, "p": 2} ]}});
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"y":[{"p":2,"q":1}],"z":1},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_bytes_is_insertion_order_independent() {
        let a = json!({"username": "foo", "password": "bar"});
        let b = json!({"password": "bar", "username": "foo"});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn test_seal_open_record_roundtrip() {
        let key = KeyMaterial::random();
        let record = login_record(Utc::now());
        let blob = seal_record(&key, &record).unwrap();
        let parsed = open_record(&key, blob.as_bytes()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_open_record_with_wrong_key_fails() {
        let record = login_record(Utc::now());
        let blob = seal_record(&KeyMaterial::random(), &record).unwrap();
        let err = open_record(&KeyMaterial::random(), blob.as_bytes()).unwrap_err();
        assert_eq!(err.reason(), Some(Reason::Crypto));
    }

    #[test]
    fn test_changed_fields_ignores_bookkeeping() {
        let now = Utc::now();
        let old = login_record(now);
        let mut new = old.clone();
        new.modified = now + chrono::Duration::seconds(5);
        new.history.push(HistoryEntry {
            created: new.modified,
            patch: json!({"password": "bar"}),
        });
        assert_eq!(changed_fields(&old, &new).unwrap(), None);

        new.entry["password"] = json!("baz");
        assert_eq!(
            changed_fields(&old, &new).unwrap().as_deref(),
            Some("entry.password")
        );
    }

    #[test]
    fn test_changed_fields_orders_title_before_entry() {
        let old = login_record(Utc::now());
        let mut new = old.clone();
        new.title = "Renamed".into();
        new.entry["username"] = json!("foo2");
        new.entry["password"] = json!("bar2");
        assert_eq!(
            changed_fields(&old, &new).unwrap().as_deref(),
            Some("title,entry.username,entry.password")
        );
    }
}
