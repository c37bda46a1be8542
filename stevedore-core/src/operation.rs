//! The item operation model.
//!
//! An [`ItemOperation`] is the unit of work a caller submits: an operation
//! kind, an item id, an optional partition key, per-operation options, and an
//! opaque JSON payload. The payload is serialized exactly once via
//! [`ItemOperation::materialize`]; after that the body length is final and
//! the operation may be placed into batches sequentially (on retry) but
//! never concurrently.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of a single item operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Insert a new item; fails if the id already exists.
    Create,
    /// Point-read an item by id.
    Read,
    /// Replace an existing item.
    Replace,
    /// Insert or replace an item.
    Upsert,
    /// Delete an item by id.
    Delete,
    /// Apply a partial update to an item.
    Patch,
}

impl OperationKind {
    /// Returns a short name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Replace => "replace",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Patch => "patch",
        }
    }

    /// Returns true if this kind carries a document payload.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        !matches!(self, Self::Read | Self::Delete)
    }
}

/// Partition key value attached to an operation.
///
/// [`PartitionKey::None`] is the explicit "no partition key" sentinel. It is
/// distinct from leaving the key unset on the operation: an unset key is
/// resolved through the metadata collaborator, while the sentinel routes
/// like any other concrete value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionKey {
    /// A string key.
    Text(String),
    /// A numeric key.
    Number(f64),
    /// A boolean key.
    Boolean(bool),
    /// An explicit JSON null key.
    Null,
    /// The explicit "no partition key" sentinel.
    None,
}

impl PartitionKey {
    /// Returns an unambiguous byte encoding of this key for hashing.
    ///
    /// Each variant gets its own tag byte so `Null`, `None`, and the empty
    /// string never collide.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            Self::Text(s) => {
                out.push(0x01);
                out.extend_from_slice(s.as_bytes());
            }
            Self::Number(n) => {
                out.push(0x02);
                out.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            Self::Boolean(b) => {
                out.push(0x03);
                out.push(u8::from(*b));
            }
            Self::Null => out.push(0x04),
            Self::None => out.push(0x05),
        }
        out
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for PartitionKey {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Consistency level override on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// Linearizable reads.
    Strong,
    /// Reads lag writes by a bounded amount.
    BoundedStaleness,
    /// Session-scoped read-your-writes.
    Session,
    /// Reads observe a consistent prefix of writes.
    ConsistentPrefix,
    /// No ordering guarantee.
    Eventual,
}

/// Per-operation request options.
///
/// The bulk path supports etag preconditions only; consistency overrides,
/// triggers, and session tokens are rejected up front by
/// [`ItemOptions::ensure_bulk_compatible`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOptions {
    /// Fail the operation unless the stored etag matches.
    pub if_match_etag: Option<String>,
    /// Fail the operation if the stored etag matches.
    pub if_none_match_etag: Option<String>,
    /// Consistency level override (unsupported in bulk).
    pub consistency_level: Option<ConsistencyLevel>,
    /// Session token (unsupported in bulk).
    pub session_token: Option<String>,
    /// Pre-operation triggers (unsupported in bulk).
    pub pre_triggers: Vec<String>,
    /// Post-operation triggers (unsupported in bulk).
    pub post_triggers: Vec<String>,
}

impl ItemOptions {
    /// Sets the if-match etag precondition.
    #[must_use]
    pub fn with_if_match_etag(mut self, etag: impl Into<String>) -> Self {
        self.if_match_etag = Some(etag.into());
        self
    }

    /// Rejects option combinations the bulk path cannot honor.
    ///
    /// # Errors
    /// Returns [`Error::InvalidUsage`] naming the offending option.
    pub fn ensure_bulk_compatible(&self) -> Result<()> {
        if self.consistency_level.is_some() {
            return Err(Error::invalid_usage(
                "consistency level overrides are not supported in bulk",
            ));
        }
        if self.session_token.is_some() {
            return Err(Error::invalid_usage(
                "session tokens are not supported in bulk",
            ));
        }
        if !self.pre_triggers.is_empty() || !self.post_triggers.is_empty() {
            return Err(Error::invalid_usage("triggers are not supported in bulk"));
        }
        Ok(())
    }
}

/// Serializes an operation's payload into its wire body.
///
/// Implementations must be deterministic: the engine serializes each
/// operation exactly once and reuses the bytes across retries.
pub trait PayloadSerializer: Send + Sync {
    /// Serializes the operation's payload.
    ///
    /// # Errors
    /// Returns an error if the payload is malformed or missing for a kind
    /// that requires one.
    fn serialize(&self, operation: &ItemOperation) -> Result<Bytes>;
}

/// Default serializer: compact JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl PayloadSerializer for JsonSerializer {
    fn serialize(&self, operation: &ItemOperation) -> Result<Bytes> {
        match operation.payload() {
            Some(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| Error::Serialization {
                    message: e.to_string(),
                }),
            None if operation.kind.carries_payload() => Err(Error::invalid_usage(format!(
                "{} operations require a payload",
                operation.kind.as_str()
            ))),
            None => Ok(Bytes::new()),
        }
    }
}

/// A single item operation submitted by a caller.
#[derive(Debug, Clone)]
pub struct ItemOperation {
    /// What to do with the item.
    pub kind: OperationKind,
    /// The item id.
    pub item_id: String,
    /// The partition key, or `None` to resolve it via the metadata
    /// collaborator (distinct from the explicit [`PartitionKey::None`]
    /// sentinel).
    pub partition_key: Option<PartitionKey>,
    /// Per-operation options.
    pub options: ItemOptions,
    /// The document payload, if the kind carries one.
    payload: Option<serde_json::Value>,
    /// Serialized body, set once by [`ItemOperation::materialize`].
    body: Option<Bytes>,
}

impl ItemOperation {
    /// Creates a new operation.
    #[must_use]
    pub fn new(kind: OperationKind, item_id: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
            partition_key: None,
            options: ItemOptions::default(),
            payload: None,
            body: None,
        }
    }

    /// Sets the document payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the partition key.
    #[must_use]
    pub fn with_partition_key(mut self, key: impl Into<PartitionKey>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Sets the per-operation options.
    #[must_use]
    pub fn with_options(mut self, options: ItemOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Serializes the payload into the operation body.
    ///
    /// Idempotent: the body is computed once and the cached bytes are reused
    /// on every subsequent call. Returns the body length.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn materialize(&mut self, serializer: &dyn PayloadSerializer) -> Result<usize> {
        if self.body.is_none() {
            self.body = Some(serializer.serialize(self)?);
        }
        Ok(self.body_len())
    }

    /// Returns the serialized body, if materialized.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Returns the serialized body length, or 0 if not yet materialized.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_materialize_is_idempotent() {
        let mut op = ItemOperation::new(OperationKind::Create, "item-1")
            .with_payload(json!({"id": "item-1", "value": 7}));

        let first = op.materialize(&JsonSerializer).unwrap();
        let bytes = op.body().unwrap().clone();
        let second = op.materialize(&JsonSerializer).unwrap();

        assert_eq!(first, second);
        assert_eq!(op.body().unwrap(), &bytes);
    }

    #[test]
    fn test_read_materializes_empty_body() {
        let mut op = ItemOperation::new(OperationKind::Read, "item-1");
        let len = op.materialize(&JsonSerializer).unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_create_without_payload_is_rejected() {
        let mut op = ItemOperation::new(OperationKind::Create, "item-1");
        let err = op.materialize(&JsonSerializer).unwrap_err();
        assert!(matches!(err, Error::InvalidUsage { .. }));
    }

    #[test]
    fn test_bulk_incompatible_options() {
        let session = ItemOptions {
            session_token: Some("token".to_string()),
            ..ItemOptions::default()
        };
        assert!(session.ensure_bulk_compatible().is_err());

        let consistency = ItemOptions {
            consistency_level: Some(ConsistencyLevel::Strong),
            ..ItemOptions::default()
        };
        assert!(consistency.ensure_bulk_compatible().is_err());

        let triggers = ItemOptions {
            pre_triggers: vec!["validate".to_string()],
            ..ItemOptions::default()
        };
        assert!(triggers.ensure_bulk_compatible().is_err());

        let etag = ItemOptions::default().with_if_match_etag("\"abc\"");
        assert!(etag.ensure_bulk_compatible().is_ok());
    }

    #[test]
    fn test_canonical_bytes_are_distinct() {
        let null = PartitionKey::Null.canonical_bytes();
        let none = PartitionKey::None.canonical_bytes();
        let empty = PartitionKey::Text(String::new()).canonical_bytes();

        assert_ne!(null, none);
        assert_ne!(null, empty);
        assert_ne!(none, empty);
    }

    #[test]
    fn test_kind_payload_rules() {
        assert!(OperationKind::Create.carries_payload());
        assert!(OperationKind::Upsert.carries_payload());
        assert!(OperationKind::Patch.carries_payload());
        assert!(!OperationKind::Read.carries_payload());
        assert!(!OperationKind::Delete.carries_payload());
    }
}
