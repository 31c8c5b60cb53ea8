//! Pooled records
//!
//! Every pool stores the same record shape: immutable content keyed by its
//! derived id, an optional structured payload with its checksum, a canonical
//! alias, audit fields and a soft-delete flag.

use crate::codec;
use crate::error::{Result, TnuError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// The four pools a usage bank deals with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Verbatim name strings (pool 1)
    NameString,
    /// Fully qualified taxon names (pool 2)
    TaxonName,
    /// Bibliographic references (pool 3)
    Reference,
    /// Taxon name usages (the local pool)
    Usage,
}

impl PoolKind {
    pub fn label(self) -> &'static str {
        match self {
            PoolKind::NameString => "name string",
            PoolKind::TaxonName => "taxon name",
            PoolKind::Reference => "bibliographic reference",
            PoolKind::Usage => "taxon name usage",
        }
    }

    /// Pools whose records are only accepted together with a structured payload
    pub fn requires_structured(self) -> bool {
        matches!(self, PoolKind::TaxonName | PoolKind::Reference)
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Content offered to a pool for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    /// Plain content; the record id is derived from it
    pub content: String,

    /// Structured payload, cross-validated against the plain content
    #[serde(default)]
    pub structured: Option<Value>,

    /// Classification of the content (e.g. the rank of a taxon name)
    #[serde(default)]
    pub string_type: Option<String>,
}

impl Upload {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured: None,
            string_type: None,
        }
    }

    pub fn structured(content: impl Into<String>, structured: Value) -> Self {
        Self {
            content: content.into(),
            structured: Some(structured),
            string_type: None,
        }
    }

    pub fn with_type(mut self, string_type: impl Into<String>) -> Self {
        self.string_type = Some(string_type.into());
        self
    }
}

/// A record as stored by any pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledRecord {
    pub id: String,

    /// Id of the preferred equivalent record; empty when self-canonical
    #[serde(default)]
    pub canonical_id: String,

    pub content: String,

    #[serde(default)]
    pub structured_content: Option<String>,

    /// Checksum of `structured_content`
    #[serde(default)]
    pub checksum: Option<String>,

    #[serde(default)]
    pub string_type: Option<String>,

    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,

    /// Last time this node changed the record
    pub local_updated_at: DateTime<Utc>,

    #[serde(default)]
    pub deleted: bool,
}

impl PooledRecord {
    /// Build a freshly accepted record; the upload must have passed [`validate_upload`]
    pub fn accept(id: String, upload: &Upload, user: &str, now: DateTime<Utc>) -> Result<Self> {
        let structured_content = upload
            .structured
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let checksum = structured_content.as_deref().map(checksum);

        Ok(Self {
            id,
            canonical_id: String::new(),
            content: upload.content.clone(),
            structured_content,
            checksum,
            string_type: upload.string_type.clone(),
            created_at: now,
            created_by: user.to_string(),
            updated_at: now,
            updated_by: user.to_string(),
            local_updated_at: now,
            deleted: false,
        })
    }

    pub fn is_self_canonical(&self) -> bool {
        self.canonical_id.is_empty() || self.canonical_id == self.id
    }

    /// Parsed structured payload, if any
    pub fn structured(&self) -> Option<Value> {
        self.structured_content
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Verify the stored checksum against the stored structured payload
    pub fn checksum_matches(&self) -> bool {
        match (&self.structured_content, &self.checksum) {
            (Some(s), Some(c)) => verify_checksum(s, c),
            (None, None) => true,
            _ => false,
        }
    }

    /// Point this record at a canonical alias. Returns whether anything changed.
    pub fn set_canonical(&mut self, canonical_id: &str, user: &str, now: DateTime<Utc>) -> bool {
        let canonical_id = if canonical_id == self.id { "" } else { canonical_id };
        if self.canonical_id == canonical_id {
            return false;
        }
        self.canonical_id = canonical_id.to_string();
        self.touch(user, now);
        true
    }

    /// Flip the soft-delete flag. Returns whether anything changed.
    pub fn set_deleted(&mut self, deleted: bool, user: &str, now: DateTime<Utc>) -> bool {
        if self.deleted == deleted {
            return false;
        }
        self.deleted = deleted;
        self.touch(user, now);
        true
    }

    fn touch(&mut self, user: &str, now: DateTime<Utc>) {
        self.updated_at = now;
        self.updated_by = user.to_string();
        self.local_updated_at = now;
    }
}

/// Shape gate: usages must be composite identifiers, structured pools need a
/// structured payload, and nothing accepts blank content.
pub fn check_shape(kind: PoolKind, upload: &Upload) -> Result<()> {
    if upload.content.trim().is_empty() {
        return Err(TnuError::ValidationFailed(format!(
            "{} content must not be empty",
            kind
        )));
    }
    match kind {
        PoolKind::Usage if !codec::is_valid(&upload.content) => Err(TnuError::ValidationFailed(
            format!("'{}' is not a taxon name usage identifier", upload.content),
        )),
        k if k.requires_structured() && upload.structured.is_none() => Err(
            TnuError::ValidationFailed(format!("{} uploads require a structured payload", k)),
        ),
        _ => Ok(()),
    }
}

/// Consistency gate: every token of the structured payload occurs in the plain content
pub fn check_consistency(plain: &str, structured: &Value) -> Result<()> {
    for token in structured_tokens(structured) {
        if !plain.contains(&token) {
            return Err(TnuError::ValidationFailed(format!(
                "structured payload is inconsistent with plain content: '{}' is not a part of '{}'",
                token, plain
            )));
        }
    }
    Ok(())
}

/// Run both validation gates
pub fn validate_upload(kind: PoolKind, upload: &Upload) -> Result<()> {
    check_shape(kind, upload)?;
    if let Some(structured) = &upload.structured {
        check_consistency(&upload.content, structured)?;
    }
    Ok(())
}

/// Whitespace-separated tokens of all leaf values; keys are markup, not content
pub fn structured_tokens(structured: &Value) -> Vec<String> {
    let mut tokens = Vec::new();
    collect_tokens(structured, &mut tokens);
    tokens
}

fn collect_tokens(value: &Value, tokens: &mut Vec<String>) {
    match value {
        Value::String(s) => tokens.extend(s.split_whitespace().map(str::to_string)),
        Value::Number(n) => tokens.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, tokens)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, tokens)),
        Value::Bool(_) | Value::Null => {}
    }
}

/// Hex SHA-256 of a structured payload
pub fn checksum(structured: &str) -> String {
    format!("{:x}", Sha256::digest(structured.as_bytes()))
}

pub fn verify_checksum(structured: &str, expected: &str) -> bool {
    checksum(structured).eq_ignore_ascii_case(expected)
}

/// 32-bit string hash used to pre-filter id equality in index joins
pub fn id_hash(id: &str) -> i32 {
    id.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// Epoch milliseconds, as persisted
pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
