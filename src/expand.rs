//! Usage expansion
//!
//! Resolves the pool references of a usage into their human-readable
//! payloads. A reference that cannot be resolved stays identifier-only and is
//! reported on the enriched usage; it never fails the expansion.

use crate::codec::CompositeUsageId;
use crate::error::TnuError;
use crate::pools::{readable_payload, PoolService, PoolSet};
use crate::record::{PoolKind, PooledRecord};
use crate::store::RecordStream;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A foreign id with its payload, if it could be resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRef {
    pub id: String,
    pub payload: Option<String>,
}

impl ResolvedRef {
    pub fn is_resolved(&self) -> bool {
        self.payload.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionFailure {
    pub pool: PoolKind,
    pub id: String,
    pub reason: String,
}

impl From<ResolutionFailure> for TnuError {
    fn from(f: ResolutionFailure) -> Self {
        TnuError::PartialResolutionFailure {
            pool: f.pool,
            id: f.id,
            reason: f.reason,
        }
    }
}

/// A usage record together with its resolved references
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedUsage {
    pub record: PooledRecord,
    pub name_string: Option<ResolvedRef>,
    pub taxon_name: Option<ResolvedRef>,
    pub reference: Option<ResolvedRef>,
    pub failures: Vec<ResolutionFailure>,
}

impl EnrichedUsage {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether a reference into this pool could not be resolved
    pub fn unresolved(&self, pool: PoolKind) -> bool {
        self.failures.iter().any(|f| f.pool == pool)
    }

    pub fn to_structured(&self) -> Value {
        let reference = |r: &Option<ResolvedRef>| match r {
            Some(r) => json!({ "id": r.id, "payload": r.payload, "resolved": r.is_resolved() }),
            None => Value::Null,
        };
        json!({
            "id": self.record.id,
            "usage": self.record.content,
            "canonicalId": self.record.canonical_id,
            "deleted": self.record.deleted,
            "nameString": reference(&self.name_string),
            "taxonName": reference(&self.taxon_name),
            "bibRef": reference(&self.reference),
            "unresolved": self.failures.iter().map(|f| f.pool.label()).collect::<Vec<_>>(),
        })
    }
}

/// Expands usages against the three foreign pools
#[derive(Clone)]
pub struct Expander {
    pools: PoolSet,
    timeout: Duration,
}

impl Expander {
    pub fn new(pools: PoolSet, timeout: Duration) -> Self {
        Self { pools, timeout }
    }

    pub async fn expand(&self, record: &PooledRecord) -> EnrichedUsage {
        let mut enriched = EnrichedUsage {
            record: record.clone(),
            name_string: None,
            taxon_name: None,
            reference: None,
            failures: Vec::new(),
        };

        let usage = match CompositeUsageId::decode(&record.content) {
            Ok(usage) => usage,
            Err(e) => {
                warn!(id = %record.id, "Cannot expand usage: {}", e);
                enriched.failures.push(ResolutionFailure {
                    pool: PoolKind::Usage,
                    id: record.id.clone(),
                    reason: e.to_string(),
                });
                return enriched;
            }
        };

        let taxon_name = async {
            match usage.qualified_name_id() {
                Some(id) => Some(self.resolve(&self.pools.taxon_names, id).await),
                None => None,
            }
        };
        let (name_string, taxon_name, reference) = tokio::join!(
            self.resolve(&self.pools.name_strings, usage.name_id()),
            taxon_name,
            self.resolve(&self.pools.references, usage.ref_id()),
        );

        for (slot, resolved) in [
            (&mut enriched.name_string, Some(name_string)),
            (&mut enriched.taxon_name, taxon_name),
            (&mut enriched.reference, Some(reference)),
        ] {
            if let Some((resolved, failure)) = resolved {
                *slot = Some(resolved);
                enriched.failures.extend(failure);
            }
        }
        enriched
    }

    async fn resolve(&self, pool: &Arc<dyn PoolService>, id: &str) -> (ResolvedRef, Option<ResolutionFailure>) {
        let outcome = tokio::time::timeout(self.timeout, pool.resolve(id)).await;
        let failure = |reason: String| {
            warn!(pool = %pool.kind(), id = %id, "Reference left unresolved: {}", reason);
            Some(ResolutionFailure {
                pool: pool.kind(),
                id: id.to_string(),
                reason,
            })
        };
        let (payload, failure) = match outcome {
            Ok(Ok(Some(record))) => (Some(readable_payload(&record)), None),
            Ok(Ok(None)) => (None, failure("not found".to_string())),
            Ok(Err(e)) => (None, failure(e.to_string())),
            Err(_) => (None, failure(format!("timed out after {} ms", self.timeout.as_millis()))),
        };
        (
            ResolvedRef {
                id: id.to_string(),
                payload,
            },
            failure,
        )
    }

    /// Wrap a search result; each usage is expanded when it is consumed
    pub fn stream(&self, inner: RecordStream) -> ExpandedStream {
        ExpandedStream {
            inner,
            expander: self.clone(),
        }
    }
}

/// Lazily expanded search result
pub struct ExpandedStream {
    inner: RecordStream,
    expander: Expander,
}

impl ExpandedStream {
    pub async fn next(&mut self) -> Option<EnrichedUsage> {
        let record = self.inner.next()?;
        Some(self.expander.expand(&record).await)
    }

    pub fn error(&self) -> Option<&TnuError> {
        self.inner.error()
    }

    /// Usages not yet expanded
    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    pub async fn collect_all(mut self) -> (Vec<EnrichedUsage>, Option<TnuError>) {
        let mut usages = Vec::with_capacity(self.remaining());
        while let Some(usage) = self.next().await {
            usages.push(usage);
        }
        let (_, error) = self.inner.into_parts();
        (usages, error)
    }
}
