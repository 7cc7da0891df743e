//! Conflict resolution policy.
//!
//! The policy is a pure decision function: given a record type, the local
//! record and the incoming remote change, it picks one of four strategies.
//! Timestamps are inputs; the policy never reads a clock.
//!
//! Rules, in order:
//! 1. Critical types always resolve `ServerWins`.
//! 2. Newer local → `ClientWins`; newer remote → `ServerWins`.
//! 3. Equal timestamps → `Merge` through the merger registered for the
//!    type, or `Manual` when there is none or it declines.

use crate::change::ServerChangeEvent;
use crate::record::{LocalRecord, Payload};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Field stamped on merged object payloads.
pub const MERGED_AT_FIELD: &str = "_merged_at";

/// Outcome chosen by a resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Remote payload overwrites the local one.
    ServerWins,
    /// Local payload is kept and pushed again.
    ClientWins,
    /// Both payloads are combined.
    Merge,
    /// A person has to decide.
    Manual,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ServerWins => "server_wins",
            Strategy::ClientWins => "client_wins",
            Strategy::Merge => "merge",
            Strategy::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// A policy decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Chosen strategy.
    pub strategy: Strategy,
    /// Merged payload, present for `Merge`.
    pub merged: Option<Payload>,
}

impl Resolution {
    /// Remote wins.
    pub fn server_wins() -> Self {
        Self {
            strategy: Strategy::ServerWins,
            merged: None,
        }
    }

    /// Local wins.
    pub fn client_wins() -> Self {
        Self {
            strategy: Strategy::ClientWins,
            merged: None,
        }
    }

    /// Deferred to a person.
    pub fn manual() -> Self {
        Self {
            strategy: Strategy::Manual,
            merged: None,
        }
    }

    /// Merged into `payload`.
    pub fn merge(payload: Payload) -> Self {
        Self {
            strategy: Strategy::Merge,
            merged: Some(payload),
        }
    }
}

/// A merge capability for one or more record types.
pub trait Merger: Send + Sync {
    /// Combines `local` and `remote`, stamping `merged_at` on the result.
    ///
    /// Returns `None` if the payloads cannot be merged, in which case the
    /// policy falls back to `Manual`.
    fn merge(&self, local: &Payload, remote: &Payload, merged_at: i64) -> Option<Payload>;
}

/// Flat shallow merge of object payloads.
///
/// The remote object is the base and local top-level fields override it.
/// Nested objects are replaced wholesale, not merged recursively, and
/// tombstones or non-object bodies are never merged. This is a deliberate
/// simplification, not a CRDT.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShallowMerge;

impl Merger for ShallowMerge {
    fn merge(&self, local: &Payload, remote: &Payload, merged_at: i64) -> Option<Payload> {
        let local = local.as_value()?.as_object()?;
        let mut merged = remote.as_value()?.as_object()?.clone();
        for (field, value) in local {
            merged.insert(field.clone(), value.clone());
        }
        merged.insert(MERGED_AT_FIELD.to_string(), merged_at.into());
        Some(Payload::Data(serde_json::Value::Object(merged)))
    }
}

/// Record types whose remote data always takes precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriticalTypes(BTreeSet<String>);

impl CriticalTypes {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type.
    pub fn insert(&mut self, record_type: impl Into<String>) {
        self.0.insert(record_type.into());
    }

    /// Returns true if `record_type` is critical.
    pub fn contains(&self, record_type: &str) -> bool {
        self.0.contains(record_type)
    }

    /// Iterates over the critical types in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the number of critical types.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no type is critical.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CriticalTypes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A conflict resolution policy.
pub trait ResolutionPolicy: Send + Sync {
    /// Decides how to reconcile `local` with `remote`.
    ///
    /// Implementations must be deterministic: identical inputs yield an
    /// identical resolution.
    fn resolve(
        &self,
        record_type: &str,
        local: &LocalRecord,
        remote: &ServerChangeEvent,
        merged_at: i64,
    ) -> Resolution;
}

/// The default policy: critical set, then timestamps, then merge.
#[derive(Clone, Default)]
pub struct ConflictPolicy {
    critical: CriticalTypes,
    mergers: BTreeMap<String, Arc<dyn Merger>>,
    default_merger: Option<Arc<dyn Merger>>,
}

impl ConflictPolicy {
    /// Creates a policy with the given critical types and no mergers.
    pub fn new(critical: CriticalTypes) -> Self {
        Self {
            critical,
            mergers: BTreeMap::new(),
            default_merger: None,
        }
    }

    /// Registers a merger for one record type.
    pub fn with_merger(mut self, record_type: impl Into<String>, merger: Arc<dyn Merger>) -> Self {
        self.mergers.insert(record_type.into(), merger);
        self
    }

    /// Registers the shallow merger for one record type.
    pub fn with_shallow_merge(self, record_type: impl Into<String>) -> Self {
        self.with_merger(record_type, Arc::new(ShallowMerge))
    }

    /// Sets the merger used for types without a specific one.
    pub fn with_default_merger(mut self, merger: Arc<dyn Merger>) -> Self {
        self.default_merger = Some(merger);
        self
    }

    /// Returns the critical types.
    pub fn critical_types(&self) -> &CriticalTypes {
        &self.critical
    }

    /// Returns true if `record_type` can be merged.
    pub fn can_merge(&self, record_type: &str) -> bool {
        self.merger_for(record_type).is_some()
    }

    fn merger_for(&self, record_type: &str) -> Option<&Arc<dyn Merger>> {
        self.mergers
            .get(record_type)
            .or(self.default_merger.as_ref())
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictPolicy")
            .field("critical", &self.critical)
            .field("mergers", &self.mergers.keys().collect::<Vec<_>>())
            .field("default_merger", &self.default_merger.is_some())
            .finish()
    }
}

impl ResolutionPolicy for ConflictPolicy {
    fn resolve(
        &self,
        record_type: &str,
        local: &LocalRecord,
        remote: &ServerChangeEvent,
        merged_at: i64,
    ) -> Resolution {
        if self.critical.contains(record_type) {
            return Resolution::server_wins();
        }

        if local.local_timestamp > remote.remote_timestamp {
            return Resolution::client_wins();
        }
        if local.local_timestamp < remote.remote_timestamp {
            return Resolution::server_wins();
        }

        self.merger_for(record_type)
            .and_then(|merger| merger.merge(&local.payload, &remote.data, merged_at))
            .map_or_else(Resolution::manual, Resolution::merge)
    }
}
