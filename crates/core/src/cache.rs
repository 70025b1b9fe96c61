use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use moka::sync::Cache;

use crate::approvals::views::{
    EntityApprovalStatus, PendingApprovals, RequestDetail, RequestFilter,
};
use crate::domain::approval::{ApprovalAction, ApprovalId, ApprovalRequest};
use crate::domain::entity::EntityRef;

pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Identity of a cached read: the operation plus its parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Request(ApprovalId),
    History(ApprovalId),
    Pending(String),
    Requests(RequestFilter),
    CanApprove(ApprovalId, String),
    EntityStatus(EntityRef, String),
}

impl QueryKey {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::History(_) => "history",
            Self::Pending(_) => "pending",
            Self::Requests(_) => "requests",
            Self::CanApprove(..) => "can_approve",
            Self::EntityStatus(..) => "entity_status",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CachedQuery {
    Request(RequestDetail),
    History(Vec<ApprovalAction>),
    Pending(PendingApprovals),
    Requests(Vec<ApprovalRequest>),
    CanApprove(bool),
    EntityStatus(EntityApprovalStatus),
}

/// A committed write, described by what it touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// approve, approve with conditions, reject or cancel.
    Transition { request_id: ApprovalId, entity: EntityRef },
    Comment { request_id: ApprovalId },
    Submit { entity: EntityRef },
}

impl Mutation {
    /// The declared invalidation set for this write.
    pub fn invalidates(&self, key: &QueryKey) -> bool {
        match self {
            Self::Transition { request_id, entity } => match key {
                QueryKey::Request(id) | QueryKey::History(id) | QueryKey::CanApprove(id, _) => {
                    id == request_id
                }
                QueryKey::Pending(_) | QueryKey::Requests(_) => true,
                QueryKey::EntityStatus(cached, _) => cached == entity,
            },
            Self::Comment { request_id } => {
                matches!(key, QueryKey::History(id) if id == request_id)
            }
            Self::Submit { entity } => match key {
                QueryKey::Pending(_) | QueryKey::Requests(_) => true,
                QueryKey::EntityStatus(cached, _) => cached == entity,
                _ => false,
            },
        }
    }
}

/// Invalidation generation observed before a read went to the store.
///
/// A result is only cached when no mutation committed in between, so a slow
/// read can never put a pre-mutation value back after its invalidation ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadTicket(u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub invalidated: u64,
    pub stale_skipped: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidated: AtomicU64,
    stale_skipped: AtomicU64,
}

/// Read-through cache for approval queries, bounded by entry count.
/// Disabled caches never store.
#[derive(Clone)]
pub struct QueryCache {
    enabled: bool,
    entries: Cache<QueryKey, CachedQuery>,
    generation: Arc<Mutex<u64>>,
    counters: Arc<Counters>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl QueryCache {
    pub fn new(enabled: bool) -> Self {
        Self::bounded(enabled, DEFAULT_MAX_ENTRIES)
    }

    pub fn bounded(enabled: bool, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .support_invalidation_closures()
            .build();
        Self {
            enabled,
            entries,
            generation: Arc::new(Mutex::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
        if !self.enabled {
            return None;
        }
        let value = self.entries.get(key);
        let counter = if value.is_some() { &self.counters.hits } else { &self.counters.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Take before reading from the store; hand back to [`QueryCache::insert`].
    pub fn ticket(&self) -> ReadTicket {
        ReadTicket(*self.generation())
    }

    /// Stores `value` unless a mutation committed since `ticket` was taken.
    /// Returns whether the value was stored.
    pub fn insert(&self, ticket: ReadTicket, key: QueryKey, value: CachedQuery) -> bool {
        if !self.enabled {
            return false;
        }
        let generation = self.generation();
        if *generation != ticket.0 {
            self.counters.stale_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_name = "approval.cache.stale_read_skipped",
                operation = key.operation(),
                "read overlapped a committed write; result not cached"
            );
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    /// Drops every entry in the mutation's invalidation set and returns how many matched.
    pub fn invalidate(&self, mutation: &Mutation) -> usize {
        let mut generation = self.generation();
        *generation += 1;
        if !self.enabled {
            return 0;
        }

        let mut operations = BTreeSet::new();
        let matched = self
            .entries
            .iter()
            .filter(|(key, _)| mutation.invalidates(key))
            .inspect(|(key, _)| {
                operations.insert(key.operation());
            })
            .count();

        let predicate = mutation.clone();
        if let Err(error) =
            self.entries.invalidate_entries_if(move |key, _| predicate.invalidates(key))
        {
            tracing::warn!(
                event_name = "approval.cache.predicate_rejected",
                error = %error,
                "falling back to clearing the whole query cache"
            );
            self.entries.invalidate_all();
        }
        drop(generation);

        self.counters.invalidated.fetch_add(matched as u64, Ordering::Relaxed);
        if matched > 0 {
            tracing::debug!(
                event_name = "approval.cache.invalidated",
                mutation = ?mutation,
                operations = ?operations,
                removed = matched,
                "query cache entries invalidated"
            );
        }
        matched
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();
        CacheStats {
            entries: self.entries.entry_count(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
            stale_skipped: self.counters.stale_skipped.load(Ordering::Relaxed),
        }
    }

    fn generation(&self) -> MutexGuard<'_, u64> {
        match self.generation.lock() {
            Ok(generation) => generation,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
