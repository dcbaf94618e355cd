//! Retry ledgers persisted in object annotations.
//!
//! A reconciler that drives a slow or flaky action (creating a cloud VM,
//! waiting on a DNS record) needs to remember how often it has tried and
//! when. Keeping that bookkeeping in the object's own annotations means it
//! survives operator restarts and needs no extra storage: the reconciler
//! reads it from the object it was handed and writes it back with the rest
//! of its changes.
//!
//! Each ledger is a JSON document stored under an annotation key equal to the
//! ledger name, so independent ledgers on the same object never collide.
//!
//! # Example
//!
//! ```ignore
//! use provisioner_common::retry::RetryLedger;
//! use provisioner_common::clock::SystemClock;
//!
//! let ledger = RetryLedger::new("provision-instance", 5).with_backoff(Duration::from_secs(30));
//!
//! if ledger.exhausted(vm.meta())? {
//!     return Ok(Action::await_change());
//! }
//! if !ledger.eligible_now(vm.meta(), &SystemClock)? {
//!     let wait = ledger.time_until_eligible(vm.meta(), &SystemClock)?;
//!     return Ok(Action::requeue(wait.unwrap_or_default()));
//! }
//!
//! match provision(&vm).await {
//!     Ok(()) => ledger.success(vm.meta_mut(), &SystemClock)?,
//!     Err(e) => ledger.failure_with(vm.meta_mut(), &SystemClock, format!("provision failed: {e}"))?,
//! };
//! api.replace(&name, &PostParams::default(), &vm).await?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::{Error, Result};

/// Storage substrate for retry ledgers: a string-keyed metadata map.
///
/// Implemented for Kubernetes `ObjectMeta` (annotations) and for a bare map.
/// For a kube resource, pass `obj.meta()` / `obj.meta_mut()`.
pub trait Taggable {
    /// The current map, if the object has one
    fn tags(&self) -> Option<&BTreeMap<String, String>>;

    /// Mutable access to the map, creating it when the object has none
    fn tags_mut(&mut self) -> &mut BTreeMap<String, String>;
}

impl Taggable for ObjectMeta {
    fn tags(&self) -> Option<&BTreeMap<String, String>> {
        self.annotations.as_ref()
    }

    fn tags_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.annotations.get_or_insert_with(BTreeMap::new)
    }
}

impl Taggable for BTreeMap<String, String> {
    fn tags(&self) -> Option<&BTreeMap<String, String>> {
        Some(self)
    }

    fn tags_mut(&mut self) -> &mut BTreeMap<String, String> {
        self
    }
}

/// Outcome of the most recent attempt
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    /// Whether the attempt succeeded
    #[serde(default)]
    pub success: bool,
    /// Free-form detail, usually an error message on failure
    #[serde(default)]
    pub message: String,
}

/// Persisted retry state for one named action on one object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Ledger name, equal to the annotation key it is stored under
    #[serde(alias = "action")]
    pub name: String,

    /// Attempts allowed before the action counts as exhausted
    #[serde(default)]
    pub max_retries: u32,

    /// Attempts recorded so far
    #[serde(default)]
    pub attempts: u32,

    /// Minimum spacing between attempts
    #[serde(default, alias = "backoffTime", with = "duration_string")]
    pub backoff_duration: Duration,

    /// When the last attempt was recorded (`None` until the first one)
    #[serde(default)]
    pub last_attempt_time: Option<DateTime<Utc>>,

    /// Outcome of the last attempt
    #[serde(default)]
    pub last_attempt_result: AttemptResult,
}

impl LedgerEntry {
    /// Decode an entry read from annotation `key`.
    ///
    /// Anything that is not a ledger document for this key (bad JSON, wrong
    /// field types, or a document naming a different ledger) is rejected.
    /// Unknown fields are ignored so newer writers stay readable.
    pub fn decode(key: &str, raw: &str) -> Result<Self> {
        let entry: LedgerEntry = serde_json::from_str(raw)
            .map_err(|e| Error::corrupt_ledger_entry(key, e.to_string()))?;

        if entry.name != key {
            return Err(Error::corrupt_ledger_entry(
                key,
                format!("entry is named '{}'", entry.name),
            ));
        }

        Ok(entry)
    }

    /// Encode the entry as the annotation value
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::serialization_for_kind("LedgerEntry", e.to_string()))
    }
}

/// Descriptor for a retry ledger.
///
/// The descriptor carries only configuration; all state lives in the
/// object it is applied to. Its `max_retries` and backoff are authoritative:
/// policy checks use them, and every recorded attempt writes them into the
/// stored entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryLedger {
    name: String,
    max_retries: u32,
    backoff: Duration,
}

impl RetryLedger {
    /// Create a ledger descriptor with no backoff between attempts
    pub fn new(name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    /// Require at least `backoff` between recorded attempts
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Ledger name (also the annotation key)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempt ceiling
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Minimum spacing between attempts
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// The entry this descriptor would create on an untouched object
    pub fn fresh_entry(&self) -> LedgerEntry {
        LedgerEntry {
            name: self.name.clone(),
            max_retries: self.max_retries,
            attempts: 0,
            backoff_duration: self.backoff,
            last_attempt_time: None,
            last_attempt_result: AttemptResult::default(),
        }
    }

    /// Read the stored entry without touching the object.
    ///
    /// Returns `Ok(None)` when the object has no entry for this ledger and
    /// `Error::CorruptLedgerEntry` when it has one that cannot be decoded.
    pub fn lookup<T: Taggable + ?Sized>(&self, obj: &T) -> Result<Option<LedgerEntry>> {
        obj.tags()
            .and_then(|tags| tags.get(&self.name))
            .map(|raw| LedgerEntry::decode(&self.name, raw))
            .transpose()
    }

    /// Return the stored entry, writing a fresh one into the object if absent.
    ///
    /// Nothing is cached: if the caller drops the object without persisting
    /// it, the next call on a re-fetched object creates the entry again.
    pub fn find_or_create<T: Taggable + ?Sized>(&self, obj: &mut T) -> Result<LedgerEntry> {
        if let Some(entry) = self.lookup(obj)? {
            return Ok(entry);
        }

        let entry = self.fresh_entry();
        self.store(obj, &entry)?;
        debug!(ledger = %self.name, max_retries = self.max_retries, "Created retry ledger entry");
        Ok(entry)
    }

    /// Record an attempt and write the updated entry back into the object.
    ///
    /// The caller still has to persist the object.
    pub fn record<T: Taggable + ?Sized>(
        &self,
        obj: &mut T,
        clock: &impl Clock,
        success: bool,
        message: impl Into<String>,
    ) -> Result<LedgerEntry> {
        let mut entry = self.lookup(obj)?.unwrap_or_else(|| self.fresh_entry());

        entry.max_retries = self.max_retries;
        entry.backoff_duration = self.backoff;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_attempt_time = Some(clock.now());
        entry.last_attempt_result = AttemptResult {
            success,
            message: message.into(),
        };

        self.store(obj, &entry)?;
        debug!(
            ledger = %self.name,
            attempts = entry.attempts,
            max_retries = entry.max_retries,
            success,
            "Recorded retry attempt"
        );
        Ok(entry)
    }

    /// Record a successful attempt with no message
    pub fn success<T: Taggable + ?Sized>(
        &self,
        obj: &mut T,
        clock: &impl Clock,
    ) -> Result<LedgerEntry> {
        self.record(obj, clock, true, String::new())
    }

    /// Record a failed attempt with no message
    pub fn failure<T: Taggable + ?Sized>(
        &self,
        obj: &mut T,
        clock: &impl Clock,
    ) -> Result<LedgerEntry> {
        self.record(obj, clock, false, String::new())
    }

    /// Record a successful attempt with a message
    pub fn success_with<T: Taggable + ?Sized>(
        &self,
        obj: &mut T,
        clock: &impl Clock,
        message: impl Into<String>,
    ) -> Result<LedgerEntry> {
        self.record(obj, clock, true, message)
    }

    /// Record a failed attempt with a message
    pub fn failure_with<T: Taggable + ?Sized>(
        &self,
        obj: &mut T,
        clock: &impl Clock,
        message: impl Into<String>,
    ) -> Result<LedgerEntry> {
        self.record(obj, clock, false, message)
    }

    /// Whether the attempt ceiling has been reached.
    ///
    /// Depends only on the recorded attempt count; backoff timing is not
    /// consulted. An object without an entry has made no attempts.
    pub fn exhausted<T: Taggable + ?Sized>(&self, obj: &T) -> Result<bool> {
        let entry = self.current(obj)?;
        Ok(self.entry_exhausted(&entry))
    }

    /// Whether the backoff window since the last attempt has passed.
    ///
    /// True when no attempt has been recorded yet.
    pub fn backoff_elapsed<T: Taggable + ?Sized>(&self, obj: &T, clock: &impl Clock) -> Result<bool> {
        let entry = self.current(obj)?;
        Ok(self.entry_backoff_elapsed(&entry, clock.now()))
    }

    /// Whether the action may be attempted on this pass: not exhausted and
    /// out of its backoff window.
    pub fn eligible_now<T: Taggable + ?Sized>(&self, obj: &T, clock: &impl Clock) -> Result<bool> {
        let entry = self.current(obj)?;
        Ok(!self.entry_exhausted(&entry) && self.entry_backoff_elapsed(&entry, clock.now()))
    }

    /// How long until the next attempt is allowed.
    ///
    /// `None` once exhausted (waiting will not help), `Some(Duration::ZERO)`
    /// when an attempt is allowed now, otherwise the rest of the backoff
    /// window. Suitable for `Action::requeue`.
    pub fn time_until_eligible<T: Taggable + ?Sized>(
        &self,
        obj: &T,
        clock: &impl Clock,
    ) -> Result<Option<Duration>> {
        let entry = self.current(obj)?;
        if self.entry_exhausted(&entry) {
            return Ok(None);
        }

        let Some(last) = entry.last_attempt_time else {
            return Ok(Some(Duration::ZERO));
        };

        let now = clock.now();
        let remaining = match self.eligible_at(last) {
            Some(at) if now >= at => Duration::ZERO,
            Some(at) => (at - now).to_std().unwrap_or(self.backoff),
            None => self.backoff,
        };
        Ok(Some(remaining))
    }

    /// Stored entry, or the fresh entry if none is stored (never writes)
    fn current<T: Taggable + ?Sized>(&self, obj: &T) -> Result<LedgerEntry> {
        Ok(self.lookup(obj)?.unwrap_or_else(|| self.fresh_entry()))
    }

    fn store<T: Taggable + ?Sized>(&self, obj: &mut T, entry: &LedgerEntry) -> Result<()> {
        let encoded = entry.encode()?;
        obj.tags_mut().insert(self.name.clone(), encoded);
        Ok(())
    }

    fn entry_exhausted(&self, entry: &LedgerEntry) -> bool {
        entry.attempts >= self.max_retries
    }

    fn entry_backoff_elapsed(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> bool {
        match entry.last_attempt_time {
            None => true,
            // Unrepresentable deadline: the window never closes
            Some(last) => self.eligible_at(last).is_some_and(|at| now >= at),
        }
    }

    fn eligible_at(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.backoff)
            .ok()
            .and_then(|backoff| last.checked_add_signed(backoff))
    }
}

/// Durations as human-readable strings ("10s", "1m 30s").
mod duration_string {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
