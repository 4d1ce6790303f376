//! The data store: sole owner of the record set, the aggregate view and
//! the current selection.
//!
//! RULES:
//!   - The record set is replaced wholesale by `load`; it is never edited
//!     in place. Readers hold an `Arc<Dataset>` snapshot.
//!   - The selection stores only a code. Its record is dereferenced from
//!     the live dataset on every read.
//!   - "Write selection, then notify" runs under the dispatch lock, so
//!     events reach subscribers in emission order and a subscriber always
//!     sees the selection it is being told about.
//!   - Lookups never fail for "not found"; only blank keys are errors.

use crate::{
    aggregate::{AggregateView, StateTotal},
    dataset::{CategoryKind, DataSource, LabelValue, StateRecord},
    error::{DeskError, DeskResult},
    event::{SelectionChange, StoreEvent},
    types::{Count, SelectionVersion, StateCode, Timestamp, Year},
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ── Dataset snapshot ───────────────────────────────────────────────

/// An immutable, fully-derived view of one loaded record set.
#[derive(Debug, Clone)]
pub struct Dataset {
    records:   Vec<Arc<StateRecord>>,
    index:     HashMap<StateCode, usize>,
    monthly:   BTreeMap<String, Count>,
    aggregate: AggregateView,
    source:    DataSource,
    loaded_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateYearDetail {
    pub code:   StateCode,
    pub name:   String,
    pub year:   Year,
    pub count:  Count,
    pub months: Vec<(String, Count)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub code:   StateCode,
    pub name:   String,
    pub total:  Count,
    pub series: Vec<(Year, Count)>,
}

impl StateSummary {
    fn of(record: &StateRecord) -> Self {
        Self {
            code:   record.code.clone(),
            name:   record.name.clone(),
            total:  record.total(),
            series: record.series().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearDelta {
    pub year:  Year,
    pub left:  Option<Count>,
    pub right: Option<Count>,
}

impl YearDelta {
    /// `left - right`, only when both sides have the year.
    pub fn difference(&self) -> Option<i64> {
        Some(signed(self.left?) - signed(self.right?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateComparison {
    pub left:             StateSummary,
    pub right:            StateSummary,
    /// Union of both states' years, ascending.
    pub per_year:         Vec<YearDelta>,
    pub total_difference: i64,
}

fn signed(count: Count) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

impl Dataset {
    fn empty() -> Self {
        Self {
            records:   Vec::new(),
            index:     HashMap::new(),
            monthly:   BTreeMap::new(),
            aggregate: AggregateView::default(),
            source:    DataSource::Inline,
            loaded_at: None,
        }
    }

    fn build(
        records: Vec<Arc<StateRecord>>,
        monthly: BTreeMap<String, Count>,
        source: DataSource,
    ) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.code.clone(), i))
            .collect();
        let plain: Vec<StateRecord> = records.iter().map(|r| (**r).clone()).collect();
        let aggregate = AggregateView::compute(&plain);
        Self {
            records,
            index,
            monthly,
            aggregate,
            source,
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn records(&self) -> &[Arc<StateRecord>] {
        &self.records
    }

    pub fn aggregate(&self) -> &AggregateView {
        &self.aggregate
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn monthly(&self) -> &BTreeMap<String, Count> {
        &self.monthly
    }

    pub fn loaded_at(&self) -> Option<Timestamp> {
        self.loaded_at
    }

    pub fn is_loaded(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn state_count(&self) -> usize {
        self.records.len()
    }

    /// Exact code, then case-insensitive code, then case-insensitive name.
    pub fn find(&self, key: &str) -> Option<&Arc<StateRecord>> {
        let key = key.trim();
        if let Some(&i) = self.index.get(key) {
            return Some(&self.records[i]);
        }
        if let Some(&i) = self.index.get(&key.to_ascii_uppercase()) {
            return Some(&self.records[i]);
        }
        let lowered = key.to_lowercase();
        self.records
            .iter()
            .find(|r| r.name.to_lowercase() == lowered || r.code.to_lowercase() == lowered)
    }

    pub fn get_year_value(&self, key: &str, year: Year) -> Option<Count> {
        self.find(key)?.count_for(year)
    }

    pub fn get_year_detail(&self, key: &str, year: Year) -> Option<StateYearDetail> {
        let record = self.find(key)?;
        let count = record.count_for(year)?;
        Some(StateYearDetail {
            code:   record.code.clone(),
            name:   record.name.clone(),
            year,
            count,
            months: record.months_of(year),
        })
    }

    pub fn top_states(&self, limit: usize) -> Vec<StateTotal> {
        self.aggregate.ranked_states.iter().take(limit).cloned().collect()
    }

    /// Ranking by one year's count. States without that year are left out.
    pub fn top_states_in_year(&self, year: Year, limit: usize) -> Vec<StateTotal> {
        let mut ranked: Vec<StateTotal> = self
            .records
            .iter()
            .filter_map(|r| {
                r.count_for(year).map(|total| StateTotal {
                    code: r.code.clone(),
                    name: r.name.clone(),
                    total,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.total.cmp(&a.total));
        ranked.truncate(limit);
        ranked
    }

    pub fn top_categories(&self, kind: CategoryKind, limit: usize) -> Vec<LabelValue> {
        self.aggregate.ranked(kind).iter().take(limit).cloned().collect()
    }

    pub fn total_for_year(&self, year: Year) -> Option<Count> {
        self.aggregate.totals_by_year.get(&year).copied()
    }

    pub fn compare(&self, a: &str, b: &str) -> Option<StateComparison> {
        let left = self.find(a)?;
        let right = self.find(b)?;

        let years: std::collections::BTreeSet<Year> =
            left.years.iter().chain(right.years.iter()).copied().collect();
        let per_year = years
            .into_iter()
            .map(|year| YearDelta {
                year,
                left:  left.count_for(year),
                right: right.count_for(year),
            })
            .collect();

        Some(StateComparison {
            total_difference: signed(left.total()) - signed(right.total()),
            left: StateSummary::of(left),
            right: StateSummary::of(right),
            per_year,
        })
    }
}

// ── Selection ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct SelectionSlot {
    code:      Option<StateCode>,
    timestamp: Option<Timestamp>,
    version:   SelectionVersion,
}

/// The live selection as seen by a reader at one instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Selection {
    pub code:      Option<StateCode>,
    pub record:    Option<Arc<StateRecord>>,
    pub timestamp: Option<Timestamp>,
    pub version:   SelectionVersion,
}

impl Selection {
    pub fn is_set(&self) -> bool {
        self.code.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.record.as_deref().map(|r| r.name.as_str())
    }

    /// Human label: the record's name, else the raw code, else "none".
    pub fn label(&self) -> &str {
        self.name().or(self.code.as_deref()).unwrap_or("none")
    }
}

// ── Subscribers ────────────────────────────────────────────────────

pub type SubscriptionId = u64;

type Callback = Box<dyn FnMut(&StoreEvent) -> anyhow::Result<()> + Send>;

struct Subscriber {
    id:       SubscriptionId,
    callback: Callback,
}

#[derive(Default)]
struct Dispatch {
    next_id:     SubscriptionId,
    subscribers: Vec<Subscriber>,
}

impl Dispatch {
    /// Invoke every subscriber in isolation.
    fn deliver(&mut self, event: &StoreEvent) {
        for sub in &mut self.subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (sub.callback)(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!(
                    "Subscriber {} failed on {}: {e:#}",
                    sub.id,
                    event.type_name()
                ),
                Err(_) => log::error!(
                    "Subscriber {} panicked on {}",
                    sub.id,
                    event.type_name()
                ),
            }
        }
    }
}

// ── Store ──────────────────────────────────────────────────────────

pub struct DataStore {
    dataset:   RwLock<Arc<Dataset>>,
    selection: RwLock<SelectionSlot>,
    dispatch:  Mutex<Dispatch>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn require_key(field: &'static str, key: &str) -> DeskResult<()> {
    if key.trim().is_empty() {
        log::warn!("Rejected blank {field}");
        return Err(DeskError::malformed(field, "must not be blank"));
    }
    Ok(())
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            dataset:   RwLock::new(Arc::new(Dataset::empty())),
            selection: RwLock::new(SelectionSlot::default()),
            dispatch:  Mutex::new(Dispatch::default()),
        }
    }

    /// Convenience constructor for callers that already hold records.
    pub fn with_records(records: Vec<StateRecord>) -> Self {
        let store = Self::new();
        store.load(records);
        store
    }

    // ── Loading ────────────────────────────────────────────────────

    /// Replace the record set and recompute the aggregate view.
    /// Returns `false` (and logs) when nothing valid was supplied.
    pub fn load(&self, records: Vec<StateRecord>) -> bool {
        self.load_from(records, DataSource::Inline)
    }

    pub fn load_from(&self, records: Vec<StateRecord>, source: DataSource) -> bool {
        if records.is_empty() {
            log::error!("Failed to load state data: no records provided");
            return false;
        }

        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            if let Err(reason) = record.validate() {
                log::warn!("Skipping state record: {reason}");
                continue;
            }
            if !seen.insert(record.code.clone()) {
                log::warn!("Skipping duplicate state code {}", record.code);
                continue;
            }
            accepted.push(Arc::new(record));
        }
        if accepted.is_empty() {
            log::error!("Failed to load state data: every record was invalid");
            return false;
        }

        let mut dispatch = lock(&self.dispatch);
        let state_count = accepted.len();
        {
            let mut slot = write(&self.dataset);
            let monthly = slot.monthly.clone();
            *slot = Arc::new(Dataset::build(accepted, monthly, source.clone()));
        }
        log::info!("Data store loaded {state_count} states from {}", source.describe());
        dispatch.deliver(&StoreEvent::DataLoaded {
            source,
            state_count,
            timestamp: Utc::now(),
        });
        true
    }

    /// Replace the nationwide monthly series.
    pub fn load_monthly(&self, monthly: BTreeMap<String, Count>) -> bool {
        if monthly.is_empty() {
            log::error!("Failed to load monthly data: no entries provided");
            return false;
        }
        let mut slot = write(&self.dataset);
        let mut next = (**slot).clone();
        next.monthly = monthly;
        *slot = Arc::new(next);
        log::info!("Data store loaded {} monthly entries", slot.monthly.len());
        true
    }

    /// Recompute the aggregate view from the current records.
    /// Returns whether the recomputed view matches the previous one.
    pub fn refresh(&self) -> bool {
        let mut slot = write(&self.dataset);
        let current = Arc::clone(&*slot);
        if !current.is_loaded() {
            return true;
        }
        let mut rebuilt = Dataset::build(
            current.records.clone(),
            current.monthly.clone(),
            current.source.clone(),
        );
        rebuilt.loaded_at = current.loaded_at;
        let unchanged = rebuilt.aggregate == current.aggregate;
        if !unchanged {
            log::warn!("Aggregate view drifted from its records; replaced");
        }
        *slot = Arc::new(rebuilt);
        unchanged
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// The current dataset. Hold it for multi-step reads that must agree.
    pub fn snapshot(&self) -> Arc<Dataset> {
        Arc::clone(&*read(&self.dataset))
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_loaded()
    }

    pub fn get_by_name_or_code(&self, key: &str) -> DeskResult<Option<Arc<StateRecord>>> {
        require_key("state key", key)?;
        Ok(self.snapshot().find(key).cloned())
    }

    pub fn get_year_value(&self, key: &str, year: Year) -> DeskResult<Option<Count>> {
        require_key("state key", key)?;
        Ok(self.snapshot().get_year_value(key, year))
    }

    pub fn get_year_detail(&self, key: &str, year: Year) -> DeskResult<Option<StateYearDetail>> {
        require_key("state key", key)?;
        Ok(self.snapshot().get_year_detail(key, year))
    }

    pub fn top_states(&self, limit: usize) -> Vec<StateTotal> {
        self.snapshot().top_states(limit)
    }

    pub fn top_states_in_year(&self, year: Year, limit: usize) -> Vec<StateTotal> {
        self.snapshot().top_states_in_year(year, limit)
    }

    pub fn top_categories(&self, kind: CategoryKind, limit: usize) -> Vec<LabelValue> {
        self.snapshot().top_categories(kind, limit)
    }

    pub fn total_for_year(&self, year: Year) -> Option<Count> {
        self.snapshot().total_for_year(year)
    }

    pub fn compare(&self, a: &str, b: &str) -> DeskResult<Option<StateComparison>> {
        require_key("first state", a)?;
        require_key("second state", b)?;
        Ok(self.snapshot().compare(a, b))
    }

    /// The selection, with its record resolved against the live dataset.
    pub fn selection(&self) -> Selection {
        let slot = read(&self.selection).clone();
        let record = slot
            .code
            .as_deref()
            .and_then(|code| self.snapshot().find(code).cloned());
        Selection {
            code: slot.code,
            record,
            timestamp: slot.timestamp,
            version: slot.version,
        }
    }

    // ── Selection writes ───────────────────────────────────────────

    /// Set the selection and notify subscribers.
    /// Returns `false` if `code` does not resolve to a loaded record.
    ///
    /// UI code should go through `SelectionBroadcaster::set_selection`,
    /// which also reports unresolved codes.
    pub fn select(&self, code: &str) -> bool {
        self.select_versioned(code).is_some()
    }

    /// `select`, returning the canonical code and the version it wrote.
    pub(crate) fn select_versioned(&self, code: &str) -> Option<(StateCode, SelectionVersion)> {
        if code.trim().is_empty() {
            log::warn!("Rejected blank selection code");
            return None;
        }
        let mut dispatch = lock(&self.dispatch);
        let Some(record) = self.snapshot().find(code).cloned() else {
            log::warn!("State not found: {code}");
            return None;
        };

        let change = {
            let mut slot = write(&self.selection);
            slot.version += 1;
            slot.code = Some(record.code.clone());
            let timestamp = Utc::now();
            slot.timestamp = Some(timestamp);
            SelectionChange {
                version: slot.version,
                code: record.code.clone(),
                name: Some(record.name.clone()),
                record: Some(record),
                timestamp,
            }
        };
        log::info!("Selection v{} -> {}", change.version, change.code);
        let written = (change.code.clone(), change.version);
        dispatch.deliver(&StoreEvent::SelectionChanged(change));
        Some(written)
    }

    /// Announce a selection request that had no matching record.
    /// The stored selection is left as it was.
    pub(crate) fn publish_unresolved(&self, code: &str) {
        let mut dispatch = lock(&self.dispatch);
        let version = read(&self.selection).version;
        log::info!("Selection request for {code} has no data");
        dispatch.deliver(&StoreEvent::SelectionChanged(SelectionChange {
            version,
            code: code.trim().to_string(),
            name: None,
            record: None,
            timestamp: Utc::now(),
        }));
    }

    /// Clear the selection and notify subscribers.
    pub(crate) fn clear_selection(&self) -> SelectionVersion {
        let mut dispatch = lock(&self.dispatch);
        let version = {
            let mut slot = write(&self.selection);
            slot.version += 1;
            slot.code = None;
            slot.timestamp = Some(Utc::now());
            slot.version
        };
        log::info!("Selection v{version} cleared");
        dispatch.deliver(&StoreEvent::SelectionCleared {
            version,
            timestamp: Utc::now(),
        });
        version
    }

    // ── Subscriptions ──────────────────────────────────────────────

    /// Register an observer. Callbacks run on the emitting thread, under
    /// the dispatch lock: they may read the store but must not subscribe,
    /// unsubscribe or write the selection.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) -> anyhow::Result<()> + Send + 'static,
    {
        let mut dispatch = lock(&self.dispatch);
        dispatch.next_id += 1;
        let id = dispatch.next_id;
        dispatch.subscribers.push(Subscriber { id, callback: Box::new(callback) });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut dispatch = lock(&self.dispatch);
        let before = dispatch.subscribers.len();
        dispatch.subscribers.retain(|s| s.id != id);
        dispatch.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.dispatch).subscribers.len()
    }
}
