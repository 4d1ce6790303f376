//! Selection monitor: a passive observer of store events.
//!
//! It keeps event bookkeeping only (when things happened, how often).
//! It never holds its own copy of the selection: its answer helpers read
//! the store live.

use crate::{
    data_store::{DataStore, SubscriptionId},
    dataset::DataSource,
    event::StoreEvent,
    format,
    types::Timestamp,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub last_event_at:      Option<Timestamp>,
    pub last_event_type:    Option<&'static str>,
    pub selection_events:   u64,
    pub unavailable_events: u64,
    pub clear_events:       u64,
    pub last_load:          Option<LoadRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadRecord {
    pub source:      DataSource,
    pub state_count: usize,
    pub at:          Timestamp,
}

pub struct SelectionMonitor {
    store:        Arc<DataStore>,
    stats:        Arc<Mutex<MonitorStats>>,
    subscription: SubscriptionId,
}

impl SelectionMonitor {
    /// Subscribe to `store` and start recording.
    pub fn attach(store: Arc<DataStore>) -> Self {
        let stats = Arc::new(Mutex::new(MonitorStats::default()));
        let sink = Arc::clone(&stats);
        let subscription = store.subscribe(move |event| {
            let mut stats = sink.lock().unwrap_or_else(PoisonError::into_inner);
            stats.last_event_type = Some(event.type_name());
            match event {
                StoreEvent::DataLoaded { source, state_count, timestamp } => {
                    stats.last_event_at = Some(*timestamp);
                    stats.last_load = Some(LoadRecord {
                        source:      source.clone(),
                        state_count: *state_count,
                        at:          *timestamp,
                    });
                }
                StoreEvent::SelectionChanged(change) => {
                    stats.last_event_at = Some(change.timestamp);
                    stats.selection_events += 1;
                    if !change.has_data() {
                        stats.unavailable_events += 1;
                    }
                    log::debug!("Monitor saw selection v{} ({})", change.version, change.code);
                }
                StoreEvent::SelectionCleared { timestamp, .. } => {
                    stats.last_event_at = Some(*timestamp);
                    stats.clear_events += 1;
                }
            }
            Ok(())
        });
        Self { store, stats, subscription }
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Breakdown for whatever is selected right now.
    pub fn selected_state_answer(&self) -> String {
        let selection = self.store.selection();
        match (&selection.code, &selection.record) {
            (None, _) => "No state is currently selected.".to_string(),
            (Some(code), None) => format!(
                "{code} is selected, but the loaded dataset has no record for it."
            ),
            (Some(_), Some(record)) => format::state_summary(record),
        }
    }

    pub fn top_states_answer(&self, limit: usize) -> String {
        format::top_states_answer(&self.store.top_states(limit))
    }
}

impl Drop for SelectionMonitor {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription);
    }
}
