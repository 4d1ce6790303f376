//! Store events: the only way observers learn about changes.
//!
//! RULE: Observers never poll. They subscribe to the data store and
//! react to these events, in the order they were emitted.

use crate::{
    dataset::{DataSource, StateRecord},
    types::{SelectionVersion, StateCode, Timestamp},
};
use serde::Serialize;
use std::sync::Arc;

/// Payload of a selection change.
///
/// `record` is `None` when the requested code has no data, so observers
/// can show "data unavailable" instead of dropping the request.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionChange {
    pub version:   SelectionVersion,
    pub code:      StateCode,
    pub name:      Option<String>,
    pub record:    Option<Arc<StateRecord>>,
    pub timestamp: Timestamp,
}

impl SelectionChange {
    pub fn has_data(&self) -> bool {
        self.record.is_some()
    }
}

/// Every event the data store emits.
/// Variants are never reordered.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    DataLoaded {
        source:      DataSource,
        state_count: usize,
        timestamp:   Timestamp,
    },
    SelectionChanged(SelectionChange),
    SelectionCleared {
        version:   SelectionVersion,
        timestamp: Timestamp,
    },
}

impl StoreEvent {
    /// Stable name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            StoreEvent::DataLoaded { .. }       => "data_loaded",
            StoreEvent::SelectionChanged(_)     => "selection_changed",
            StoreEvent::SelectionCleared { .. } => "selection_cleared",
        }
    }
}
