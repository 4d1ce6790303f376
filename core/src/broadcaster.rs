//! Selection broadcaster: the single writer of selection changes.
//!
//! RULE: nothing else declares a selection change. The selection control
//! (interactive `/select`, IPC `select`, or a programmatic call) comes
//! through here, and every request produces exactly one event.

use crate::{data_store::DataStore, types::SelectionVersion};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a selection request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SelectionOutcome {
    Selected { code: String, version: SelectionVersion },
    /// Event emitted with `record: None`; stored selection untouched.
    Unavailable { code: String },
    /// Blank code. Nothing emitted.
    Rejected,
}

impl SelectionOutcome {
    pub fn is_selected(&self) -> bool {
        matches!(self, Self::Selected { .. })
    }
}

#[derive(Clone)]
pub struct SelectionBroadcaster {
    store: Arc<DataStore>,
}

impl SelectionBroadcaster {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn set_selection(&self, code: &str) -> SelectionOutcome {
        if code.trim().is_empty() {
            log::warn!("Ignoring blank selection request");
            return SelectionOutcome::Rejected;
        }
        if let Some((code, version)) = self.store.select_versioned(code) {
            return SelectionOutcome::Selected { code, version };
        }
        self.store.publish_unresolved(code);
        SelectionOutcome::Unavailable { code: code.trim().to_string() }
    }

    /// Reset the selection to none.
    pub fn reset(&self) -> SelectionVersion {
        self.store.clear_selection()
    }
}
