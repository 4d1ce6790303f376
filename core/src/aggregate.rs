//! Aggregate view: derived totals and rankings over a record set.
//!
//! RULE: `AggregateView::compute` is a pure function of the record slice.
//! Nothing mutates a view after it is built; a new load builds a new one.

use crate::{
    dataset::{CategoryKind, LabelValue, StateRecord},
    types::{Count, StateCode, Year},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTotal {
    pub code:  StateCode,
    pub name:  String,
    pub total: Count,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateView {
    /// Insertion order of the record set.
    pub totals_by_state:   Vec<StateTotal>,
    pub totals_by_year:    BTreeMap<Year, Count>,
    /// Non-increasing by total; ties keep insertion order.
    pub ranked_states:     Vec<StateTotal>,
    pub top_activities:    Vec<LabelValue>,
    pub top_products:      Vec<LabelValue>,
    pub top_instruments:   Vec<LabelValue>,
}

impl AggregateView {
    pub fn compute(records: &[StateRecord]) -> Self {
        let totals_by_state: Vec<StateTotal> = records
            .iter()
            .map(|r| StateTotal {
                code:  r.code.clone(),
                name:  r.name.clone(),
                total: r.total(),
            })
            .collect();

        let mut totals_by_year = BTreeMap::new();
        for record in records {
            for (year, count) in record.series() {
                let total = totals_by_year.entry(year).or_insert(0);
                *total = Count::saturating_add(*total, count);
            }
        }

        let mut ranked_states = totals_by_state.clone();
        // sort_by is stable, so equal totals keep insertion order.
        ranked_states.sort_by(|a, b| b.total.cmp(&a.total));

        Self {
            totals_by_state,
            totals_by_year,
            ranked_states,
            top_activities:  rank_labels(records, CategoryKind::Activities),
            top_products:    rank_labels(records, CategoryKind::Products),
            top_instruments: rank_labels(records, CategoryKind::Instruments),
        }
    }

    pub fn ranked(&self, kind: CategoryKind) -> &[LabelValue] {
        match kind {
            CategoryKind::Activities  => &self.top_activities,
            CategoryKind::Products    => &self.top_products,
            CategoryKind::Instruments => &self.top_instruments,
        }
    }

    pub fn available_years(&self) -> Vec<Year> {
        self.totals_by_year.keys().copied().collect()
    }

    pub fn grand_total(&self) -> Count {
        self.totals_by_state.iter().fold(0, |acc: Count, s| acc.saturating_add(s.total))
    }
}

/// Sum a category across states and rank it. Ties keep first-seen order.
fn rank_labels(records: &[StateRecord], kind: CategoryKind) -> Vec<LabelValue> {
    let mut order: Vec<LabelValue> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        for entry in record.categories.get(kind) {
            match index.get(&entry.label) {
                Some(&i) => order[i].value = order[i].value.saturating_add(entry.value),
                None => {
                    index.insert(entry.label.clone(), order.len());
                    order.push(entry.clone());
                }
            }
        }
    }

    order.sort_by(|a, b| b.value.cmp(&a.value));
    order
}
