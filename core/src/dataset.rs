//! Dataset model: per-state SAR records and the raw host-page format.
//!
//! The host page embeds `stateData` as a JSON object keyed by state code.
//! Each value carries index-aligned `years`/`counts`, optional category
//! breakdowns as parallel `labels`/`values` arrays, and an optional
//! `monthly` map. Key order is preserved so it can break ranking ties.
//!
//! RULE: a record that violates an invariant is skipped at parse time,
//! never repaired.

use crate::{
    error::{DeskError, DeskResult},
    types::{Count, StateCode, Year},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One (label, value) pair of a category breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValue {
    pub label: String,
    pub value: Count,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categories {
    pub activities:  Vec<LabelValue>,
    pub products:    Vec<LabelValue>,
    pub instruments: Vec<LabelValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Activities,
    Products,
    Instruments,
}

impl CategoryKind {
    pub const ALL: [CategoryKind; 3] =
        [CategoryKind::Activities, CategoryKind::Products, CategoryKind::Instruments];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Activities  => "suspicious activities",
            Self::Products    => "products",
            Self::Instruments => "instruments",
        }
    }
}

impl Categories {
    pub fn get(&self, kind: CategoryKind) -> &[LabelValue] {
        match kind {
            CategoryKind::Activities  => &self.activities,
            CategoryKind::Products    => &self.products,
            CategoryKind::Instruments => &self.instruments,
        }
    }
}

/// Per-state time series and category breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub code:       StateCode,
    pub name:       String,
    pub years:      Vec<Year>,
    pub counts:     Vec<Count>,
    #[serde(default)]
    pub categories: Categories,
    /// "YYYY-MM" → count.
    #[serde(default)]
    pub monthly:    BTreeMap<String, Count>,
}

impl StateRecord {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        years: Vec<Year>,
        counts: Vec<Count>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            years,
            counts,
            categories: Categories::default(),
            monthly: BTreeMap::new(),
        }
    }

    /// Check the record invariants. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("empty state code".into());
        }
        if self.name.trim().is_empty() {
            return Err(format!("{}: empty state name", self.code));
        }
        if self.years.len() != self.counts.len() {
            return Err(format!(
                "{}: {} years but {} counts",
                self.code,
                self.years.len(),
                self.counts.len()
            ));
        }
        if let Some(w) = self.years.windows(2).find(|w| w[0] >= w[1]) {
            return Err(format!(
                "{}: years not strictly increasing ({} then {})",
                self.code, w[0], w[1]
            ));
        }
        if self.counts.iter().try_fold(0, |acc: Count, c| acc.checked_add(*c)).is_none() {
            return Err(format!("{}: counts overflow the state total", self.code));
        }
        Ok(())
    }

    /// Exact count for `year`, if the record has it.
    pub fn count_for(&self, year: Year) -> Option<Count> {
        self.years
            .iter()
            .position(|y| *y == year)
            .map(|i| self.counts[i])
    }

    /// Saturates; validated records never reach the bound.
    pub fn total(&self) -> Count {
        self.counts.iter().fold(0, |acc: Count, c| acc.saturating_add(*c))
    }

    pub fn series(&self) -> impl Iterator<Item = (Year, Count)> + '_ {
        self.years.iter().copied().zip(self.counts.iter().copied())
    }

    /// Monthly entries whose key starts with `year`.
    pub fn months_of(&self, year: Year) -> Vec<(String, Count)> {
        let prefix = format!("{year}-");
        self.monthly
            .iter()
            .filter(|(month, _)| month.starts_with(&prefix))
            .map(|(m, c)| (m.clone(), *c))
            .collect()
    }
}

/// Where the currently loaded record set came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    Live { path: String },
    /// Fallback fixture. Never authoritative.
    SeedFixture { path: String },
    Inline,
}

impl DataSource {
    pub fn is_authoritative(&self) -> bool {
        !matches!(self, Self::SeedFixture { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Live { path }        => format!("live dataset ({path})"),
            Self::SeedFixture { path } => format!("seed fixture ({path}), non-authoritative"),
            Self::Inline               => "inline dataset".to_string(),
        }
    }
}

// ── Raw host-page format ─────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct RawBreakdown {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    values: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStateRecord {
    name:        String,
    years:       Vec<Year>,
    counts:      Vec<i64>,
    #[serde(default)]
    sus_acts:    Option<RawBreakdown>,
    #[serde(default)]
    products:    Option<RawBreakdown>,
    #[serde(default)]
    instruments: Option<RawBreakdown>,
    #[serde(default)]
    monthly:     BTreeMap<String, i64>,
}

fn non_negative(code: &str, what: &str, value: i64) -> Result<Count, String> {
    Count::try_from(value).map_err(|_| format!("{code}: negative {what} ({value})"))
}

fn convert_breakdown(
    code: &str,
    what: &str,
    raw: Option<RawBreakdown>,
) -> Result<Vec<LabelValue>, String> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    if raw.labels.len() != raw.values.len() {
        return Err(format!(
            "{code}: {what} has {} labels but {} values",
            raw.labels.len(),
            raw.values.len()
        ));
    }
    raw.labels
        .into_iter()
        .zip(raw.values)
        .map(|(label, value)| {
            Ok(LabelValue { label, value: non_negative(code, what, value)? })
        })
        .collect()
}

impl RawStateRecord {
    fn into_record(self, code: &str) -> Result<StateRecord, String> {
        let counts = self
            .counts
            .iter()
            .map(|c| non_negative(code, "count", *c))
            .collect::<Result<Vec<_>, _>>()?;
        let monthly = self
            .monthly
            .into_iter()
            .map(|(m, c)| Ok((m, non_negative(code, "monthly count", c)?)))
            .collect::<Result<BTreeMap<_, _>, String>>()?;
        let record = StateRecord {
            code: code.to_string(),
            name: self.name,
            years: self.years,
            counts,
            categories: Categories {
                activities:  convert_breakdown(code, "sus_acts", self.sus_acts)?,
                products:    convert_breakdown(code, "products", self.products)?,
                instruments: convert_breakdown(code, "instruments", self.instruments)?,
            },
            monthly,
        };
        record.validate()?;
        Ok(record)
    }
}

/// Parse the host page's `stateData` object.
///
/// Invalid records are logged and skipped. A document that is not a JSON
/// object is an error; an object with no valid records is an empty vec.
pub fn parse_state_data(json: &str) -> DeskResult<Vec<StateRecord>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let serde_json::Value::Object(map) = value else {
        return Err(DeskError::malformed("stateData", "root is not a JSON object"));
    };

    let mut records = Vec::with_capacity(map.len());
    for (code, raw) in map {
        let raw: RawStateRecord = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Skipping state {code}: {e}");
                continue;
            }
        };
        match raw.into_record(&code) {
            Ok(record) => records.push(record),
            Err(reason) => log::warn!("Skipping state record: {reason}"),
        }
    }
    Ok(records)
}

/// Parse the host page's `monthlyData` object (month → aggregate count).
pub fn parse_monthly_data(json: &str) -> DeskResult<BTreeMap<String, Count>> {
    let raw: BTreeMap<String, i64> = serde_json::from_str(json)?;
    let mut out = BTreeMap::new();
    for (month, count) in raw {
        match Count::try_from(count) {
            Ok(c) => {
                out.insert(month, c);
            }
            Err(_) => log::warn!("Skipping monthly entry {month}: negative count {count}"),
        }
    }
    Ok(out)
}

pub fn read_state_data(path: &Path) -> DeskResult<Vec<StateRecord>> {
    let content = read_file(path)?;
    parse_state_data(&content)
}

pub fn read_monthly_data(path: &Path) -> DeskResult<BTreeMap<String, Count>> {
    let content = read_file(path)?;
    parse_monthly_data(&content)
}

fn read_file(path: &Path) -> DeskResult<String> {
    std::fs::read_to_string(path).map_err(|source| DeskError::Io {
        path: path.display().to_string(),
        source,
    })
}
