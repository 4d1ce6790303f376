//! Dataset loader: the live export first, the seed fixture only if that fails.

use crate::{
    config::DataConfig,
    data_store::DataStore,
    dataset::{read_monthly_data, read_state_data, DataSource},
    error::{DeskError, DeskResult},
};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub source:          DataSource,
    pub state_count:     usize,
    pub monthly_entries: usize,
    /// Why the live dataset was not used, when the fixture was.
    pub fallback_reason: Option<String>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        let mut out = format!("Loaded {} states from {}", self.state_count, self.source.describe());
        if self.monthly_entries > 0 {
            out.push_str(&format!(", {} monthly entries", self.monthly_entries));
        }
        if let Some(reason) = &self.fallback_reason {
            out.push_str(&format!(" (live data unavailable: {reason})"));
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetLoader {
    state_data:   Option<PathBuf>,
    monthly_data: Option<PathBuf>,
    seed_fixture: Option<PathBuf>,
}

impl DatasetLoader {
    pub fn new(state_data: Option<PathBuf>) -> Self {
        Self { state_data, ..Self::default() }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            state_data:   config.state_data.clone(),
            monthly_data: config.monthly_data.clone(),
            seed_fixture: config.seed_fixture.clone(),
        }
    }

    pub fn with_monthly(mut self, path: impl Into<PathBuf>) -> Self {
        self.monthly_data = Some(path.into());
        self
    }

    pub fn with_seed_fixture(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_fixture = Some(path.into());
        self
    }

    /// Load into `store`. Errors only when neither the live dataset nor the
    /// fixture produced a single valid record.
    pub fn load_into(&self, store: &DataStore) -> DeskResult<LoadReport> {
        let (source, fallback_reason) = match self.try_live(store) {
            Ok(source) => (source, None),
            Err(reason) => {
                log::warn!("Live dataset unavailable: {reason}");
                let source = self.try_fixture(store).map_err(|fixture_reason| {
                    log::error!("Seed fixture unavailable: {fixture_reason}");
                    DeskError::DataUnavailable {
                        subject: format!("state data ({reason}; {fixture_reason})"),
                    }
                })?;
                log::warn!("Serving non-authoritative seed fixture data");
                (source, Some(reason))
            }
        };

        let monthly_entries = match &self.monthly_data {
            Some(path) => match read_monthly_data(path) {
                Ok(monthly) => {
                    let entries = monthly.len();
                    if store.load_monthly(monthly) { entries } else { 0 }
                }
                Err(e) => {
                    log::warn!("Monthly data not loaded: {e}");
                    0
                }
            },
            None => 0,
        };

        Ok(LoadReport {
            state_count: store.snapshot().state_count(),
            source,
            monthly_entries,
            fallback_reason,
        })
    }

    fn try_live(&self, store: &DataStore) -> Result<DataSource, String> {
        let path = self.state_data.as_deref().ok_or("no dataset path configured")?;
        load_file(store, path, DataSource::Live { path: path.display().to_string() })
    }

    fn try_fixture(&self, store: &DataStore) -> Result<DataSource, String> {
        let path = self.seed_fixture.as_deref().ok_or("no seed fixture configured")?;
        load_file(store, path, DataSource::SeedFixture { path: path.display().to_string() })
    }
}

fn load_file(store: &DataStore, path: &Path, source: DataSource) -> Result<DataSource, String> {
    let records = read_state_data(path).map_err(|e| e.to_string())?;
    if store.load_from(records, source.clone()) {
        Ok(source)
    } else {
        Err(format!("{} has no valid state records", path.display()))
    }
}
