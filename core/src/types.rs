//! Shared primitive types used across the desk.

use chrono::{DateTime, Utc};

/// A two-letter (or territory) state code, e.g. "CA".
pub type StateCode = String;

/// A calendar year as it appears in the dataset.
pub type Year = i32;

/// A SAR filing count. Counts are never negative.
pub type Count = u64;

/// Every timestamp in the desk is UTC.
pub type Timestamp = DateTime<Utc>;

/// Monotonic selection version. Bumped on every selection write.
pub type SelectionVersion = u64;
