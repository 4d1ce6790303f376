//! Deterministic answer text. Every number printed here came from the
//! data store.

use crate::{
    aggregate::StateTotal,
    data_store::{StateComparison, StateYearDetail},
    dataset::{LabelValue, StateRecord},
    types::{Count, Year},
};
use std::fmt::Write;

/// 1234567 → "1,234,567".
pub fn thousands(n: Count) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn signed_thousands(n: i64) -> String {
    let body = thousands(n.unsigned_abs());
    if n < 0 { format!("-{body}") } else { format!("+{body}") }
}

pub fn join_years(years: &[Year]) -> String {
    years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join(", ")
}

pub fn year_count_sentence(name: &str, year: Year, count: Count) -> String {
    format!(
        "In {year}, {name} had {} Suspicious Activity Reports (SARs) filed.",
        thousands(count)
    )
}

pub fn year_detail_answer(detail: &StateYearDetail) -> String {
    let mut out = year_count_sentence(&detail.name, detail.year, detail.count);
    if !detail.months.is_empty() {
        out.push_str("\n\nMonthly breakdown:");
        for (month, count) in &detail.months {
            let _ = write!(out, "\n  {month}: {}", thousands(*count));
        }
    }
    out
}

pub fn nationwide_year_sentence(year: Year, total: Count, states: usize) -> String {
    format!(
        "In {year}, a total of {} Suspicious Activity Reports (SARs) were filed across {states} states in the loaded data.",
        thousands(total)
    )
}

pub fn top_states_answer(top: &[StateTotal]) -> String {
    if top.is_empty() {
        return "No state data is loaded, so there is no ranking to show.".to_string();
    }
    let mut out = format!("The top {} states by total SAR filings are:\n", top.len());
    for (i, s) in top.iter().enumerate() {
        let _ = write!(out, "\n{}. {}: {} SARs", i + 1, s.name, thousands(s.total));
    }
    out
}

pub fn top_states_in_year_answer(year: Year, top: &[StateTotal]) -> String {
    if top.is_empty() {
        return format!("No state in the loaded data has figures for {year}.");
    }
    let mut out = format!("The top {} states by SAR filings in {year} are:\n", top.len());
    for (i, s) in top.iter().enumerate() {
        let _ = write!(out, "\n{}. {}: {} SARs", i + 1, s.name, thousands(s.total));
    }
    out
}

pub fn top_labels_block(heading: &str, labels: &[LabelValue]) -> String {
    let mut out = format!("Top {heading}:");
    for (i, l) in labels.iter().enumerate() {
        let _ = write!(out, "\n  {}. {}: {}", i + 1, l.label, thousands(l.value));
    }
    out
}

pub fn comparison_answer(cmp: &StateComparison) -> String {
    let (l, r) = (&cmp.left, &cmp.right);
    let mut out = format!(
        "{} vs {}:\n\nTotal SARs: {} {} vs {} {} ({} difference)\n\nBy year:",
        l.name,
        r.name,
        l.name,
        thousands(l.total),
        r.name,
        thousands(r.total),
        signed_thousands(cmp.total_difference),
    );
    for delta in &cmp.per_year {
        let side = |c: Option<Count>| c.map(thousands).unwrap_or_else(|| "no data".into());
        let _ = write!(
            out,
            "\n  {}: {} {} | {} {}",
            delta.year,
            l.name,
            side(delta.left),
            r.name,
            side(delta.right)
        );
        if let Some(d) = delta.difference() {
            let _ = write!(out, " ({})", signed_thousands(d));
        }
    }
    out
}

/// Per-year breakdown and total for one state.
pub fn state_summary(record: &StateRecord) -> String {
    if record.years.is_empty() {
        return format!("{} is loaded but has no yearly figures.", record.name);
    }
    let mut out = format!("SAR filings for {}:\n", record.name);
    for (year, count) in record.series() {
        let _ = write!(out, "\n  {year}: {}", thousands(count));
    }
    let _ = write!(out, "\n\nTotal across all years: {} SARs", thousands(record.total()));
    out
}

pub fn no_data_for_year(name: &str, year: Year, available: &[Year]) -> String {
    if available.is_empty() {
        format!("No data for {name} in {year}; {name} has no yearly figures loaded.")
    } else {
        format!(
            "No data for {name} in {year}; available years are: {}.",
            join_years(available)
        )
    }
}

pub fn no_nationwide_data(year: Year, available: &[Year]) -> String {
    if available.is_empty() {
        format!("No nationwide data for {year}; no state data is loaded.")
    } else {
        format!(
            "No nationwide data for {year}; available years are: {}.",
            join_years(available)
        )
    }
}

pub fn year_needed(name: &str, available: &[Year]) -> String {
    if available.is_empty() {
        format!("{name} is loaded but has no yearly figures, so no specific count is available.")
    } else {
        format!(
            "No specific year was given for {name}, so no single figure is available. Ask about one of the available years: {}.",
            join_years(available)
        )
    }
}

pub fn unknown_state(name: &str) -> String {
    format!("No data for {name} in the loaded dataset.")
}

pub const NON_AUTHORITATIVE_NOTE: &str =
    "(Source: seed fixture data, not authoritative. The live dataset failed to load.)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_groups_digits() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(300000), "300,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn year_sentence_uses_grouped_count() {
        let s = year_count_sentence("California", 2020, 300_000);
        assert_eq!(
            s,
            "In 2020, California had 300,000 Suspicious Activity Reports (SARs) filed."
        );
    }

    #[test]
    fn missing_year_lists_alternatives() {
        let s = no_data_for_year("California", 2022, &[2020, 2021]);
        assert!(s.contains("No data for California in 2022"));
        assert!(s.contains("2020, 2021"));
    }
}
