//! Question extraction: pull state mentions, a year and coarse intents
//! out of free text.
//!
//! Names match case-insensitively on word boundaries, longest first, so
//! "West Virginia" wins over "Virginia". Postal codes only match as
//! standalone upper-case tokens: "CA" is a state, "ca" is not. In a line
//! with no lower-case letters, codes that are also English words ("IN",
//! "OR") are read as words.

use crate::{data_store::Dataset, types::Year};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Known states and territories, plus common aliases.
const GAZETTEER: &[(&str, &str)] = &[
    ("AL", "Alabama"), ("AK", "Alaska"), ("AZ", "Arizona"), ("AR", "Arkansas"),
    ("CA", "California"), ("CO", "Colorado"), ("CT", "Connecticut"), ("DE", "Delaware"),
    ("FL", "Florida"), ("GA", "Georgia"), ("HI", "Hawaii"), ("ID", "Idaho"),
    ("IL", "Illinois"), ("IN", "Indiana"), ("IA", "Iowa"), ("KS", "Kansas"),
    ("KY", "Kentucky"), ("LA", "Louisiana"), ("ME", "Maine"), ("MD", "Maryland"),
    ("MA", "Massachusetts"), ("MI", "Michigan"), ("MN", "Minnesota"), ("MS", "Mississippi"),
    ("MO", "Missouri"), ("MT", "Montana"), ("NE", "Nebraska"), ("NV", "Nevada"),
    ("NH", "New Hampshire"), ("NJ", "New Jersey"), ("NM", "New Mexico"), ("NY", "New York"),
    ("NC", "North Carolina"), ("ND", "North Dakota"), ("OH", "Ohio"), ("OK", "Oklahoma"),
    ("OR", "Oregon"), ("PA", "Pennsylvania"), ("RI", "Rhode Island"), ("SC", "South Carolina"),
    ("SD", "South Dakota"), ("TN", "Tennessee"), ("TX", "Texas"), ("UT", "Utah"),
    ("VT", "Vermont"), ("VA", "Virginia"), ("WA", "Washington"), ("WV", "West Virginia"),
    ("WI", "Wisconsin"), ("WY", "Wyoming"),
    ("DC", "District of Columbia"), ("DC", "Washington, D.C."), ("DC", "Washington D.C."),
    ("DC", "Washington DC"), ("DC", "D.C."),
    ("PR", "Puerto Rico"), ("GU", "Guam"), ("VI", "U.S. Virgin Islands"),
    ("VI", "Virgin Islands"), ("AS", "American Samoa"), ("MP", "Northern Mariana Islands"),
];

/// Postal codes that double as common English words.
const WORD_CODES: &[&str] = &["AS", "HI", "ID", "IN", "ME", "OH", "OK", "OR"];

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("year pattern"));

static CODE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\b").expect("code pattern"));

static STATE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstates?\b").expect("state word pattern"));

static RANK_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(top|rank|ranking|ranked|highest|most|largest|leading|biggest)\b")
        .expect("rank pattern")
});

static COMPARE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(compare|compared|comparison|versus|vs)\b|difference between")
        .expect("compare pattern")
});

static NATIONWIDE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(total|overall|nationwide|national|combined|all states|across states)\b")
        .expect("nationwide pattern")
});

/// A state named in a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMention {
    pub code:  String,
    /// The text as written in the question.
    pub text:  String,
    pub start: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Distinct states in order of first mention.
    pub states:     Vec<StateMention>,
    pub year:       Option<Year>,
    pub top:        bool,
    pub compare:    bool,
    pub nationwide: bool,
}

impl Extraction {
    pub fn first_state(&self) -> Option<&StateMention> {
        self.states.first()
    }
}

/// Matches state names and codes. Built from the gazetteer plus any
/// names present in the loaded dataset.
pub struct StateMatcher {
    names: Option<Regex>,
    alias_to_code: HashMap<String, String>,
    codes: HashSet<String>,
}

impl StateMatcher {
    pub fn gazetteer() -> Self {
        Self::build(GAZETTEER.iter().map(|(c, n)| (c.to_string(), n.to_string())))
    }

    pub fn for_dataset(dataset: &Dataset) -> Self {
        let extra = dataset
            .records()
            .iter()
            .map(|r| (r.code.clone(), r.name.clone()));
        Self::build(
            GAZETTEER
                .iter()
                .map(|(c, n)| (c.to_string(), n.to_string()))
                .chain(extra),
        )
    }

    fn build(entries: impl Iterator<Item = (String, String)>) -> Self {
        let mut alias_to_code = HashMap::new();
        let mut codes = HashSet::new();
        for (code, name) in entries {
            codes.insert(code.clone());
            // Dataset entries come last and override gazetteer aliases.
            alias_to_code.insert(name.to_lowercase(), code);
        }

        let mut aliases: Vec<&String> = alias_to_code.keys().collect();
        aliases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = aliases
            .iter()
            .map(|alias| {
                let escaped = regex::escape(alias);
                // \b only holds next to a word character.
                let ends_in_word = alias.chars().last().is_some_and(|c| c.is_alphanumeric());
                if ends_in_word { format!("{escaped}\\b") } else { escaped }
            })
            .collect::<Vec<_>>()
            .join("|");
        let names = match Regex::new(&format!(r"(?i)\b(?:{alternation})")) {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("State name pattern rejected ({e}); matching codes only");
                None
            }
        };

        Self { names, alias_to_code, codes }
    }

    /// All distinct state mentions, in order of first appearance.
    pub fn find_states(&self, question: &str) -> Vec<StateMention> {
        let mut found: Vec<StateMention> = Vec::new();
        let mut claimed: Vec<(usize, usize)> = Vec::new();

        for m in self.names.iter().flat_map(|re| re.find_iter(question)) {
            if let Some(code) = self.alias_to_code.get(&m.as_str().to_lowercase()) {
                claimed.push((m.start(), m.end()));
                found.push(StateMention {
                    code:  code.clone(),
                    text:  m.as_str().to_string(),
                    start: m.start(),
                });
            }
        }
        let shouting = !question.chars().any(char::is_lowercase);
        for caps in CODE_TOKEN.captures_iter(question) {
            let Some(m) = caps.get(1) else { continue };
            if shouting && WORD_CODES.contains(&m.as_str()) {
                continue;
            }
            let overlaps = claimed.iter().any(|(s, e)| m.start() < *e && *s < m.end());
            if !overlaps && self.codes.contains(m.as_str()) {
                found.push(StateMention {
                    code:  m.as_str().to_string(),
                    text:  m.as_str().to_string(),
                    start: m.start(),
                });
            }
        }

        found.sort_by_key(|m| m.start);
        let mut seen = HashSet::new();
        found.retain(|m| seen.insert(m.code.clone()));
        found
    }

    pub fn extract(&self, question: &str) -> Extraction {
        let states = self.find_states(question);
        let top = RANK_WORD.is_match(question)
            && (STATE_WORD.is_match(question) || question.to_lowercase().contains("which"));
        Extraction {
            year: extract_year(question),
            compare: COMPARE_WORD.is_match(question),
            nationwide: NATIONWIDE_WORD.is_match(question),
            top,
            states,
        }
    }
}

/// First standalone 4-digit year (1900 to 2099) in the text.
pub fn extract_year(question: &str) -> Option<Year> {
    YEAR.captures(question)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Gazetteer name for a postal code, if known.
pub fn gazetteer_name(code: &str) -> Option<&'static str> {
    GAZETTEER
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, n)| *n)
}
