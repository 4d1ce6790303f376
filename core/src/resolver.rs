//! Query/answer resolver.
//!
//! RULES:
//!   - Deterministic answers come first and are built only from the data
//!     store. The generative client is the last resort.
//!   - The selection is captured once when a question arrives. Every step
//!     of that answer uses the captured value.
//!   - At most one generative call is in flight. A concurrent caller gets
//!     a `Busy` answer at once; nothing is queued.
//!   - A generated reply is shown only if every count it writes can be
//!     read off the context it was given. Percentages and ordinals pass.

use crate::{
    aggregate::StateTotal,
    client::{
        ClientError, CompletionClient, CompletionRequest, OpenAiChatClient, PromptMessage,
        PromptRole,
    },
    config::{DeskConfig, GenerativeConfig},
    data_store::{DataStore, Dataset, Selection},
    dataset::{CategoryKind, LabelValue},
    error::{DeskError, DeskResult},
    extract::{gazetteer_name, Extraction, StateMatcher},
    format,
    types::{Count, SelectionVersion, StateCode, Year},
};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

const BUSY_MESSAGE: &str =
    "Another question is still being answered. Please retry in a moment.";

/// A written number: grouped or plain digits, an optional fraction, then
/// an ordinal suffix, a percent sign or a magnitude word.
static FIGURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?(?:(st|nd|rd|th)\b|\s*(%|percent\b)|\s*(thousand|million|billion)\b)?",
    )
    .expect("figure pattern")
});

static CONTEXT_FIGURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("context figure pattern"));

/// Fraction digits beyond this are never grounded.
const MAX_FRACTION_DIGITS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Built from stored figures.
    Structured,
    /// The data cannot answer; says so explicitly.
    Unavailable,
    Generative,
    /// A generated reply cited figures outside its context.
    Withheld,
    Busy,
    Error,
}

impl AnswerKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structured  => "structured data",
            Self::Unavailable => "structured data (unavailable)",
            Self::Generative  => "generative",
            Self::Withheld    => "generative (withheld)",
            Self::Busy        => "busy",
            Self::Error       => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text:              String,
    pub kind:              AnswerKind,
    /// The selection this answer was computed against.
    pub selection_version: SelectionVersion,
    pub selection_code:    Option<StateCode>,
}

// ── Prompt context ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct YearCount {
    year:  Year,
    count: Count,
}

#[derive(Debug, Serialize)]
struct StateContext {
    code:           StateCode,
    name:           String,
    counts_by_year: Vec<YearCount>,
    total:          Count,
}

#[derive(Debug, Serialize)]
struct PromptContext<'a> {
    data_source:         String,
    authoritative:       bool,
    states_loaded:       usize,
    totals_by_year:      &'a BTreeMap<Year, Count>,
    ranking_size:        usize,
    top_states:          Vec<StateTotal>,
    top_categories:      BTreeMap<&'static str, Vec<LabelValue>>,
    selected_state:      Option<StateContext>,
    question_states:     Vec<StateContext>,
    /// Mentioned in the question but absent from the loaded data.
    states_without_data: Vec<String>,
    question_year:       Option<Year>,
}

fn state_context(dataset: &Dataset, code: &str) -> Option<StateContext> {
    let record = dataset.find(code)?;
    Some(StateContext {
        code:           record.code.clone(),
        name:           record.name.clone(),
        counts_by_year: record.series().map(|(year, count)| YearCount { year, count }).collect(),
        total:          record.total(),
    })
}

fn system_prompt(context_json: &str) -> String {
    format!(
        "You answer questions about FinCEN Money Services Business Suspicious Activity \
         Report (SAR) filings.\n\n\
         Rules:\n\
         1. Every SAR count you state must appear in CONTEXT. Never estimate or invent counts.\n\
         2. If CONTEXT has no figure for what was asked, say the figure is unavailable in the loaded data.\n\
         3. Focus on the states named in the question; otherwise use the selected state.\n\
         4. Format numbers with thousands separators (12,345).\n\
         5. Keep the answer short. General background is allowed but must carry no figures.\n\n\
         CONTEXT:\n{context_json}"
    )
}

/// A number as written in a generated reply.
#[derive(Debug)]
struct WrittenFigure<'a> {
    text:     &'a str,
    whole:    String,
    fraction: &'a str,
    unit:     u128,
    /// Percentages and ordinals carry no count.
    relative: bool,
}

impl WrittenFigure<'_> {
    /// Whether some context integer, rounded to the precision written,
    /// gives this figure. A plain integer must match exactly.
    fn grounded_in(&self, context: &HashSet<Count>) -> bool {
        if self.relative {
            return true;
        }
        let decimals = self.fraction.len() as u32;
        if decimals > MAX_FRACTION_DIGITS {
            return false;
        }
        let Ok(written) = format!("{}{}", self.whole, self.fraction).parse::<u128>() else {
            return false;
        };
        let scale = 10u128.pow(decimals);
        if scale == 1 && self.unit == 1 {
            return u64::try_from(written).is_ok_and(|n| context.contains(&n));
        }
        context
            .iter()
            .any(|c| (u128::from(*c) * scale + self.unit / 2) / self.unit == written)
    }
}

fn written_figures(text: &str) -> impl Iterator<Item = WrittenFigure<'_>> + '_ {
    FIGURE.captures_iter(text).filter_map(|caps| {
        let text = caps.get(0)?.as_str();
        let whole = caps.get(1)?.as_str().replace(',', "");
        let fraction = caps.get(2).map_or("", |m| &m.as_str()[1..]);
        let unit = match caps.get(5).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("thousand") => 1_000,
            Some("million") => 1_000_000,
            Some("billion") => 1_000_000_000,
            _ => 1,
        };
        let relative = caps.get(3).is_some() || caps.get(4).is_some();
        Some(WrittenFigure { text: text.trim_end(), whole, fraction, unit, relative })
    })
}

/// Figures in `reply` that no integer in `context` supports, as written.
/// Only percentages and ordinals are exempt.
pub fn ungrounded_figures(reply: &str, context: &str) -> Vec<String> {
    let allowed: HashSet<Count> = CONTEXT_FIGURE
        .find_iter(context)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    let mut seen = HashSet::new();
    written_figures(reply)
        .filter(|f| !f.grounded_in(&allowed))
        .map(|f| f.text.to_string())
        .filter(|text| seen.insert(text.clone()))
        .collect()
}

// ── In-flight guard ────────────────────────────────────────────────

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Generated {
    Grounded(String),
    Withheld(Vec<String>),
}

// ── Resolver ───────────────────────────────────────────────────────

pub struct Resolver {
    store:      Arc<DataStore>,
    client:     Arc<dyn CompletionClient>,
    generative: GenerativeConfig,
    top_n:      usize,
    credential: RwLock<Option<String>>,
    in_flight:  AtomicBool,
    matcher:    Mutex<Option<(Arc<Dataset>, Arc<StateMatcher>)>>,
}

impl Resolver {
    pub fn new(store: Arc<DataStore>, client: Arc<dyn CompletionClient>, config: &DeskConfig) -> Self {
        Self {
            store,
            client,
            generative: config.generative.clone(),
            top_n:      config.resolver.top_n.max(1),
            credential: RwLock::new(None),
            in_flight:  AtomicBool::new(false),
            matcher:    Mutex::new(None),
        }
    }

    /// Resolver backed by the HTTP chat-completion client.
    pub fn from_config(store: Arc<DataStore>, config: &DeskConfig) -> DeskResult<Self> {
        config.validate()?;
        let client = OpenAiChatClient::from_config(&config.generative)?;
        Ok(Self::new(store, Arc::new(client), config))
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Blank keys clear the credential.
    pub fn set_credential(&self, key: Option<String>) {
        let key = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        *self.credential.write().unwrap_or_else(PoisonError::into_inner) = key;
    }

    pub fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    fn credential(&self) -> Option<String> {
        self.credential.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether a generative call is running right now.
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn matcher_for(&self, dataset: &Arc<Dataset>) -> Arc<StateMatcher> {
        let mut cached = self.matcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((built_for, matcher)) = cached.as_ref() {
            if Arc::ptr_eq(built_for, dataset) {
                return Arc::clone(matcher);
            }
        }
        let matcher = Arc::new(StateMatcher::for_dataset(dataset));
        *cached = Some((Arc::clone(dataset), Arc::clone(&matcher)));
        matcher
    }

    /// Answer one question. Only a blank question is an `Err`; every other
    /// outcome, including failures of the generative call, is an `Answer`.
    pub fn resolve(&self, question: &str) -> DeskResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            log::warn!("Rejected blank question");
            return Err(DeskError::malformed("question", "must not be blank"));
        }

        let selection = self.store.selection();
        let dataset = self.store.snapshot();
        let extraction = self.matcher_for(&dataset).extract(question);
        log::debug!(
            "Question against selection v{} ({}): states={:?} year={:?} top={} compare={} nationwide={}",
            selection.version,
            selection.label(),
            extraction.states.iter().map(|s| s.code.as_str()).collect::<Vec<_>>(),
            extraction.year,
            extraction.top,
            extraction.compare,
            extraction.nationwide,
        );

        let (kind, mut text) = match self.structured(&dataset, &selection, &extraction) {
            Some(answer) => answer,
            None => self.generative(question, &dataset, &selection, &extraction),
        };
        let labelled = matches!(
            kind,
            AnswerKind::Structured | AnswerKind::Unavailable | AnswerKind::Generative
        );
        if labelled && !dataset.source().is_authoritative() {
            text.push_str("\n\n");
            text.push_str(format::NON_AUTHORITATIVE_NOTE);
        }

        Ok(Answer {
            text,
            kind,
            selection_version: selection.version,
            selection_code: selection.code.clone(),
        })
    }

    /// Steps 1 to 5. `None` means only the generative call is left.
    fn structured(
        &self,
        dataset: &Dataset,
        selection: &Selection,
        ext: &Extraction,
    ) -> Option<(AnswerKind, String)> {
        let compare_pair = ext.compare && ext.states.len() >= 2;

        // A bare year borrows the selected state.
        let borrows_selection =
            ext.year.is_some() && !ext.nationwide && !ext.top && !ext.compare;
        let subject: Option<(&str, &str)> = match ext.first_state() {
            Some(m) => Some((m.code.as_str(), m.text.as_str())),
            None if borrows_selection => {
                selection.code.as_deref().map(|code| (code, selection.label()))
            }
            None => None,
        };

        if let (Some((code, _)), Some(year), false) = (subject, ext.year, compare_pair) {
            if let Some(detail) = dataset.get_year_detail(code, year) {
                return Some((AnswerKind::Structured, format::year_detail_answer(&detail)));
            }
        }

        if let (None, Some(year), true, false) = (subject, ext.year, ext.nationwide, ext.top) {
            let available = dataset.aggregate().available_years();
            return Some(match dataset.total_for_year(year) {
                Some(total) => {
                    let reporting =
                        dataset.records().iter().filter(|r| r.count_for(year).is_some()).count();
                    (
                        AnswerKind::Structured,
                        format::nationwide_year_sentence(year, total, reporting),
                    )
                }
                None => (AnswerKind::Unavailable, format::no_nationwide_data(year, &available)),
            });
        }

        if ext.top {
            let (ranking, text) = match ext.year {
                Some(year) => {
                    let ranking = dataset.top_states_in_year(year, self.top_n);
                    let text = format::top_states_in_year_answer(year, &ranking);
                    (ranking, text)
                }
                None => {
                    let ranking = dataset.top_states(self.top_n);
                    let text = format::top_states_answer(&ranking);
                    (ranking, text)
                }
            };
            let kind = if ranking.is_empty() { AnswerKind::Unavailable } else { AnswerKind::Structured };
            return Some((kind, text));
        }

        if compare_pair {
            let (a, b) = (&ext.states[0], &ext.states[1]);
            return Some(match dataset.compare(&a.code, &b.code) {
                Some(cmp) => (AnswerKind::Structured, format::comparison_answer(&cmp)),
                None => {
                    let missing = if dataset.find(&a.code).is_none() { a } else { b };
                    let name = gazetteer_name(&missing.code).unwrap_or(missing.text.as_str());
                    (AnswerKind::Unavailable, format::unknown_state(name))
                }
            });
        }

        let (code, text) = subject?;
        let Some(record) = dataset.find(code) else {
            let name = gazetteer_name(code).unwrap_or(text);
            return Some((AnswerKind::Unavailable, format::unknown_state(name)));
        };
        let message = match ext.year {
            Some(year) => format::no_data_for_year(&record.name, year, &record.years),
            None => format::year_needed(&record.name, &record.years),
        };
        Some((AnswerKind::Unavailable, message))
    }

    /// Step 6, with every failure folded into a user-visible answer.
    fn generative(
        &self,
        question: &str,
        dataset: &Dataset,
        selection: &Selection,
        ext: &Extraction,
    ) -> (AnswerKind, String) {
        match self.generate(question, dataset, selection, ext) {
            Ok(Generated::Grounded(text)) => (AnswerKind::Generative, text),
            Ok(Generated::Withheld(figures)) => {
                log::warn!("Withheld generated reply citing figures not in context: {figures:?}");
                let mut text = String::from(
                    "The generated reply cited figures that are not in the loaded data, so it was \
                     withheld. Figures are unavailable for this question.",
                );
                self.append_fallback(&mut text, dataset, selection, ext);
                (AnswerKind::Withheld, text)
            }
            Err(DeskError::Busy) => {
                log::warn!("Rejected question while a generative call is in flight");
                (AnswerKind::Busy, BUSY_MESSAGE.to_string())
            }
            Err(DeskError::Generative(err)) => {
                log::error!("Generative call failed: {err}");
                let mut text = failure_message(&err);
                self.append_fallback(&mut text, dataset, selection, ext);
                (AnswerKind::Error, text)
            }
            Err(err) => {
                log::error!("Could not prepare generative call: {err}");
                (AnswerKind::Error, format!("The question could not be answered: {err}"))
            }
        }
    }

    fn generate(
        &self,
        question: &str,
        dataset: &Dataset,
        selection: &Selection,
        ext: &Extraction,
    ) -> DeskResult<Generated> {
        let credential = self.credential().ok_or(ClientError::MissingCredential)?;
        let _guard = InFlight::acquire(&self.in_flight).ok_or(DeskError::Busy)?;

        let context = PromptContext {
            data_source:         dataset.source().describe(),
            authoritative:       dataset.source().is_authoritative(),
            states_loaded:       dataset.state_count(),
            totals_by_year:      &dataset.aggregate().totals_by_year,
            ranking_size:        self.top_n,
            top_states:          dataset.top_states(self.top_n),
            top_categories:      CategoryKind::ALL
                .into_iter()
                .map(|kind| (kind.label(), dataset.top_categories(kind, self.top_n)))
                .filter(|(_, top)| !top.is_empty())
                .collect(),
            selected_state:      selection.code.as_deref().and_then(|c| state_context(dataset, c)),
            question_states:     ext.states.iter().filter_map(|m| state_context(dataset, &m.code)).collect(),
            states_without_data: ext
                .states
                .iter()
                .filter(|m| dataset.find(&m.code).is_none())
                .map(|m| gazetteer_name(&m.code).unwrap_or(m.text.as_str()).to_string())
                .collect(),
            question_year:       ext.year,
        };
        let context_json = serde_json::to_string_pretty(&context)?;

        let request = CompletionRequest {
            model:       self.generative.model.clone(),
            messages:    vec![
                PromptMessage { role: PromptRole::System, content: system_prompt(&context_json) },
                PromptMessage { role: PromptRole::User, content: question.to_string() },
            ],
            temperature: self.generative.temperature,
            max_tokens:  self.generative.max_tokens,
        };
        let reply = self.client.complete(&credential, &request)?;

        let ungrounded = ungrounded_figures(&reply.content, &context_json);
        if !ungrounded.is_empty() {
            return Ok(Generated::Withheld(ungrounded));
        }
        Ok(Generated::Grounded(reply.content.trim().to_string()))
    }

    /// Summary of the question's first known state, else the selected one.
    fn append_fallback(&self, text: &mut String, dataset: &Dataset, selection: &Selection, ext: &Extraction) {
        let record = ext
            .states
            .iter()
            .find_map(|m| dataset.find(&m.code).cloned())
            .or_else(|| selection.record.clone());
        if let Some(record) = record {
            text.push_str("\n\nFrom the loaded data instead:\n\n");
            text.push_str(&format::state_summary(&record));
        }
    }
}

fn failure_message(err: &ClientError) -> String {
    match err {
        ClientError::MissingCredential => "No API key is set, so open-ended questions are \
            unavailable. Save one (sar-chat --set-key KEY) and ask again."
            .to_string(),
        ClientError::Auth { status } => {
            format!("The API key was rejected (HTTP {status}). Save a new key and try again.")
        }
        ClientError::Timeout => {
            "The generative service did not answer in time. Please retry.".to_string()
        }
        other => format!("The generative service failed: {other}."),
    }
}
