//! Chat session: an append-only message log in front of the resolver.
//!
//! Lines starting with `!` are session commands and never reach the
//! resolver. Everything else is a question.

use crate::{
    credentials::CredentialStore,
    dataset::CategoryKind,
    error::{DeskError, DeskResult},
    format,
    loader::DatasetLoader,
    monitor::SelectionMonitor,
    resolver::{AnswerKind, Resolver},
    types::Timestamp,
};
use chrono::Utc;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use uuid::Uuid;

pub const COMMAND_PREFIX: char = '!';

pub const WELCOME_MESSAGE: &str = "Ask about Suspicious Activity Report (SAR) filings by state \
    and year, for example \"How many SARs did California have in 2020?\". Type !help for commands.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id:        Uuid,
    pub role:      MessageRole,
    pub text:      String,
    /// Set on resolver answers.
    pub kind:      Option<AnswerKind>,
    pub timestamp: Timestamp,
}

impl ChatMessage {
    fn new(role: MessageRole, text: impl Into<String>, kind: Option<AnswerKind>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Context,
    Refresh,
    Debug,
    Test,
    Status,
    Reload,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Help,
        Command::Context,
        Command::Refresh,
        Command::Debug,
        Command::Test,
        Command::Status,
        Command::Reload,
    ];

    /// Exact, lower-case names only.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Help    => "help",
            Self::Context => "context",
            Self::Refresh => "refresh",
            Self::Debug   => "debug",
            Self::Test    => "test",
            Self::Status  => "status",
            Self::Reload  => "reload",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Help    => "show this list",
            Self::Context => "show the selected state and the loaded dataset",
            Self::Refresh => "recompute totals from the loaded records",
            Self::Debug   => "toggle answer source annotations",
            Self::Test    => "run self checks against the loaded data",
            Self::Status  => "show store, selection and API status",
            Self::Reload  => "reload the dataset from its source",
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

pub struct ChatSession {
    resolver:    Arc<Resolver>,
    monitor:     SelectionMonitor,
    credentials: Option<CredentialStore>,
    loader:      Option<DatasetLoader>,
    messages:    Vec<ChatMessage>,
    visible:     bool,
    debug:       bool,
}

impl ChatSession {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        let monitor = SelectionMonitor::attach(Arc::clone(resolver.store()));
        Self {
            resolver,
            monitor,
            credentials: None,
            loader: None,
            messages: vec![ChatMessage::new(MessageRole::System, WELCOME_MESSAGE, None)],
            visible: false,
            debug: false,
        }
    }

    /// Attach persistent settings. A saved credential is handed to the
    /// resolver straight away.
    pub fn with_credentials(mut self, store: CredentialStore) -> DeskResult<Self> {
        if let Some(key) = store.load_api_key()? {
            log::info!("Using saved API key");
            self.resolver.set_credential(Some(key));
        }
        self.credentials = Some(store);
        Ok(self)
    }

    pub fn with_loader(mut self, loader: DatasetLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    // ── Visibility ─────────────────────────────────────────────────

    pub fn show(&mut self) {
        self.visible = true;
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn toggle(&mut self) -> bool {
        self.visible = !self.visible;
        self.visible
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    // ── Input ──────────────────────────────────────────────────────

    /// Append `line` and its reply. Returns the messages added.
    pub fn submit(&mut self, line: &str) -> DeskResult<Vec<ChatMessage>> {
        let line = line.trim();
        if line.is_empty() {
            log::warn!("Rejected blank chat line");
            return Err(DeskError::malformed("chat line", "must not be blank"));
        }
        let first_new = self.messages.len();
        self.messages.push(ChatMessage::new(MessageRole::User, line, None));

        let reply = match line.strip_prefix(COMMAND_PREFIX) {
            Some(name) => ChatMessage::new(MessageRole::System, self.run_command(name), None),
            None => {
                let answer = self.resolver.resolve(line)?;
                let mut text = answer.text;
                if self.debug {
                    let _ = write!(
                        text,
                        "\n\n[source: {}, selection v{}]",
                        answer.kind.label(),
                        answer.selection_version
                    );
                }
                ChatMessage::new(MessageRole::Assistant, text, Some(answer.kind))
            }
        };
        self.messages.push(reply);
        Ok(self.messages[first_new..].to_vec())
    }

    /// Persist a credential (when storage is attached) and enable
    /// generative answers.
    pub fn save_credential(&mut self, key: &str) -> DeskResult<()> {
        let key = key.trim();
        if key.is_empty() {
            log::warn!("Rejected blank API key");
            return Err(DeskError::malformed("API key", "must not be blank"));
        }
        if let Some(store) = &self.credentials {
            store.save_api_key(key)?;
        }
        self.resolver.set_credential(Some(key.to_string()));
        self.messages.push(ChatMessage::new(
            MessageRole::System,
            "API key saved. Open-ended questions are enabled.",
            None,
        ));
        Ok(())
    }

    pub fn clear_credential(&mut self) -> DeskResult<bool> {
        let removed = match &self.credentials {
            Some(store) => store.clear_api_key()?,
            None => false,
        };
        self.resolver.set_credential(None);
        self.messages.push(ChatMessage::new(MessageRole::System, "API key cleared.", None));
        Ok(removed)
    }

    // ── Commands ───────────────────────────────────────────────────

    fn run_command(&mut self, name: &str) -> String {
        let Some(command) = Command::parse(name) else {
            log::warn!("Unknown command: {name}");
            return format!("Unknown command: {COMMAND_PREFIX}{name}. Type !help for the list.");
        };
        log::debug!("Running command {}", command.name());
        match command {
            Command::Help    => self.help(),
            Command::Context => self.context(),
            Command::Refresh => self.refresh(),
            Command::Debug   => self.toggle_debug(),
            Command::Test    => self.self_test(),
            Command::Status  => self.status(),
            Command::Reload  => self.reload(),
        }
    }

    fn help(&self) -> String {
        let mut out = String::from("Commands:");
        for c in Command::ALL {
            let _ = write!(out, "\n  {COMMAND_PREFIX}{:<8} {}", c.name(), c.description());
        }
        out
    }

    fn context(&self) -> String {
        let dataset = self.resolver.store().snapshot();
        let mut out = self.monitor.selected_state_answer();
        let _ = write!(
            out,
            "\n\nDataset: {} states, years {}, source: {}",
            dataset.state_count(),
            format::join_years(&dataset.aggregate().available_years()),
            dataset.source().describe(),
        );
        for kind in CategoryKind::ALL {
            let top = dataset.top_categories(kind, 3);
            if !top.is_empty() {
                let _ = write!(out, "\n\n{}", format::top_labels_block(kind.label(), &top));
            }
        }
        out
    }

    fn refresh(&self) -> String {
        let store = self.resolver.store();
        let unchanged = store.refresh();
        let dataset = store.snapshot();
        format!(
            "Totals recomputed from {} states ({}). Grand total: {} SARs. Selection: {}.",
            dataset.state_count(),
            if unchanged { "unchanged" } else { "corrected" },
            format::thousands(dataset.aggregate().grand_total()),
            store.selection().label(),
        )
    }

    fn toggle_debug(&mut self) -> String {
        self.debug = !self.debug;
        format!("Debug mode {}.", if self.debug { "on" } else { "off" })
    }

    fn self_test(&self) -> String {
        let store = self.resolver.store();
        let dataset = store.snapshot();
        let mut checks: Vec<(String, bool)> = Vec::new();

        checks.push((format!("dataset loaded ({} states)", dataset.state_count()), dataset.is_loaded()));

        let top = dataset.top_states(1);
        let top_ok = match top.first() {
            Some(first) => self
                .resolver
                .resolve("Which states have the most SARs?")
                .map(|a| a.kind == AnswerKind::Structured && a.text.contains(&first.name))
                .unwrap_or(false),
            None => false,
        };
        checks.push(("top states resolve".to_string(), top_ok));

        if let Some(record) = dataset.records().first() {
            if let Some((year, count)) = record.series().next() {
                let expected = format::thousands(count);
                let ok = self
                    .resolver
                    .resolve(&format!("How many SARs did {} have in {year}?", record.name))
                    .map(|a| a.kind == AnswerKind::Structured && a.text.contains(&expected))
                    .unwrap_or(false);
                checks.push((format!("{} {year} answers {expected}", record.name), ok));
            }

            let absent = record.years.last().map_or(1900, |y| y + 1);
            let ok = self
                .resolver
                .resolve(&format!("How many SARs did {} have in {absent}?", record.name))
                .map(|a| a.kind == AnswerKind::Unavailable)
                .unwrap_or(false);
            checks.push((format!("{} {absent} reported unavailable", record.name), ok));
        }

        let selection = store.selection();
        checks.push((
            format!("selection readable ({}, v{})", selection.label(), selection.version),
            selection.code.is_none() || selection.record.is_some(),
        ));

        let passed = checks.iter().filter(|(_, ok)| *ok).count();
        let mut out = format!("Self test: {passed}/{} passed", checks.len());
        for (name, ok) in &checks {
            let _ = write!(out, "\n  [{}] {name}", if *ok { "PASS" } else { "FAIL" });
        }
        out
    }

    fn status(&self) -> String {
        let store = self.resolver.store();
        let dataset = store.snapshot();
        let selection = store.selection();
        let stats = self.monitor.stats();
        let last_update = stats
            .last_event_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let loaded_at = dataset
            .loaded_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "Store initialised: {}\nRecords: {}\nSource: {}\nLoaded at: {loaded_at}\n\
             Selection: {} (v{})\nMonitor last update: {last_update}\nAPI key set: {}\n\
             Generative call in flight: {}",
            yes_no(dataset.is_loaded()),
            dataset.state_count(),
            dataset.source().describe(),
            selection.label(),
            selection.version,
            yes_no(self.resolver.has_credential()),
            yes_no(self.resolver.in_flight()),
        )
    }

    fn reload(&self) -> String {
        let Some(loader) = &self.loader else {
            return "No dataset loader is attached; nothing to reload.".to_string();
        };
        match loader.load_into(self.resolver.store()) {
            Ok(report) => report.summary(),
            Err(e) => {
                log::error!("Reload failed: {e}");
                format!("Reload failed: {e}. The previous data is still loaded.")
            }
        }
    }
}
