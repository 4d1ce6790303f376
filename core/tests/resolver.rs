//! Resolver: structured answers first, guarded generative fallback.

use sar_desk_core::{
    broadcaster::SelectionBroadcaster,
    client::{ClientError, CompletionClient, CompletionRequest, CompletionResult},
    config::DeskConfig,
    data_store::DataStore,
    dataset::{DataSource, StateRecord},
    error::DeskError,
    format::NON_AUTHORITATIVE_NOTE,
    resolver::{AnswerKind, Resolver},
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

/// Replies with a fixed result and records every request.
struct MockClient {
    reply:    Result<String, ClientError>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self { reply: Ok(text.to_string()), requests: Mutex::new(Vec::new()) })
    }

    fn failing(err: ClientError) -> Arc<Self> {
        Arc::new(Self { reply: Err(err), requests: Mutex::new(Vec::new()) })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_system_prompt(&self) -> String {
        self.requests.lock().unwrap().last().unwrap().messages[0].content.clone()
    }
}

impl CompletionClient for MockClient {
    fn complete(&self, _credential: &str, request: &CompletionRequest) -> Result<CompletionResult, ClientError> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .map(|content| CompletionResult { content, model: Some("mock".into()) })
    }
}

/// Blocks inside `complete` until released.
struct BlockingClient {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    calls:   Mutex<usize>,
}

impl CompletionClient for BlockingClient {
    fn complete(&self, _credential: &str, _request: &CompletionRequest) -> Result<CompletionResult, ClientError> {
        *self.calls.lock().unwrap() += 1;
        self.entered.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(CompletionResult { content: "No figures to report.".into(), model: None })
    }
}

fn blocking_client() -> (Arc<BlockingClient>, Receiver<()>, Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let client = Arc::new(BlockingClient {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        calls:   Mutex::new(0),
    });
    (client, entered_rx, release_tx)
}

fn store() -> Arc<DataStore> {
    Arc::new(DataStore::with_records(vec![
        StateRecord::new("CA", "California", vec![2020, 2021], vec![300_000, 310_000]),
        StateRecord::new("NY", "New York", vec![2020, 2021], vec![250_000, 260_000]),
        StateRecord::new("TX", "Texas", vec![2019, 2020, 2021], vec![150_000, 160_000, 170_000]),
    ]))
}

fn resolver_with(store: &Arc<DataStore>, client: Arc<dyn CompletionClient>) -> Resolver {
    let resolver = Resolver::new(Arc::clone(store), client, &DeskConfig::default_test());
    resolver.set_credential(Some("test-key".into()));
    resolver
}

#[test]
fn stored_pair_gets_the_exact_count_without_a_generative_call() {
    let store = store();
    let client = MockClient::replying("unused");
    let resolver = resolver_with(&store, client.clone());

    let answer = resolver.resolve("How many SARs did California have in 2020?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    assert!(answer.text.contains("300,000"), "{}", answer.text);
    assert!(answer.text.contains("California"));

    let answer = resolver.resolve("SARs for CA in 2021").unwrap();
    assert!(answer.text.contains("310,000"));
    assert_eq!(client.calls(), 0);
}

#[test]
fn missing_year_is_unavailable_and_cites_no_count() {
    let store = store();
    let client = MockClient::replying("unused");
    let resolver = resolver_with(&store, client.clone());

    let answer = resolver.resolve("How many SARs did California have in 2022?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Unavailable);
    assert!(answer.text.contains("No data for California in 2022"), "{}", answer.text);
    assert!(answer.text.contains("2020, 2021"));
    assert!(!answer.text.contains("300,000"));
    assert!(!answer.text.contains("310,000"));
    assert_eq!(client.calls(), 0);
}

#[test]
fn state_without_year_lists_the_available_years() {
    let resolver = resolver_with(&store(), MockClient::replying("unused"));
    let answer = resolver.resolve("Tell me about Texas").unwrap();
    assert_eq!(answer.kind, AnswerKind::Unavailable);
    assert!(answer.text.contains("2019, 2020, 2021"));
}

#[test]
fn state_missing_from_the_data_is_reported_by_name() {
    let resolver = resolver_with(&store(), MockClient::replying("unused"));
    let answer = resolver.resolve("How many SARs did Guam file in 2020?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Unavailable);
    assert_eq!(answer.text, "No data for Guam in the loaded dataset.");
}

#[test]
fn bare_year_uses_the_selected_state() {
    let store = store();
    let resolver = resolver_with(&store, MockClient::replying("unused"));
    SelectionBroadcaster::new(Arc::clone(&store)).set_selection("NY");

    let answer = resolver.resolve("How many were filed in 2021?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    assert!(answer.text.contains("New York had 260,000"), "{}", answer.text);
    assert_eq!(answer.selection_code.as_deref(), Some("NY"));
}

#[test]
fn nationwide_year_sums_every_state() {
    let store = store();
    let resolver = resolver_with(&store, MockClient::replying("unused"));
    SelectionBroadcaster::new(Arc::clone(&store)).set_selection("CA");

    let answer = resolver.resolve("What was the total nationwide in 2020?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    assert!(answer.text.contains("710,000"), "{}", answer.text);
    assert!(answer.text.contains("3 states"));

    let answer = resolver.resolve("Total nationwide in 2018?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Unavailable);
    assert!(answer.text.starts_with("No nationwide data for 2018"));
}

#[test]
fn top_states_are_ranked_from_the_aggregate_view() {
    let resolver = resolver_with(&store(), MockClient::replying("unused"));

    let answer = resolver.resolve("What are the top states?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    let ca = answer.text.find("California").unwrap();
    let ny = answer.text.find("New York").unwrap();
    let tx = answer.text.find("Texas").unwrap();
    assert!(ca < ny && ny < tx, "{}", answer.text);

    let answer = resolver.resolve("Which state had the most SARs in 2019?").unwrap();
    assert!(answer.text.contains("Texas: 150,000"), "{}", answer.text);
    assert!(!answer.text.contains("California"));
}

#[test]
fn comparison_names_both_states_and_the_difference() {
    let resolver = resolver_with(&store(), MockClient::replying("unused"));
    let answer = resolver.resolve("Compare California and Texas").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    assert!(answer.text.starts_with("California vs Texas"));
    assert!(answer.text.contains("+130,000"), "{}", answer.text);

    let answer = resolver.resolve("Compare California vs Ohio").unwrap();
    assert_eq!(answer.kind, AnswerKind::Unavailable);
    assert!(answer.text.contains("Ohio"));
}

#[test]
fn open_question_goes_to_the_client_with_context() {
    let store = store();
    SelectionBroadcaster::new(Arc::clone(&store)).set_selection("CA");
    let client = MockClient::replying("California filings rose from 300,000 in 2020 to 310,000 in 2021.");
    let resolver = resolver_with(&store, client.clone());

    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Generative);
    assert!(answer.text.contains("310,000"));
    assert_eq!(client.calls(), 1);

    let prompt = client.last_system_prompt();
    assert!(prompt.contains("\"selected_state\""));
    assert!(prompt.contains("310000"));
    assert!(!resolver.in_flight());
}

#[test]
fn reply_with_figures_outside_the_context_is_withheld() {
    let store = store();
    let client = MockClient::replying("There were roughly 999,999 SARs last year.");
    let resolver = resolver_with(&store, client);

    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Withheld);
    assert!(!answer.text.contains("999,999"));
    assert!(answer.text.contains("unavailable"));
}

#[test]
fn counts_written_with_magnitude_words_are_checked() {
    let store = store();
    let client = MockClient::replying("California filed about 1.5 million SARs.");
    let resolver = resolver_with(&store, client);
    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Withheld);
    assert!(!answer.text.contains("1.5 million"));

    let client = MockClient::replying("California and New York together filed about 0.9 million SARs in 2021.");
    let resolver = resolver_with(&store, client);
    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Withheld, "{}", answer.text);

    let client = MockClient::replying("Texas filed about 0.2 million SARs in 2019.");
    let resolver = resolver_with(&store, client);
    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Generative, "{}", answer.text);
}

#[test]
fn small_counts_outside_the_context_are_withheld() {
    let store = store();
    let client = MockClient::replying("Wyoming filed 42 SARs in total.");
    let resolver = resolver_with(&store, client);
    let answer = resolver.resolve("Tell me something surprising.").unwrap();
    assert_eq!(answer.kind, AnswerKind::Withheld);
    assert!(!answer.text.contains("42"));

    let client = MockClient::replying("Texas ranks 3rd of the 3 states, about 15% below New York.");
    let resolver = resolver_with(&store, client);
    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Generative, "{}", answer.text);
}

#[test]
fn all_caps_question_finds_the_named_state() {
    let store = store();
    let client = MockClient::replying("unused");
    let resolver = resolver_with(&store, client.clone());

    let answer = resolver.resolve("HOW MANY SARS IN 2020 FOR CA?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    assert!(answer.text.contains("300,000"), "{}", answer.text);
    assert_eq!(client.calls(), 0);
}

#[test]
fn invalid_config_is_rejected_when_building_from_config() {
    let mut config = DeskConfig::default_test();
    config.resolver.top_n = 0;
    let result = Resolver::from_config(store(), &config);
    assert!(matches!(result, Err(DeskError::Config(_))));
}

#[test]
fn missing_credential_never_reaches_the_client() {
    let store = store();
    let client = MockClient::replying("unused");
    let resolver = Resolver::new(Arc::clone(&store), client.clone(), &DeskConfig::default_test());

    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Error);
    assert!(answer.text.contains("No API key is set"));
    assert_eq!(client.calls(), 0);
    assert!(!resolver.has_credential());
}

#[test]
fn timeout_becomes_one_error_answer_with_a_data_fallback() {
    let store = store();
    SelectionBroadcaster::new(Arc::clone(&store)).set_selection("TX");
    let resolver = resolver_with(&store, MockClient::failing(ClientError::Timeout));

    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Error);
    assert!(answer.text.contains("did not answer in time"));
    assert!(answer.text.contains("SAR filings for Texas"));
    assert!(!resolver.in_flight());

    // Still usable.
    let next = resolver.resolve("How many SARs did Texas have in 2019?").unwrap();
    assert_eq!(next.kind, AnswerKind::Structured);
}

#[test]
fn rejected_credential_is_reported() {
    let resolver = resolver_with(&store(), MockClient::failing(ClientError::Auth { status: 401 }));
    let answer = resolver.resolve("What trend do you see?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Error);
    assert!(answer.text.contains("rejected (HTTP 401)"));
}

#[test]
fn second_concurrent_generative_request_is_busy() {
    let store = store();
    let (client, entered, release) = blocking_client();
    let resolver = Arc::new(resolver_with(&store, client.clone()));

    let first = {
        let resolver = Arc::clone(&resolver);
        thread::spawn(move || resolver.resolve("What trend do you see?").unwrap())
    };
    entered.recv().unwrap();
    assert!(resolver.in_flight());

    let busy = resolver.resolve("Anything unusual here?").unwrap();
    assert_eq!(busy.kind, AnswerKind::Busy);

    // Structured answers never wait on the generative call.
    let structured = resolver.resolve("How many SARs did Texas have in 2020?").unwrap();
    assert_eq!(structured.kind, AnswerKind::Structured);

    release.send(()).unwrap();
    let answer = first.join().unwrap();
    assert_eq!(answer.kind, AnswerKind::Generative);
    assert_eq!(*client.calls.lock().unwrap(), 1);
    assert!(!resolver.in_flight());
}

#[test]
fn selection_is_captured_when_the_question_arrives() {
    let store = store();
    let broadcaster = SelectionBroadcaster::new(Arc::clone(&store));
    broadcaster.set_selection("CA");
    let captured_version = store.selection().version;

    let (client, entered, release) = blocking_client();
    let resolver = Arc::new(resolver_with(&store, client));
    let pending = {
        let resolver = Arc::clone(&resolver);
        thread::spawn(move || resolver.resolve("What trend do you see?").unwrap())
    };
    entered.recv().unwrap();
    broadcaster.set_selection("NY");
    release.send(()).unwrap();

    let answer = pending.join().unwrap();
    assert_eq!(answer.selection_code.as_deref(), Some("CA"));
    assert_eq!(answer.selection_version, captured_version);
    assert_eq!(store.selection().code.as_deref(), Some("NY"));
}

#[test]
fn blank_question_is_malformed_input() {
    let client = MockClient::replying("unused");
    let resolver = resolver_with(&store(), client.clone());
    let err = resolver.resolve("   ").unwrap_err();
    assert!(matches!(err, DeskError::MalformedInput { field: "question", .. }));
    assert_eq!(client.calls(), 0);
}

#[test]
fn seed_fixture_answers_are_labelled() {
    let store = Arc::new(DataStore::new());
    store.load_from(
        vec![StateRecord::new("CA", "California", vec![2020], vec![300_000])],
        DataSource::SeedFixture { path: "data/seed_fixture.json".into() },
    );
    let resolver = resolver_with(&store, MockClient::replying("unused"));
    let answer = resolver.resolve("How many SARs did California have in 2020?").unwrap();
    assert_eq!(answer.kind, AnswerKind::Structured);
    assert!(answer.text.ends_with(NON_AUTHORITATIVE_NOTE));
}
