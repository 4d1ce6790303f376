//! sar-chat: terminal front-end for SAR Desk.
//!
//! Usage:
//!   sar-chat --data state_data.json --select CA
//!   sar-chat --ask "How many SARs did California have in 2020?"
//!   sar-chat --set-key gsk_... --db sar-desk.db
//!   sar-chat --ipc-mode

use anyhow::Result;
use sar_desk_core::{
    broadcaster::{SelectionBroadcaster, SelectionOutcome},
    config::DeskConfig,
    credentials::CredentialStore,
    data_store::DataStore,
    loader::DatasetLoader,
    resolver::Resolver,
    session::{ChatMessage, ChatSession, MessageRole},
    types::SelectionVersion,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Ask { question: String },
    Select { code: String },
    Reset,
    GetState,
    Quit,
}

#[derive(serde::Serialize)]
struct SelectionView {
    code:     Option<String>,
    name:     Option<String>,
    version:  SelectionVersion,
    has_data: bool,
}

#[derive(serde::Serialize)]
struct IpcReply {
    messages:  Vec<ChatMessage>,
    selection: SelectionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome:   Option<SelectionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error:     Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");

    let mut config = match arg_value(&args, "--config") {
        Some(path) => DeskConfig::from_config_file(Path::new(path))?,
        None => DeskConfig::from_default_sources()?,
    };
    if let Some(path) = arg_value(&args, "--data") {
        config.data.state_data = Some(PathBuf::from(path));
    }
    if let Some(path) = arg_value(&args, "--monthly") {
        config.data.monthly_data = Some(PathBuf::from(path));
    }
    if let Some(path) = arg_value(&args, "--seed-fixture") {
        config.data.seed_fixture = Some(PathBuf::from(path));
    }
    if let Some(db) = arg_value(&args, "--db") {
        config.storage.db_path = db.to_string();
    }

    let store = Arc::new(DataStore::new());
    let loader = DatasetLoader::from_config(&config.data);
    match loader.load_into(&store) {
        Ok(report) if !ipc_mode => println!("{}", report.summary()),
        Ok(report) => log::info!("{}", report.summary()),
        Err(e) => log::error!("Starting without data: {e}"),
    }

    let resolver = Arc::new(Resolver::from_config(Arc::clone(&store), &config)?);
    let credentials = CredentialStore::open_migrated(&config.storage.db_path)?;
    let mut session = ChatSession::new(resolver)
        .with_credentials(credentials)?
        .with_loader(loader);
    let broadcaster = SelectionBroadcaster::new(Arc::clone(&store));

    if let Some(key) = arg_value(&args, "--set-key") {
        session.save_credential(key)?;
        if !ipc_mode {
            println!("API key saved to {}", config.storage.db_path);
        }
    }
    if let Some(code) = arg_value(&args, "--select") {
        let outcome = broadcaster.set_selection(code);
        if !ipc_mode {
            println!("{}", describe_outcome(&outcome));
        }
    }
    if let Some(question) = arg_value(&args, "--ask") {
        for message in session.submit(question)? {
            if message.role != MessageRole::User {
                println!("{}", message.text);
            }
        }
        return Ok(());
    }

    if ipc_mode {
        run_ipc_loop(&mut session, &broadcaster)
    } else {
        run_repl(&mut session, &broadcaster)
    }
}

fn run_repl(session: &mut ChatSession, broadcaster: &SelectionBroadcaster) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    session.show();
    for message in session.messages() {
        print_message(&mut stdout, message)?;
    }
    // Replies that arrive while hidden are printed on the next /show.
    let mut shown = session.messages().len();

    let mut handle = stdin.lock();
    let mut buffer = String::new();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break; // EOF
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(control) = line.strip_prefix('/') {
            let mut parts = control.splitn(2, char::is_whitespace);
            match (parts.next().unwrap_or_default(), parts.next().map(str::trim)) {
                ("quit", _) => break,
                ("select", Some(code)) => {
                    writeln!(stdout, "{}", describe_outcome(&broadcaster.set_selection(code)))?;
                }
                ("reset", _) => {
                    let version = broadcaster.reset();
                    writeln!(stdout, "Selection cleared (v{version})")?;
                }
                ("show", _) => {
                    session.show();
                    for message in &session.messages()[shown..] {
                        print_message(&mut stdout, message)?;
                    }
                    shown = session.messages().len();
                }
                ("hide", _) => {
                    session.hide();
                    writeln!(stdout, "Chat hidden; /show to display it again")?;
                }
                (other, _) => writeln!(
                    stdout,
                    "Unknown control /{other}. Try /select CODE, /reset, /show, /hide, /quit"
                )?,
            }
            continue;
        }

        match session.submit(line) {
            Ok(added) => {
                if session.is_visible() {
                    for message in added.iter().filter(|m| m.role != MessageRole::User) {
                        print_message(&mut stdout, message)?;
                    }
                    shown = session.messages().len();
                }
            }
            Err(e) => writeln!(stdout, "error: {e}")?,
        }
    }
    Ok(())
}

fn run_ipc_loop(session: &mut ChatSession, broadcaster: &SelectionBroadcaster) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let (messages, outcome, error) = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Ask { question } => match session.submit(&question) {
                Ok(added) => (added, None, None),
                Err(e) => (Vec::new(), None, Some(e.to_string())),
            },
            IpcCommand::Select { code } => (Vec::new(), Some(broadcaster.set_selection(&code)), None),
            IpcCommand::Reset => {
                broadcaster.reset();
                (Vec::new(), None, None)
            }
            IpcCommand::GetState => (Vec::new(), None, None),
        };

        let reply = IpcReply {
            messages,
            selection: selection_view(broadcaster),
            outcome,
            error,
        };
        writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn selection_view(broadcaster: &SelectionBroadcaster) -> SelectionView {
    let selection = broadcaster.store().selection();
    SelectionView {
        has_data: selection.record.is_some(),
        name:     selection.name().map(str::to_string),
        code:     selection.code,
        version:  selection.version,
    }
}

fn describe_outcome(outcome: &SelectionOutcome) -> String {
    match outcome {
        SelectionOutcome::Selected { code, version } => format!("Selected {code} (v{version})"),
        SelectionOutcome::Unavailable { code } => {
            format!("No data for {code}; the selection is unchanged")
        }
        SelectionOutcome::Rejected => "Selection code must not be blank".to_string(),
    }
}

fn print_message(out: &mut impl Write, message: &ChatMessage) -> io::Result<()> {
    let who = match message.role {
        MessageRole::User      => "you",
        MessageRole::Assistant => "desk",
        MessageRole::System    => "system",
    };
    let at = message.timestamp.with_timezone(&chrono::Local).format("%H:%M");
    writeln!(out, "[{at}] {who}: {}\n", message.text)
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
