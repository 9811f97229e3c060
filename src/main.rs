use anyhow::Context;
use clap::Parser;
use pulse_voice::{
    config::{self, load_config},
    console::{ConsoleShared, ConsoleSpeech, ConsoleWakeword},
    gateway::HttpGateway,
    orchestrator::{Adapters, Orchestrator, OrchestratorConfig, OrchestratorHandle, Snapshot},
    session::{TurnMode, TurnOrigin},
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Terminal client for the reasoning service
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Overrides PULSE_SERVER_URL
    #[arg(long)]
    server_url: Option<String>,

    /// Overrides PULSE_LOCALE
    #[arg(long)]
    locale: Option<String>,

    /// Reuse a session id instead of generating one
    #[arg(long)]
    session_id: Option<String>,

    /// Skip the startup reachability probe
    #[arg(long)]
    no_health_check: bool,
}

const HELP: &str = "\
Commands:
  <text>            send text in the current mode (or answer while listening)
  /listen           start a conversational turn by voice
  /dictate          start a dictation turn by voice
  /stop             stop listening
  /wake <n>         simulate wake word <n> (0,1 = conversation, 2 = dictation)
  /cancel           cancel the request in flight
  /locale <tag>     switch language (clears the conversation)
  /privacy          toggle privacy mode
  /text             toggle text input mode
  /mode             switch between conversation and dictation for typed text
  /clear            clear the conversation and reset the server context
  /context <text>   replace the global context on the server
  /quit             exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::info!("🚀 Starting pulse-voice");

    let mut service = load_config().context("failed to load configuration")?;
    if let Some(url) = &args.server_url {
        service.set_server_url(url)?;
    }
    if let Some(locale) = &args.locale {
        service.locale = config::validate_locale(locale).map_err(anyhow::Error::msg)?;
    }

    let gateway = HttpGateway::new(&service).context("failed to build HTTP client")?;
    let shared = ConsoleShared::new();
    let adapters = Adapters {
        speech: Box::new(ConsoleSpeech::new(shared.clone())),
        wakeword: Some(Box::new(ConsoleWakeword::new(shared.clone()))),
        gateway: Arc::new(gateway),
    };

    let orchestrator_config = OrchestratorConfig {
        session_id: args.session_id,
        health_check: !args.no_health_check,
        ..OrchestratorConfig::from(&service)
    };
    let (orchestrator, handle) = Orchestrator::new(orchestrator_config, adapters);
    let session_id = orchestrator.session().id.clone();
    let runner = tokio::spawn(orchestrator.run());
    tokio::spawn(render(handle.subscribe()));

    println!("🎧 Connected to {} as session {}", service.server_url, session_id);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut typed_mode = TurnMode::Conversational;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match handle_line(line.trim(), &handle, &shared, &mut typed_mode) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        eprintln!("❌ {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    // Already stopped if the orchestrator went away first
    let _ = handle.shutdown();
    runner.await.context("orchestrator task failed")?;
    println!("\n👋 Goodbye!");
    Ok(())
}

/// Returns false when the user asked to quit
fn handle_line(
    line: &str,
    handle: &OrchestratorHandle,
    shared: &ConsoleShared,
    typed_mode: &mut TurnMode,
) -> pulse_voice::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    if !line.starts_with('/') {
        if !shared.deliver_line(line) {
            handle.send_text(line, *typed_mode)?;
        }
        return Ok(true);
    }

    let (command, argument) = match line.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };
    match command {
        "/listen" => handle.start_listening(TurnMode::Conversational)?,
        "/dictate" => handle.start_listening(TurnMode::Dictation)?,
        "/stop" => handle.stop_listening()?,
        "/wake" => match argument.parse::<usize>() {
            Ok(index) if shared.trigger_keyword(index) => {}
            Ok(_) => println!("Wake word is not armed"),
            Err(_) => println!("Usage: /wake <n>"),
        },
        "/cancel" => handle.cancel_active_exchange()?,
        "/locale" => handle.set_locale(argument)?,
        "/privacy" => handle.toggle_privacy_mode()?,
        "/text" => handle.toggle_text_input_mode()?,
        "/mode" => {
            *typed_mode = match typed_mode {
                TurnMode::Conversational => TurnMode::Dictation,
                TurnMode::Dictation => TurnMode::Conversational,
            };
            println!("Typed text now goes to {}", typed_mode);
        }
        "/clear" => handle.clear_and_reset_context()?,
        "/context" => handle.set_global_context(argument)?,
        "/quit" | "/exit" => return Ok(false),
        _ => println!("{}", HELP),
    }
    Ok(true)
}

/// Print transcript changes and errors as snapshots arrive
async fn render(mut snapshots: watch::Receiver<Snapshot>) {
    let mut previous = snapshots.borrow_and_update().clone();
    while snapshots.changed().await.is_ok() {
        let current = snapshots.borrow_and_update().clone();

        if current.session.transcript.len() < previous.session.transcript.len() {
            println!("🧹 Conversation cleared");
        }
        for (index, turn) in current.session.transcript.iter().enumerate() {
            let unchanged = previous
                .session
                .transcript
                .get(index)
                .is_some_and(|old| old.text == turn.text && old.created_at == turn.created_at);
            if unchanged {
                continue;
            }
            let label = match turn.origin {
                TurnOrigin::UserConversational => "you",
                TurnOrigin::UserDictation => "note",
                TurnOrigin::System => "service",
            };
            println!("[{}] {}", label, turn.text);
        }

        if current.session.patient != previous.session.patient {
            if let (Some(name), Some(id)) = (&current.session.patient.name, &current.session.patient.masked_id) {
                println!("🩺 Patient: {} ({})", name, id);
            }
        }
        if current.last_error != previous.last_error {
            if let Some(error) = &current.last_error {
                println!("❌ {}", error);
            }
        }
        if current.state != previous.state {
            log::debug!("State: {}", current.state.name());
        }
        previous = current;
    }
}
