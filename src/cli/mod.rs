pub mod commands;
pub mod relay;

use futures_util::StreamExt;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ChatSession, Dispatch, History, SessionEvent};
use crate::cli::commands::Commands;
use crate::cli::relay::RelayClient;
use crate::config::AppConfig;
use crate::stream::event_source::NOTICE_EVENT;
use crate::stream::{EventSourceParser, PushEvent};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Usage(String),
}

pub async fn run_cli(command: Commands, config: AppConfig) -> Result<(), CliError> {
    match command {
        Commands::Serve => Err(CliError::Usage(
            "Serve command should be intercepted by main.rs to boot actix-web".to_string(),
        )),
        Commands::Chat { relay, model } => {
            let relay_url = relay.unwrap_or_else(|| config.chat.relay_url.clone());
            let model = model.unwrap_or_else(|| config.chat.model.clone());
            let relay = RelayClient::new(&relay_url, config.chat.api_key.clone());
            let session = ChatSession::new(model, config.chat.system_prompt.clone());
            run_repl(relay, session).await
        }
    }
}

/// Everything the REPL reacts to, funnelled through one channel so the
/// session is only ever touched by a single loop.
#[derive(Debug)]
enum ClientEvent {
    Input(String),
    InputClosed,
    Connected,
    Disconnected(String),
    Push(PushEvent),
    RequestFailed { stream_id: Uuid, detail: String },
}

async fn run_repl(relay: RelayClient, mut session: ChatSession) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::channel::<ClientEvent>(256);

    tokio::spawn(pump_events(relay.clone(), tx.clone()));
    spawn_stdin_reader(tx.clone());

    println!("--- chatrelay terminal chat ---");
    println!("Relay: {}  Model: {}", relay.events_url(), session.model());
    println!("Commands: /history, /save [path], /exit");
    println!("-------------------------------");

    let mut connected = false;
    let mut held: Vec<String> = Vec::new();

    while let Some(event) = rx.recv().await {
        let events = match event {
            ClientEvent::Input(line) => {
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if text == "/exit" || text == "/quit" {
                    break;
                }
                if text == "/history" {
                    print_history(session.history());
                    continue;
                }
                if let Some(rest) = text.strip_prefix("/save") {
                    let path = match rest.trim() {
                        "" => format!("chat_{}.txt", chrono::Utc::now().format("%Y%m%d_%H%M%S")),
                        path => path.to_string(),
                    };
                    match save_transcript(session.history(), &path) {
                        Ok(()) => println!("Transcript saved to: {}", path),
                        Err(e) => eprintln!("Failed to save transcript: {}", e),
                    }
                    continue;
                }
                if !connected {
                    println!("(relay not connected yet, message held)");
                    held.push(text.to_string());
                    continue;
                }
                match session.submit(text) {
                    Some(dispatch) => vec![SessionEvent::Dispatch(dispatch)],
                    None => {
                        println!("(queued until the current reply finishes)");
                        Vec::new()
                    }
                }
            }
            ClientEvent::InputClosed => break,
            ClientEvent::Connected => {
                if !connected {
                    info!("Push channel connected");
                }
                connected = true;
                let mut events = Vec::new();
                for text in held.drain(..) {
                    if let Some(dispatch) = session.submit(text) {
                        events.push(SessionEvent::Dispatch(dispatch));
                    }
                }
                if let Some(dispatch) = session.resume() {
                    events.push(SessionEvent::Dispatch(dispatch));
                }
                events
            }
            ClientEvent::Disconnected(reason) => {
                if connected {
                    warn!("Push channel lost: {}", reason);
                } else {
                    debug!("Push channel unavailable: {}", reason);
                }
                connected = false;
                session.on_connection_lost(reason)
            }
            ClientEvent::Push(push) => handle_push(&mut session, push),
            ClientEvent::RequestFailed { stream_id, detail } => {
                session.on_request_failed(stream_id, detail)
            }
        };

        for event in events {
            render(&relay, &tx, event);
        }
    }

    Ok(())
}

fn handle_push(session: &mut ChatSession, push: PushEvent) -> Vec<SessionEvent> {
    if push.kind() == NOTICE_EVENT {
        println!("\n[notice] {}", push.data);
        return Vec::new();
    }
    session.on_push(&push)
}

fn render(relay: &RelayClient, tx: &mpsc::Sender<ClientEvent>, event: SessionEvent) {
    match event {
        SessionEvent::Token(message) if message.done => {
            println!();
        }
        SessionEvent::Token(message) => {
            print!("{}", message.content);
            let _ = io::stdout().flush();
        }
        SessionEvent::Failed { stream_id, error } => {
            eprintln!("\n[error] stream {}: {}", stream_id, error);
        }
        SessionEvent::Dispatch(dispatch) => {
            print!("assistant> ");
            let _ = io::stdout().flush();
            spawn_request(relay.clone(), tx.clone(), dispatch);
        }
    }
}

fn spawn_request(relay: RelayClient, tx: mpsc::Sender<ClientEvent>, dispatch: Dispatch) {
    tokio::spawn(async move {
        if let Err(e) = relay.start_completion(&dispatch).await {
            let _ = tx
                .send(ClientEvent::RequestFailed {
                    stream_id: dispatch.stream_id,
                    detail: e.to_string(),
                })
                .await;
        }
    });
}

/// Keeps the push channel open, reconnecting after every drop.
async fn pump_events(relay: RelayClient, tx: mpsc::Sender<ClientEvent>) {
    loop {
        let reason = match relay.subscribe().await {
            Ok(response) => {
                if tx.send(ClientEvent::Connected).await.is_err() {
                    return;
                }
                let mut parser = EventSourceParser::new();
                let mut stream = response.bytes_stream();
                loop {
                    match stream.next().await {
                        Some(Ok(bytes)) => {
                            for event in parser.feed(&bytes) {
                                if tx.send(ClientEvent::Push(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "push channel closed by relay".to_string(),
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        if tx.send(ClientEvent::Disconnected(reason)).await.is_err() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn spawn_stdin_reader(tx: mpsc::Sender<ClientEvent>) {
    tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(ClientEvent::Input(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.blocking_send(ClientEvent::InputClosed);
    });
}

fn print_history(history: &History) {
    for message in history.messages() {
        println!("[{}]: {}", message.role.as_str().to_uppercase(), message.content);
    }
}

pub fn render_transcript(history: &History) -> String {
    let mut export = String::new();
    export.push_str(&format!("Exported At: {}\n", chrono::Utc::now().to_rfc3339()));
    export.push_str(&format!("Messages: {}\n", history.len()));
    export.push_str("---\n");

    for m in history.messages() {
        export.push_str(&format!("[{}]: {}\n", m.role.as_str().to_uppercase(), m.content));
        export.push_str("---\n");
    }
    export
}

pub fn save_transcript(history: &History, path: &str) -> Result<(), CliError> {
    std::fs::write(path, render_transcript(history))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::event_source::END_EVENT;

    #[test]
    fn transcript_lists_every_message() {
        let mut history = History::new("You are an AI assistant.");
        history.append_user("hello");
        history.append_assistant("Hi there");

        let transcript = render_transcript(&history);
        assert!(transcript.contains("Messages: 3\n"));
        assert!(transcript.contains("[SYSTEM]: You are an AI assistant.\n---\n"));
        assert!(transcript.contains("[USER]: hello\n---\n"));
        assert!(transcript.ends_with("[ASSISTANT]: Hi there\n---\n"));
    }

    #[test]
    fn save_transcript_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        let history = History::new("sys");

        save_transcript(&history, path.to_str().unwrap()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[SYSTEM]: sys"));
    }

    #[test]
    fn push_events_are_routed_by_stream_id() {
        let mut session = ChatSession::new("m", "sys");
        let dispatch = session.submit("hello").unwrap();

        let foreign = PushEvent {
            event: None,
            id: Some(Uuid::new_v4().to_string()),
            data: "data: [DONE]\n\n".to_string(),
        };
        assert!(handle_push(&mut session, foreign).is_empty());

        let ours = PushEvent {
            event: None,
            id: Some(dispatch.stream_id.to_string()),
            data: "data: [DONE]\n\n".to_string(),
        };
        assert_eq!(handle_push(&mut session, ours).len(), 1);
    }

    #[test]
    fn end_frame_fails_an_unfinished_stream() {
        let mut session = ChatSession::new("m", "sys");
        let dispatch = session.submit("hello").unwrap();

        let end = PushEvent {
            event: Some(END_EVENT.to_string()),
            id: Some(dispatch.stream_id.to_string()),
            data: String::new(),
        };
        let events = handle_push(&mut session, end);
        assert!(matches!(events.as_slice(), [SessionEvent::Failed { .. }]));
        assert!(!session.state().in_flight());
    }
}
