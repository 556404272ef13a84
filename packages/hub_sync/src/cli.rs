use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

use hub_sync::api::{HttpHubApi, HubApi};
use hub_sync::config::{HubConfig, ServerConfig, ServerFileConfig, Settings};
use hub_sync::connection::ConnectionManager;
use hub_sync::engine::{Notice, SyncEngine};
use hub_sync::error::ApiError;
use hub_sync::models::{Role, SENTINEL_SESSION_ID};

/// Load settings from the data dir, then apply `--server`.
pub fn load_settings(data_dir: Option<PathBuf>, server: Option<String>) -> Result<Settings> {
    let config = HubConfig::new(data_dir)?;
    let mut settings = Settings::load(&config.data_dir)
        .with_context(|| format!("Failed to load {}", config.config_toml_path().display()))?;

    if let Some(base_url) = server {
        settings.server = ServerConfig::from_file(&ServerFileConfig {
            base_url,
            api_prefix: settings.server.api_prefix.clone(),
            ws_path: settings.server.ws_path.clone(),
            request_timeout_secs: settings.server.request_timeout_secs,
        });
        settings.server.ws_url()?;
    }
    Ok(settings)
}

fn api(settings: &Settings) -> Result<HttpHubApi> {
    HttpHubApi::new(&settings.server).context("Failed to build HTTP client")
}

fn unavailable(settings: &Settings) {
    eprintln!("[hubsync: hub at {} is unavailable]", settings.server.base_url);
}

pub async fn sessions_command(settings: &Settings, json: bool) -> Result<()> {
    let sessions = match api(settings)?.list_sessions().await {
        Ok(sessions) => sessions,
        Err(ApiError::Unavailable) => {
            unavailable(settings);
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to list sessions"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
    } else if sessions.is_empty() {
        println!("No sessions.");
    } else {
        println!(
            "{:<8} {:<10} {:<10} {:<30} {}",
            "ID", "STATUS", "PROCESS", "TITLE", "WORKING DIR"
        );
        println!("{}", "-".repeat(100));
        for s in &sessions {
            let status = if s.streaming { "streaming" } else { "idle" };
            let process = if s.process_alive {
                s.process_state.as_str()
            } else {
                "-"
            };
            println!(
                "{:<8} {:<10} {:<10} {:<30} {}",
                s.id, status, process, s.title, s.work_dir
            );
        }
        println!("\n{} session(s)", sessions.len());
    }
    Ok(())
}

pub async fn delete_command(settings: &Settings, session_id: i64) -> Result<()> {
    match api(settings)?.delete_session(session_id).await {
        Ok(()) => println!("Deleted session {session_id}."),
        Err(ApiError::Unavailable) => unavailable(settings),
        Err(e) => return Err(e).with_context(|| format!("Failed to delete session {session_id}")),
    }
    Ok(())
}

pub async fn usage_command(settings: &Settings, session_id: i64) -> Result<()> {
    let usage = match api(settings)?.session_token_usage(session_id).await {
        Ok(usage) => usage,
        Err(ApiError::Unavailable) => {
            unavailable(settings);
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to fetch usage for session {session_id}"));
        }
    };

    println!(
        "{:<10} {:>10} {:>10} {:>12} {:>12}",
        "MESSAGE", "INPUT", "OUTPUT", "CACHE WRITE", "CACHE READ"
    );
    println!("{}", "-".repeat(58));
    for r in &usage.records {
        println!(
            "{:<10} {:>10} {:>10} {:>12} {:>12}",
            r.message_id,
            r.input_tokens,
            r.output_tokens,
            r.cache_creation_input_tokens,
            r.cache_read_input_tokens
        );
    }
    let stats = &usage.stats;
    println!(
        "{:<10} {:>10} {:>10} {:>12} {:>12}",
        "TOTAL",
        stats.total_input_tokens,
        stats.total_output_tokens,
        stats.total_cache_creation_tokens,
        stats.total_cache_read_tokens
    );
    println!("\n{} turn(s)", stats.count);
    Ok(())
}

// =============================================================================
// Interactive chat
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Stop,
    Compress,
    Text(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/stop" => Input::Stop,
        "/compress" => Input::Compress,
        text => Input::Text(text),
    }
}

pub async fn chat_command(
    settings: &Settings,
    session: Option<i64>,
    work_dir: Option<String>,
    group: Option<String>,
) -> Result<()> {
    let (mut manager, mut events) =
        ConnectionManager::new(settings.server.ws_url()?, settings.reconnect);
    let mut engine = SyncEngine::new(api(settings)?, manager.handle(), settings.stream);
    let mut notices = engine.subscribe_notices();
    let mut transcript = Transcript::default();

    match session {
        Some(id) => {
            match engine.select_session(id).await {
                Ok(()) => {}
                Err(ApiError::Unavailable) => {
                    unavailable(settings);
                    return Ok(());
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to open session {id}")),
            }
            transcript.print_history(&engine);
        }
        None => {
            let work_dir = match work_dir {
                Some(dir) => dir,
                None => std::env::current_dir()
                    .context("Failed to get current directory")?
                    .to_string_lossy()
                    .to_string(),
            };
            engine.new_chat(Some(work_dir), group);
        }
    }

    manager.connect();
    eprintln!("[hubsync: /stop interrupts, /compress summarizes, /quit exits]");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => engine.handle_connection_event(event).await,
                None => break,
            },

            notice = notices.recv() => match notice {
                Ok(notice) => transcript.render(&engine, notice),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "transcript fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Stop => {
                        if !engine.stop() {
                            eprintln!("[hubsync: nothing to stop]");
                        }
                    }
                    Input::Compress => {
                        let id = engine.current_session_id();
                        if id == SENTINEL_SESSION_ID {
                            eprintln!("[hubsync: nothing to compress yet]");
                        } else if let Err(e) = engine.compress(id).await {
                            eprintln!("[hubsync: compress failed: {e}]");
                        } else {
                            eprintln!("[hubsync: session {id} compressed]");
                        }
                    }
                    Input::Text(text) => {
                        transcript.expect_echo(text);
                        if !engine.send(text).await {
                            eprintln!("[hubsync: still streaming; /stop to interrupt]");
                        }
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Incremental terminal rendering of engine notices.
#[derive(Default)]
struct Transcript {
    /// Bytes of the in-progress content already printed.
    shown: usize,
    tools_shown: usize,
    echo: Option<String>,
    last_usage: Option<i64>,
}

impl Transcript {
    fn expect_echo(&mut self, text: &str) {
        self.echo = Some(text.to_string());
    }

    fn print_history<A: HubApi>(&self, engine: &SyncEngine<A>) {
        for message in engine.messages() {
            match message.role {
                Role::User => println!("> {}", message.content),
                Role::Assistant => println!("{}\n", message.content),
            }
        }
    }

    fn render<A: HubApi>(&mut self, engine: &SyncEngine<A>, notice: Notice) {
        match notice {
            Notice::LocationChanged(id) if id != SENTINEL_SESSION_ID => {
                eprintln!("[hubsync: session {id}]");
            }
            Notice::Connectivity(true) => eprintln!("[hubsync: connected]"),
            Notice::Connectivity(false) => eprintln!("[hubsync: disconnected, reconnecting]"),
            Notice::StreamChanged => self.render_stream(engine),
            Notice::MessageAppended(message) => match message.role {
                Role::User => {
                    if self.echo.as_deref() == Some(message.content.as_str()) {
                        self.echo = None;
                    } else {
                        println!("> {}", message.content);
                    }
                }
                Role::Assistant => {
                    if self.shown > 0 {
                        // Content was already streamed to the terminal.
                        println!("\n");
                    } else {
                        println!("{}\n", message.content);
                    }
                    self.shown = 0;
                    self.tools_shown = 0;
                }
            },
            Notice::UsageChanged => {
                let Some(latest) = engine.ledger().latest() else {
                    return;
                };
                if self.last_usage != Some(latest.message_id) {
                    self.last_usage = Some(latest.message_id);
                    eprintln!(
                        "[hubsync: {} in / {} out tokens]",
                        latest.input_tokens, latest.output_tokens
                    );
                }
            }
            _ => {}
        }
    }

    fn render_stream<A: HubApi>(&mut self, engine: &SyncEngine<A>) {
        let stream = engine.stream();
        if !stream.has_partial() {
            self.shown = 0;
            self.tools_shown = 0;
            return;
        }

        for tool in stream.tool_calls.iter().skip(self.tools_shown) {
            eprintln!("[tool: {}]", tool.name);
        }
        self.tools_shown = stream.tool_calls.len();

        match stream.content.get(self.shown..) {
            Some(fresh) if !fresh.is_empty() => {
                print!("{fresh}");
                let _ = std::io::stdout().flush();
                self.shown = stream.content.len();
            }
            Some(_) => {}
            None => self.shown = 0,
        }
    }
}
