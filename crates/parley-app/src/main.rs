//! The `parley` terminal chat client.
//!
//! Connects to the configured server, joins under `--username`, prints the
//! chat and posts every line typed on stdin.

mod chat;
mod platform;

use std::process::ExitCode;

use clap::Parser;
use parley_config::{CliArgs, Config, NetworkConfig};
use parley_net::{ChatClient, ClientError, EngineConfig, FrameConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

use chat::{Action, ChatView, parse_input};
use platform::PlatformDirs;

fn engine_config(network: &NetworkConfig) -> EngineConfig {
    EngineConfig {
        request_timeout: network.request_timeout(),
        connect_timeout: network.connect_timeout(),
        stop_grace_period: network.stop_grace(),
        frame: FrameConfig {
            max_payload_size: network.max_frame_size,
        },
        ..EngineConfig::default()
    }
}

fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "guest".to_string())
}

/// Forward stdin lines from a dedicated thread.
///
/// A blocking read on a runtime thread would hold up shutdown until the next
/// line arrives; a detached thread simply dies with the process.
fn spawn_stdin_reader() -> std::io::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {e}");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Carry out the view's actions. Returns `false` once the client should exit.
fn perform(
    client: &ChatClient,
    network: &NetworkConfig,
    actions: Vec<Action>,
) -> Result<bool, ClientError> {
    for action in actions {
        match action {
            Action::InitSession { user_id, username } => client.init_session(user_id, username)?,
            Action::ConfirmSession {
                user_id,
                session_id,
            } => client.confirm_session(user_id, session_id)?,
            Action::RequestHistory { session_id } => client.add_get_chat_request(session_id)?,
            Action::Post {
                session_id,
                message,
            } => client.add_send_chat_message_request(session_id, message)?,
            Action::Restart => {
                client.restart(network.server_address.clone(), network.server_port)?;
            }
            Action::Print(line) => println!("{line}"),
            Action::Exit => return Ok(false),
        }
    }
    Ok(true)
}

async fn run(
    mut client: ChatClient,
    network: &NetworkConfig,
    mut lines: mpsc::UnboundedReceiver<String>,
    username: String,
) -> Result<(), ClientError> {
    let mut view = ChatView::new(username);

    client.start(network.server_address.clone(), network.server_port)?;

    loop {
        let actions = tokio::select! {
            event = client.next_event() => match event {
                Some(event) => view.on_event(event),
                None => vec![Action::Exit],
            },
            line = lines.recv() => match line {
                Some(line) => view.on_input(parse_input(&line)),
                None => vec![Action::Exit],
            },
        };
        if !perform(&client, network, actions)? {
            break;
        }
    }

    client.shutdown().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let dirs = match args.config.clone() {
        Some(dir) => Ok(PlatformDirs::from_config_dir(dir)),
        None => PlatformDirs::resolve(),
    };
    let dirs = match dirs.and_then(|d| d.create_dirs().map(|()| d)) {
        Ok(dirs) => dirs,
        Err(e) => {
            eprintln!("Failed to initialize platform directories: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = Config::load_or_create(&dirs.config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    parley_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));

    let username = args.username.clone().unwrap_or_else(default_username);
    info!(
        server = %config.network.server_address,
        port = config.network.server_port,
        %username,
        "Starting parley"
    );

    let lines = match spawn_stdin_reader() {
        Ok(lines) => lines,
        Err(e) => {
            eprintln!("Failed to start input thread: {e}");
            return ExitCode::FAILURE;
        }
    };

    let client = ChatClient::spawn(engine_config(&config.network));
    match run(client, &config.network, lines, username).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
