//! Glitch Runtime
//!
//! The entry point for the desktop-control agent. Handles CLI args,
//! collaborator wiring, and graceful shutdown around one agent session.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;

use glitch::agent::{AgentSession, SessionDeps};
use glitch::config::{get_config_path, load_config};
use glitch::engine::gemini::GeminiClient;
use glitch::engine::DecisionEngine;
use glitch::input::DesktopAutomation;
use glitch::shell::SystemShell;
use glitch::types::{default_config, AgentConfig, LogSink, SpeechSink};
use glitch::vision::ScreenCapturer;

const VERSION: &str = "0.1.0";

/// Glitch -- Autonomous Desktop-Control Agent
#[derive(Parser, Debug)]
#[command(
    name = "glitch",
    version = VERSION,
    about = "Glitch -- Autonomous Desktop-Control Agent",
    long_about = "Watches the screen, asks a vision model what to do next, and drives the mouse and keyboard."
)]
struct Cli {
    /// Start the agent
    #[arg(long)]
    run: bool,

    /// The standing instruction for this session
    #[arg(long)]
    instruction: Option<String>,

    /// Show the current configuration
    #[arg(long)]
    status: bool,
}

// ---- Status Command ---------------------------------------------------------

/// Display the active configuration.
fn show_status() {
    let config_path = get_config_path();
    let config = match load_config() {
        Some(config) => config,
        None => {
            println!(
                "No config at {}. Using defaults; set GEMINI_API_KEY to run.",
                config_path.display()
            );
            default_config()
        }
    };

    println!(
        r#"
=== GLITCH STATUS ===
Config:      {}
API Key:     {}
Models:      {}
Capture:     {}x{}
Daily Limit: {} requests
Vision Dir:  {}
Version:     {}
=====================
"#,
        config_path.display(),
        if config.api_key.is_empty() {
            "(not set)"
        } else {
            "(set)"
        },
        config.models.join(", "),
        config.capture_width,
        config.capture_height,
        config.daily_request_limit,
        config.vision_dir,
        config.version,
    );
}

// ---- Main Run ---------------------------------------------------------------

/// Resolve the config, falling back to defaults plus the environment.
fn effective_config() -> AgentConfig {
    load_config().unwrap_or_else(|| {
        let mut config = default_config();
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.api_key = key;
        }
        config
    })
}

/// Platform speech output, best effort and fire-and-forget.
fn speak_out(text: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("say").arg(text).spawn();
    }
    #[cfg(not(target_os = "macos"))]
    {
        let _ = text;
    }
}

/// Wire the collaborators, start one session, and wait for either the
/// session to finish or a shutdown signal.
async fn run(instruction: String) -> Result<()> {
    let config = effective_config();
    if config.api_key.is_empty() {
        anyhow::bail!(
            "No API key found. Set GEMINI_API_KEY or add apiKey to {}",
            get_config_path().display()
        );
    }

    info!("Glitch v{} starting", VERSION);

    let api = Arc::new(GeminiClient::new(config.api_key.clone()));
    let engine = DecisionEngine::new(api, config.models.clone());

    let automation =
        Arc::new(DesktopAutomation::new().context("Failed to probe the primary display")?);
    let log: LogSink = Arc::new(|message: &str| info!("{}", message));
    let speak: SpeechSink = Arc::new(|text: &str| {
        info!("[SPEAK] {}", text);
        speak_out(text);
    });

    let session = AgentSession::new(SessionDeps {
        capture: Arc::new(ScreenCapturer::new()),
        automation,
        shell: Arc::new(SystemShell),
        speak,
        log,
        engine,
        config,
    });

    session.start(&instruction);

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            session.stop();
        }
        _ = session.wait() => {
            info!("Session finished");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

// ---- Entry Point -----------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if cli.status {
        show_status();
        return;
    }

    if cli.run {
        let instruction = cli.instruction.unwrap_or_else(|| {
            "Observe the screen and assist with the task in front of you.".to_string()
        });
        if let Err(e) = run(instruction).await {
            eprintln!("Fatal: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    println!("Run \"glitch --help\" for usage information.");
    println!("Run \"glitch --run --instruction \\\"...\\\"\" to start the agent.");
}
