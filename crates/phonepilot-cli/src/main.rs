//! `phonepilot`: headless driver for the PhonePilot console.

mod render;
mod watch;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use phonepilot_console::Console;
use phonepilot_runtime::{DeviceTransport, HttpTransport};
use phonepilot_types::api::TouchPhase;
use phonepilot_types::config::ConsoleConfig;
use phonepilot_types::display::DisplayMode;
use render::{device_line, outcome_line, StepPrinter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phonepilot", version)]
#[command(about = "Drive phone automation agents from the terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.phonepilot/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Agent server URL, overriding the config file.
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached devices
    Devices,
    /// Initialize the agent for a device
    Init {
        #[arg(long, short)]
        device: String,
    },
    /// Run a task and stream its steps
    Chat {
        #[arg(long, short)]
        device: String,
        /// Task instruction, e.g. "open the camera"
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Clear the agent's conversation for a device
    Reset {
        #[arg(long, short)]
        device: String,
    },
    /// Save one screenshot as PNG
    Screenshot {
        #[arg(long, short)]
        device: String,
        #[arg(long, short, default_value = "screenshot.png")]
        out: PathBuf,
    },
    /// Tap at device coordinates
    Tap {
        #[arg(long, short)]
        device: String,
        x: i32,
        y: i32,
    },
    /// Swipe between device coordinates
    Swipe {
        #[arg(long, short)]
        device: String,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Drag with raw touch down/move/up events
    Drag {
        #[arg(long, short)]
        device: String,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        /// Intermediate move events
        #[arg(long, default_value_t = 10)]
        steps: u32,
    },
    /// Show the agent status of a device
    Status {
        #[arg(long, short)]
        device: String,
    },
    /// Restart the server's video streamer for a device
    VideoReset {
        #[arg(long, short)]
        device: String,
    },
    /// Follow the live view (video with screenshot fallback) until Ctrl-C
    Watch {
        #[arg(long, short)]
        device: Option<String>,
        #[arg(long, default_value = "auto")]
        mode: DisplayMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref(), cli.server.as_deref())?;
    let http = HttpTransport::new(config.server_url.clone())
        .with_context(|| format!("Failed to create client for {}", config.server_url))?;
    let transport: Arc<dyn DeviceTransport> = Arc::new(http);
    let console = Console::new(Arc::clone(&transport), config);

    match cli.command {
        Commands::Devices => {
            let roster = console.refresh_devices().await;
            if let Some(err) = roster.error {
                bail!("Failed to list devices: {err}");
            }
            if roster.devices.is_empty() {
                println!("No devices attached.");
            }
            let selected = console.selected_device();
            for device in &roster.devices {
                println!("{}", device_line(device, selected.as_deref() == Some(device.id.as_str())));
            }
        }
        Commands::Init { device } => {
            console
                .init_agent(&device)
                .await
                .with_context(|| format!("Failed to initialize agent for {device}"))?;
            println!("Agent ready on {device}");
        }
        Commands::Chat { device, text } => {
            chat(&console, &device, &text.join(" ")).await?;
        }
        Commands::Reset { device } => {
            console.reset_chat(&device).await?;
            println!("Conversation reset on {device}");
        }
        Commands::Screenshot { device, out } => {
            let shot = transport.get_screenshot(&device).await?;
            let png = base64::engine::general_purpose::STANDARD
                .decode(shot.image.as_bytes())
                .context("Screenshot is not valid base64")?;
            std::fs::write(&out, &png)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            let note = if shot.is_sensitive { " (sensitive screen)" } else { "" };
            println!("{}x{} -> {}{note}", shot.width, shot.height, out.display());
        }
        Commands::Tap { device, x, y } => {
            console.tap(&device, x, y).await?;
            print_feedback(&console, &device);
        }
        Commands::Swipe {
            device,
            x1,
            y1,
            x2,
            y2,
            duration_ms,
        } => {
            console.swipe(&device, (x1, y1), (x2, y2), duration_ms).await?;
            print_feedback(&console, &device);
        }
        Commands::Drag {
            device,
            x1,
            y1,
            x2,
            y2,
            steps,
        } => {
            drag(transport.as_ref(), &device, (x1, y1), (x2, y2), steps).await?;
            println!("Drag executed");
        }
        Commands::Status { device } => {
            let status = console.status(&device).await?;
            println!(
                "{device}: version={} initialized={} steps={}",
                status.version, status.initialized, status.step_count
            );
        }
        Commands::VideoReset { device } => {
            console
                .reset_video(&device)
                .await
                .with_context(|| format!("Failed to reset video on {device}"))?;
            println!("Video streamer restarted on {device}");
        }
        Commands::Watch { device, mode } => {
            watch::run(&console, device, mode).await?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>, server: Option<&str>) -> Result<ConsoleConfig> {
    let mut config = match path.map(PathBuf::from).or_else(ConsoleConfig::default_path) {
        Some(path) => ConsoleConfig::load(&path)?,
        None => ConsoleConfig::default(),
    };
    config.apply_env();
    if let Some(server) = server {
        config.server_url = server.trim_end_matches('/').to_string();
    }
    Ok(config)
}

/// Initialize if needed, run one task and print its steps as they land.
async fn chat(console: &Console, device: &str, text: &str) -> Result<()> {
    let roster = console.refresh_devices().await;
    if let Some(err) = roster.error {
        bail!("Failed to list devices: {err}");
    }
    if !roster.devices.iter().any(|d| d.id == device) {
        bail!("Device {device} is not attached");
    }
    if !console.device_state(device).initialized {
        console
            .init_agent(device)
            .await
            .with_context(|| format!("Failed to initialize agent for {device}"))?;
    }

    let mut changes = console.subscribe();
    let handle = console.send_message(device, text).await?;
    let mut printer = StepPrinter::new();
    loop {
        let state = console.device_state(device);
        let Some(msg) = state.message(handle.message_id()) else {
            bail!("Conversation was reset");
        };
        for line in printer.new_lines(msg) {
            println!("{line}");
        }
        if !msg.is_streaming {
            println!("{}", outcome_line(msg));
            if msg.success != Some(true) {
                bail!("Task did not succeed");
            }
            return Ok(());
        }
        tokio::select! {
            changed = changes.changed() => {
                changed.context("Console stopped")?;
            }
            _ = tokio::signal::ctrl_c() => {
                console.cancel_stream(device);
            }
        }
    }
}

fn print_feedback(console: &Console, device: &str) {
    if let Some(feedback) = &console.device_state(device).tap_feedback {
        println!("{}", feedback.message);
    }
}

async fn drag(
    transport: &dyn DeviceTransport,
    device: &str,
    from: (i32, i32),
    to: (i32, i32),
    steps: u32,
) -> Result<()> {
    transport.touch(TouchPhase::Down, device, from.0, from.1).await?;
    for (x, y) in drag_path(from, to, steps) {
        transport.touch(TouchPhase::Move, device, x, y).await?;
    }
    transport.touch(TouchPhase::Up, device, to.0, to.1).await?;
    Ok(())
}

/// Evenly spaced points after `from`, ending at `to`.
fn drag_path(from: (i32, i32), to: (i32, i32), steps: u32) -> Vec<(i32, i32)> {
    let steps = steps.max(1) as i64;
    (1..=steps)
        .map(|i| {
            let x = from.0 as i64 + (to.0 - from.0) as i64 * i / steps;
            let y = from.1 as i64 + (to.1 - from.1) as i64 * i / steps;
            (x as i32, y as i32)
        })
        .collect()
}
