//! Plain-text rendering of console state for the terminal.

use phonepilot_console::DeviceState;
use phonepilot_types::device::Device;
use phonepilot_types::display::EffectiveMode;
use phonepilot_types::message::Message;

pub fn device_line(device: &Device, selected: bool) -> String {
    let marker = if selected { "*" } else { " " };
    let agent = if device.is_initialized { "ready" } else { "-" };
    format!(
        "{marker} {:<24} {:<20} {:<8} {:<7} {agent}",
        device.id, device.model, device.status, device.connection_type
    )
}

/// Prints each step of a streaming message once, as it arrives.
#[derive(Debug, Default)]
pub struct StepPrinter {
    printed: usize,
}

impl StepPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines for steps not printed yet.
    pub fn new_lines(&mut self, msg: &Message) -> Vec<String> {
        let lines = msg
            .thinking
            .iter()
            .zip(msg.actions.iter())
            .enumerate()
            .skip(self.printed)
            .map(|(i, (thinking, action))| {
                let action = serde_json::to_string(action).unwrap_or_default();
                format!("[step {}] {}\n         -> {}", i + 1, thinking.trim(), action)
            })
            .collect::<Vec<_>>();
        self.printed += lines.len();
        lines
    }
}

/// Final line for a finished agent message.
pub fn outcome_line(msg: &Message) -> String {
    let status = match msg.success {
        Some(true) => "ok",
        Some(false) => "failed",
        None => "unknown",
    };
    match msg.steps {
        Some(steps) => format!("[{status}] {} ({steps} steps)", msg.content),
        None => format!("[{status}] {}", msg.content),
    }
}

/// One-line summary of what the display of a device currently shows.
pub fn display_line(device_id: &str, state: &DeviceState) -> String {
    let mode = match state.effective_mode() {
        EffectiveMode::Video => "video",
        EffectiveMode::Screenshot => "screenshot",
    };
    let mut line = format!("{device_id}: display={mode} preference={:?}", state.display_mode);
    if state.video_stream_failed() {
        line.push_str(" (video failed)");
    }
    line
}
