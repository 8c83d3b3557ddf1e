//! `phonepilot watch`: follow the selected device's display.
//!
//! Opens the live video while the effective mode is video and feeds its
//! fallback notices back into the console; the console's arbiter then
//! takes over with screenshot polling.

use crate::render::display_line;
use anyhow::{Context, Result};
use bytes::Bytes;
use phonepilot_console::Console;
use phonepilot_runtime::live_view::VideoStream;
use phonepilot_types::api::Screenshot;
use phonepilot_types::display::{DisplayMode, EffectiveMode};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Chunks between progress lines while video is flowing.
const VIDEO_PROGRESS_EVERY: u64 = 250;

pub async fn run(console: &Console, device: Option<String>, mode: DisplayMode) -> Result<()> {
    let tasks = console.start();
    if let Some(id) = &device {
        console.select_device(id);
    }

    let (notice_tx, mut notices) = mpsc::unbounded_channel();
    let mut changes = console.subscribe();
    let mut selection = console.subscribe_selected();
    let mut video: Option<VideoStream> = None;
    let mut shown: Option<(String, EffectiveMode)> = None;
    let mut last_shot: Option<Arc<Screenshot>> = None;
    let mut mode_applied = HashSet::new();
    let mut chunks: u64 = 0;

    println!("Watching (Ctrl-C to stop)...");
    loop {
        if let Some(id) = console.selected_device() {
            if mode != DisplayMode::Auto && mode_applied.insert(id.clone()) {
                console.set_display_mode(&id, mode);
            }
            let state = console.device_state(&id);
            let effective = state.effective_mode();
            let current = (id.clone(), effective);
            if shown.as_ref() != Some(&current) {
                println!("{}", display_line(&id, &state));
                video = None;
                chunks = 0;
                if effective == EffectiveMode::Video {
                    let config = console.config();
                    video = Some(
                        VideoStream::open(
                            &config.server_url,
                            &id,
                            config.polling.video_timeout(),
                            notice_tx.clone(),
                        )
                        .context("Failed to open live view")?,
                    );
                }
                shown = Some(current);
            }
            if let Some(shot) = &state.screenshot {
                if !last_shot.as_ref().is_some_and(|s| Arc::ptr_eq(s, shot)) {
                    println!(
                        "{id}: screenshot {}x{} ({} bytes base64)",
                        shot.width,
                        shot.height,
                        shot.image.len()
                    );
                    last_shot = Some(Arc::clone(shot));
                }
            }
        }

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = selection.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(notice) = notices.recv() => {
                console.handle_live_view(notice);
            }
            chunk = next_chunk(&mut video) => match chunk {
                Some(data) => {
                    chunks += 1;
                    if chunks == 1 || chunks % VIDEO_PROGRESS_EVERY == 0 {
                        info!(chunks, last_len = data.len(), "Video flowing");
                    }
                }
                None => {
                    debug!(chunks, "Live view ended");
                    video = None;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping...");
                break;
            }
        }
    }

    drop(video);
    console.shutdown();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn next_chunk(video: &mut Option<VideoStream>) -> Option<Bytes> {
    match video {
        Some(stream) => stream.next_frame().await,
        None => std::future::pending().await,
    }
}
