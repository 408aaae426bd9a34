//! Play execution over a dedicated scripted session
//!
//! The rendered command is followed by a `printf` of a one-off marker. The
//! run completes when a line equal to the marker comes back; the remote exit
//! status is never consulted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::template::{self, PlayError, PlayParameter};
use super::Play;
use crate::session::{FramingMode, OutputSink, SharedSink, StreamUnit};
use crate::ssh::{ConnectionDescriptor, Transport, TransportFactory};

const MARKER_PREFIX: &str = "SUSHI_PLAY_DONE_";

#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// How long to wait for the marker
    pub timeout: Duration,
    /// Treat a timeout after the remote side closed the session as success.
    ///
    /// Suits plays that end the session themselves (reboot, logout) but can
    /// hide real failures of other commands.
    pub disconnect_counts_as_success: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            disconnect_counts_as_success: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayRunResult {
    pub success: bool,
    pub message: String,
    /// Output lines before the marker
    pub output_lines: Vec<String>,
    pub rendered_command: String,
}

impl PlayRunResult {
    fn failed(message: impl Into<String>, rendered_command: &str) -> Self {
        Self {
            success: false,
            message: message.into(),
            output_lines: Vec::new(),
            rendered_command: rendered_command.to_string(),
        }
    }
}

/// Collects logical lines and releases the waiter on the marker.
///
/// Partial units (idle flushes) are joined with the line that completes
/// them, so a marker split by a flush is still recognised.
struct MarkerWatch {
    marker: String,
    pending: Mutex<String>,
    lines: Mutex<Vec<String>>,
    seen: AtomicBool,
    latch: Notify,
    forward: Option<SharedSink>,
}

impl MarkerWatch {
    fn new(marker: String, forward: Option<SharedSink>) -> Self {
        Self {
            marker,
            pending: Mutex::new(String::new()),
            lines: Mutex::new(Vec::new()),
            seen: AtomicBool::new(false),
            latch: Notify::new(),
            forward,
        }
    }

    fn check(&self, text: &str) {
        if text.trim() == self.marker && !self.seen.swap(true, Ordering::AcqRel) {
            debug!("Play marker observed");
            self.latch.notify_one();
        }
    }

    /// Lines captured before the marker line
    fn output_before_marker(&self) -> Vec<String> {
        let lines = self.lines.lock();
        match lines.iter().position(|l| l.trim() == self.marker) {
            Some(idx) => lines[..idx].to_vec(),
            None => lines.clone(),
        }
    }

    fn all_output(&self) -> Vec<String> {
        let mut lines = self.lines.lock().clone();
        let pending = self.pending.lock();
        if !pending.is_empty() {
            lines.push(pending.clone());
        }
        lines
    }
}

impl OutputSink for MarkerWatch {
    fn deliver(&self, unit: StreamUnit) {
        if let Some(forward) = &self.forward {
            forward.deliver(unit.clone());
        }

        match unit {
            StreamUnit::Partial(text) | StreamUnit::Chunk(text) => {
                let mut pending = self.pending.lock();
                pending.push_str(&text);
                self.check(&pending);
            }
            StreamUnit::Line(text) => {
                let line = {
                    let mut pending = self.pending.lock();
                    pending.push_str(&text);
                    std::mem::take(&mut *pending)
                };
                self.check(&line);
                self.lines.lock().push(line);
            }
        }
    }
}

/// Runs plays, each on its own freshly created transport
pub struct PlayRunner<F: TransportFactory> {
    factory: F,
}

impl<F: TransportFactory> PlayRunner<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Validate, render and run `play` against `descriptor`.
    ///
    /// Local failures (missing values, empty command) never open a
    /// connection. The session is always disconnected before returning.
    /// `on_line` receives every output unit as it arrives.
    pub async fn execute(
        &self,
        play: &Play,
        descriptor: &ConnectionDescriptor,
        values: &HashMap<String, String>,
        options: &PlayOptions,
        on_line: Option<SharedSink>,
    ) -> PlayRunResult {
        let (parameters, rendered) = match prepare(play, values) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Play '{}' rejected: {}", play.name, e);
                return PlayRunResult::failed(e.to_string(), "");
            }
        };

        if let Ok(masked) = template::render_masked(&play.script_template, &parameters, values) {
            debug!("Play '{}' rendered: {}", play.name, masked);
        }

        let marker = format!(
            "{}{}",
            MARKER_PREFIX,
            chrono::Utc::now().timestamp_millis()
        );
        let watch = Arc::new(MarkerWatch::new(marker, on_line));
        let transport = self.factory.create(descriptor);

        info!(
            "Running play '{}' on {}",
            play.name,
            descriptor.display_target()
        );
        let result = run_on(&transport, &watch, &rendered, options).await;
        transport.disconnect().await;

        info!(
            "Play '{}' finished: success={}, {}",
            play.name, result.success, result.message
        );
        result
    }
}

/// Resolve parameters, check values and render the command
fn prepare(
    play: &Play,
    values: &HashMap<String, String>,
) -> Result<(Vec<PlayParameter>, String), PlayError> {
    let parameters = play.parameters()?;
    template::validate_values(&parameters, values)?;

    let rendered = template::render(&play.script_template, values)?;
    if rendered.trim().is_empty() {
        return Err(PlayError::EmptyCommand);
    }
    Ok((parameters, rendered))
}

async fn run_on<T: Transport>(
    transport: &T,
    watch: &Arc<MarkerWatch>,
    rendered: &str,
    options: &PlayOptions,
) -> PlayRunResult {
    let sink: SharedSink = watch.clone();
    if let Err(e) = transport.connect(sink, FramingMode::Scripted).await {
        return PlayRunResult::failed(e.user_message(), rendered);
    }

    let command = format!("{}; printf '\\n{}\\n'", rendered, watch.marker);
    if let Err(e) = transport.send_command(&command).await {
        return PlayRunResult::failed(e.user_message(), rendered);
    }

    let seen = watch.seen.load(Ordering::Acquire)
        || tokio::time::timeout(options.timeout, watch.latch.notified())
            .await
            .is_ok();

    if seen {
        return PlayRunResult {
            success: true,
            message: "Play completed".to_string(),
            output_lines: watch.output_before_marker(),
            rendered_command: rendered.to_string(),
        };
    }

    if transport.is_connected() {
        warn!("Play marker not seen within {:?}", options.timeout);
        return PlayRunResult::failed("Play timed out", rendered);
    }

    if options.disconnect_counts_as_success {
        info!("Remote session closed before the marker; counting play as completed");
        PlayRunResult {
            success: true,
            message: "Play completed (remote session closed)".to_string(),
            output_lines: watch.all_output(),
            rendered_command: rendered.to_string(),
        }
    } else {
        PlayRunResult::failed("Remote session closed before the play completed", rendered)
    }
}
