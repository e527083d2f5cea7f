//! Blocking control loop.
//!
//! ## Per block
//!
//! ```text
//! 1. Receive the next CaptureMessage (bounded wait so `running` is polled)
//! 2. ControlStage::on_buffer_received → staging buffer → detector entry point
//! 3. Broadcast one DetectionEvent (and again on the hotword channel if one fired)
//! 4. Recycle the buffer back to the capture side
//! ```
//!
//! The loop ends when `running` is cleared (after draining what is already
//! queued), when the capture side disconnects, or on a fatal error. In every
//! case the control stage is torn down on this thread before returning.
//!
//! This runs in `spawn_blocking`, keeping the Tokio executor free.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    buffering::{BlockReceiver, RecvTimeoutError},
    control::ControlStage,
    detector::DetectionResult,
    error::SnowmanError,
    ipc::{
        events::{DetectionEvent, EngineStatus, EngineStatusEvent},
        messages::CaptureMessage,
    },
};

/// How long one receive waits before re-checking `running`.
const RECV_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub blocks_captured: AtomicU64,
    pub blocks_dropped: AtomicU64,
    pub blocks_received: AtomicU64,
    pub detection_calls: AtomicU64,
    pub hotwords: AtomicU64,
    pub silences: AtomicU64,
    pub detector_errors: AtomicU64,
    pub invalid_inputs: AtomicU64,
    pub staging_allocations: AtomicU64,
    pub staging_releases: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        for counter in [
            &self.blocks_captured,
            &self.blocks_dropped,
            &self.blocks_received,
            &self.detection_calls,
            &self.hotwords,
            &self.silences,
            &self.detector_errors,
            &self.invalid_inputs,
            &self.staging_allocations,
            &self.staging_releases,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            blocks_received: self.blocks_received.load(Ordering::Relaxed),
            detection_calls: self.detection_calls.load(Ordering::Relaxed),
            hotwords: self.hotwords.load(Ordering::Relaxed),
            silences: self.silences.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            invalid_inputs: self.invalid_inputs.load(Ordering::Relaxed),
            staging_allocations: self.staging_allocations.load(Ordering::Relaxed),
            staging_releases: self.staging_releases.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    /// Blocks the capture stage put on the channel.
    pub blocks_captured: u64,
    /// Blocks lost to the overflow policy.
    pub blocks_dropped: u64,
    pub blocks_received: u64,
    pub detection_calls: u64,
    pub hotwords: u64,
    pub silences: u64,
    /// Detector calls that returned `-1` or another negative code.
    pub detector_errors: u64,
    pub invalid_inputs: u64,
    pub staging_allocations: u64,
    pub staging_releases: u64,
}

/// All context the loop needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub control: ControlStage,
    pub receiver: BlockReceiver,
    pub running: Arc<AtomicBool>,
    pub detection_tx: broadcast::Sender<DetectionEvent>,
    /// Receives only the events that carry a hotword.
    pub hotword_tx: broadcast::Sender<DetectionEvent>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    SourceEnded,
    Fatal,
}

enum Step {
    Continue,
    Fatal,
}

/// Run the control loop until stopped, disconnected or failed, then tear
/// down the control stage.
pub fn run(mut ctx: PipelineContext) -> ExitReason {
    let span = info_span!("control_loop");
    let _guard = span.enter();
    info!("control loop started");
    let started = Instant::now();

    let reason = loop {
        if !ctx.running.load(Ordering::Acquire) {
            let drained = drain(&mut ctx);
            debug!(?drained, "stop requested, queue drained");
            break if drained.is_err() {
                ExitReason::Fatal
            } else {
                ExitReason::Stopped
            };
        }

        match ctx.receiver.recv_timeout(RECV_POLL) {
            Ok(message) => {
                if let Step::Fatal = process(&mut ctx, message) {
                    break ExitReason::Fatal;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // A stopped source also disconnects; report what was asked for.
                if !ctx.running.load(Ordering::Acquire) {
                    break ExitReason::Stopped;
                }
                info!("capture source ended");
                break ExitReason::SourceEnded;
            }
        }
    };

    teardown(&mut ctx, reason);

    let snap = ctx.diagnostics.snapshot();
    info!(
        ?reason,
        elapsed_ms = started.elapsed().as_millis() as u64,
        blocks_captured = snap.blocks_captured,
        blocks_dropped = snap.blocks_dropped,
        blocks_received = snap.blocks_received,
        detection_calls = snap.detection_calls,
        hotwords = snap.hotwords,
        invalid_inputs = snap.invalid_inputs,
        staging_allocations = snap.staging_allocations,
        staging_releases = snap.staging_releases,
        "control loop exited"
    );
    reason
}

/// Process whatever is already queued. `Err` carries the count processed
/// before a fatal error.
fn drain(ctx: &mut PipelineContext) -> std::result::Result<usize, usize> {
    let mut n = 0;
    while let Some(message) = ctx.receiver.try_recv() {
        n += 1;
        if let Step::Fatal = process(ctx, message) {
            return Err(n);
        }
    }
    Ok(n)
}

fn process(ctx: &mut PipelineContext, message: CaptureMessage) -> Step {
    let buffer = message.into_buffer();
    let d = Arc::clone(&ctx.diagnostics);
    d.blocks_received.fetch_add(1, Ordering::Relaxed);
    sync_channel_stats(ctx);

    let step = match ctx.control.on_buffer_received(&buffer) {
        Ok(result) => {
            if !buffer.is_empty() {
                d.detection_calls.fetch_add(1, Ordering::Relaxed);
            }
            match result {
                DetectionResult::Hotword(n) => {
                    d.hotwords.fetch_add(1, Ordering::Relaxed);
                    info!(hotword = n, "hotword detected");
                }
                DetectionResult::Silence => {
                    d.silences.fetch_add(1, Ordering::Relaxed);
                }
                DetectionResult::Error | DetectionResult::Other(_) => {
                    d.detector_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(code = result.code(), "detector reported an error");
                }
                DetectionResult::NoEvent => {}
            }

            let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
            let event = DetectionEvent::new(seq, result, buffer.len(), buffer.element_type());
            // No subscribers is fine.
            if event.hotword.is_some() {
                let _ = ctx.hotword_tx.send(event.clone());
            }
            let _ = ctx.detection_tx.send(event);
            Step::Continue
        }
        Err(SnowmanError::InvalidInputType(element_type)) => {
            d.invalid_inputs.fetch_add(1, Ordering::Relaxed);
            debug!(%element_type, "block skipped");
            Step::Continue
        }
        Err(e) if e.is_fatal() => {
            error!(error = %e, "fatal control stage error");
            set_status(ctx, EngineStatus::Error, Some(e.to_string()));
            ctx.running.store(false, Ordering::Release);
            Step::Fatal
        }
        Err(e) => {
            d.detector_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "block failed");
            Step::Continue
        }
    };

    ctx.receiver.recycle(buffer);
    step
}

fn sync_channel_stats(ctx: &PipelineContext) {
    let channel = ctx.receiver.stats().snapshot();
    ctx.diagnostics
        .blocks_captured
        .store(channel.sent, Ordering::Relaxed);
    ctx.diagnostics
        .blocks_dropped
        .store(channel.dropped, Ordering::Relaxed);
}

fn teardown(ctx: &mut PipelineContext, reason: ExitReason) {
    ctx.running.store(false, Ordering::Release);
    ctx.control.close();
    sync_channel_stats(ctx);

    let staging = ctx.control.staging();
    ctx.diagnostics
        .staging_allocations
        .store(staging.allocations(), Ordering::Relaxed);
    ctx.diagnostics
        .staging_releases
        .store(staging.releases(), Ordering::Relaxed);

    if reason != ExitReason::Fatal {
        let detail = (reason == ExitReason::SourceEnded).then(|| "capture source ended".to_string());
        set_status(ctx, EngineStatus::Stopped, detail);
    }
}

fn set_status(ctx: &PipelineContext, status: EngineStatus, detail: Option<String>) {
    *ctx.status.lock() = status;
    let _ = ctx.status_tx.send(EngineStatusEvent { status, detail });
}
