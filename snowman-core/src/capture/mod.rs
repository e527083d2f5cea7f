//! Capture stage: runs on the realtime audio thread.
//!
//! # Design constraints
//!
//! `on_audio_block` is called once per rendering quantum on a hard deadline.
//! It must not:
//! - Block (all channel operations are `try_*`)
//! - Perform I/O
//! - Allocate without bound
//!
//! In steady state it performs no allocation at all: each block is encoded
//! into a buffer recycled by the control side, falling back to a fresh
//! quantum-sized allocation only while the recycle queue is still warming up.

pub mod convert;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::buffering::{BlockSender, SendOutcome};
use crate::ipc::messages::CaptureMessage;

pub use convert::{convert, convert_into, f32_to_i16, ConversionMode};

/// Counters written from the realtime thread.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks_in: AtomicU64,
    pub blocks_forwarded: AtomicU64,
    pub blocks_skipped: AtomicU64,
}

pub struct CaptureStage {
    mode: ConversionMode,
    sender: BlockSender,
    stats: Arc<CaptureStats>,
    /// Set once the overflow warning has been logged for the current run.
    overflow_reported: bool,
}

impl CaptureStage {
    pub fn new(mode: ConversionMode, sender: BlockSender) -> Self {
        Self {
            mode,
            sender,
            stats: Arc::new(CaptureStats::default()),
            overflow_reported: false,
        }
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Encode and forward one rendering quantum.
    ///
    /// An absent or empty block (no input connected) sends nothing. Returns
    /// `true` while the stage should be kept alive, `false` once the control
    /// stage has gone away.
    pub fn on_audio_block(&mut self, block: Option<&[f32]>) -> bool {
        let Some(block) = block.filter(|b| !b.is_empty()) else {
            self.stats.blocks_skipped.fetch_add(1, Ordering::Relaxed);
            return !self.sender.is_closed();
        };
        self.stats.blocks_in.fetch_add(1, Ordering::Relaxed);

        let mut buffer = self
            .sender
            .take_spare()
            .unwrap_or_else(|| self.mode.empty_buffer(block.len()));
        convert_into(self.mode, block, &mut buffer);

        match self.sender.send(CaptureMessage::detect(buffer)) {
            SendOutcome::Queued => {
                self.overflow_reported = false;
                self.stats.blocks_forwarded.fetch_add(1, Ordering::Relaxed);
                true
            }
            outcome @ (SendOutcome::QueuedAfterEviction | SendOutcome::Dropped) => {
                if outcome == SendOutcome::QueuedAfterEviction {
                    self.stats.blocks_forwarded.fetch_add(1, Ordering::Relaxed);
                }
                if !self.overflow_reported {
                    self.overflow_reported = true;
                    warn!(
                        policy = ?self.sender.policy(),
                        "block queue full: control stage is falling behind"
                    );
                }
                true
            }
            SendOutcome::Disconnected => false,
        }
    }
}
