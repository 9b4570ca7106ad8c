//! # Render Module
//!
//! The render engine and the thread that drives it.
//!
//! ## Plain English Explanation
//!
//! [`RenderEngine`] owns the GPU context and runs the filter chain once
//! per camera frame. It is not thread-safe and does not need to be: it
//! lives on exactly one [`RenderThread`].
//!
//! Everyone else talks to it through a [`RenderDispatcher`], which puts
//! each request on a queue and returns immediately. The render thread
//! handles requests strictly in order.
//!
//! ```text
//! UI thread ──┐
//!             ├──► [queue] ──► render thread ──► RenderEngine ──► GPU
//! camera  ────┘
//! ```

pub mod dispatcher;
pub mod engine;
pub mod geometry;

use std::sync::atomic::{AtomicU64, Ordering};

pub use dispatcher::{RenderCommand, RenderDispatcher, RenderThread};
pub use engine::{PictureCallback, RenderCallback, RenderEngine, RenderState};
pub use geometry::{PipelineGeometry, ScaleType};

// ============================================
// STATISTICS
// ============================================

/// Counters shared between the engine and whoever watches it.
#[derive(Debug, Default)]
pub struct RenderStats {
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_coalesced: AtomicU64,
    pictures_taken: AtomicU64,
}

/// Point-in-time copy of [`RenderStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStatsSnapshot {
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    /// Frame requests merged into one already queued
    pub frames_coalesced: u64,
    pub pictures_taken: u64,
}

impl RenderStats {
    pub(crate) fn record_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.frames_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_picture(&self) {
        self.pictures_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_coalesced: self.frames_coalesced.load(Ordering::Relaxed),
            pictures_taken: self.pictures_taken.load(Ordering::Relaxed),
        }
    }
}
