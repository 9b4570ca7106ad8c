//! # Input Module
//!
//! The capture button: turns presses and releases into "take a picture",
//! "start recording" and "stop recording".
//!
//! ## Plain English
//!
//! One button does everything:
//! - A quick tap takes a photo
//! - Holding it for half a second starts a recording
//! - Letting go stops the recording
//!
//! A recording that is too short is thrown away instead of saved. While a
//! photo or video is being processed the button is "banned" and ignores
//! everything until the coordinator resets it.
//!
//! Time comes from a [`Clock`] so tests can move it forward by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Config;

// ============================================
// CAPTURE MODE
// ============================================

/// What the button is allowed to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonState {
    /// Tap for a photo; long presses do nothing
    OnlyCapture = 0,
    /// Hold to record; taps do nothing
    OnlyRecorder = 1,
    /// Both
    #[default]
    Both = 2,
}

impl ButtonState {
    /// Maps the host's numeric mode. Unknown values are `None`.
    pub fn from_mode(mode: i32) -> Option<Self> {
        match mode {
            0 => Some(Self::OnlyCapture),
            1 => Some(Self::OnlyRecorder),
            2 => Some(Self::Both),
            _ => None,
        }
    }

    pub fn can_record(self) -> bool {
        matches!(self, Self::OnlyRecorder | Self::Both)
    }

    pub fn can_take_picture(self) -> bool {
        matches!(self, Self::OnlyCapture | Self::Both)
    }
}

// ============================================
// CLOCK
// ============================================

/// Millisecond time source for gesture timing.
pub trait Clock: Send + Sync {
    /// Milliseconds since some fixed start point.
    fn now_ms(&self) -> u64;
}

/// Wall clock, counted from construction.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================
// GESTURES
// ============================================

/// Where the button is in a gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    /// Finger down, not yet a long press
    Pressed,
    /// Long press detected, waiting for the recording to start
    LongPress,
    Recording,
    /// A photo or video is in flight; input is ignored
    Banned,
}

/// What a gesture asks the coordinator to do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GestureEvent {
    TakePicture,
    RecordStart,
    /// Released before the minimum duration
    RecordShort { duration_ms: u64 },
    /// Released (or hit the maximum) after the minimum duration
    RecordEnd { duration_ms: u64 },
    /// Finger dragged while recording; positive is upwards
    RecordZoom(f32),
}

/// Gesture state machine for the capture button.
pub struct CaptureButton {
    mode: ButtonState,
    state: GestureState,
    clock: Arc<dyn Clock>,

    long_press_ms: u64,
    min_record_ms: u64,
    max_record_ms: u64,

    /// When the finger went down
    pressed_at: u64,

    /// When the recording actually started
    recording_since: Option<u64>,
}

impl CaptureButton {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode: config.button_mode,
            state: GestureState::Idle,
            clock,
            long_press_ms: config.long_press_ms,
            min_record_ms: config.min_record_ms,
            max_record_ms: config.max_record_ms,
            pressed_at: 0,
            recording_since: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn mode(&self) -> ButtonState {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ButtonState) {
        self.mode = mode;
    }

    pub fn is_idle(&self) -> bool {
        self.state == GestureState::Idle
    }

    /// Milliseconds recorded so far, 0 when not recording.
    pub fn recorded_ms(&self) -> u64 {
        self.recording_since
            .map(|since| self.clock.now_ms().saturating_sub(since))
            .unwrap_or(0)
    }

    /// Finger down. Ignored unless idle.
    pub fn press(&mut self) {
        if self.state != GestureState::Idle {
            log::trace!("press ignored in {:?}", self.state);
            return;
        }
        self.state = GestureState::Pressed;
        self.pressed_at = self.clock.now_ms();
    }

    /// Advances timers: detects the long press and the maximum duration.
    pub fn tick(&mut self) -> Option<GestureEvent> {
        let now = self.clock.now_ms();
        match self.state {
            GestureState::Pressed
                if self.mode.can_record()
                    && now.saturating_sub(self.pressed_at) >= self.long_press_ms =>
            {
                self.state = GestureState::LongPress;
                Some(GestureEvent::RecordStart)
            }
            GestureState::Recording if self.recorded_ms() >= self.max_record_ms => {
                log::info!("Maximum recording length reached");
                Some(self.finish_recording())
            }
            _ => None,
        }
    }

    /// The device confirmed the recording is running.
    pub fn recording_started(&mut self) {
        if self.state == GestureState::LongPress {
            self.state = GestureState::Recording;
            self.recording_since = Some(self.clock.now_ms());
        }
    }

    /// Finger up. A press only becomes a long press through [`tick`](Self::tick).
    pub fn release(&mut self) -> Option<GestureEvent> {
        match self.state {
            GestureState::Pressed if self.mode.can_take_picture() => {
                self.state = GestureState::Banned;
                Some(GestureEvent::TakePicture)
            }
            GestureState::Pressed => {
                self.state = GestureState::Idle;
                None
            }
            GestureState::LongPress | GestureState::Recording => Some(self.finish_recording()),
            GestureState::Idle | GestureState::Banned => None,
        }
    }

    /// Vertical drag while recording.
    pub fn drag(&mut self, delta_y: f32) -> Option<GestureEvent> {
        (self.state == GestureState::Recording && self.mode.can_record())
            .then_some(GestureEvent::RecordZoom(delta_y))
    }

    /// Blocks input while an operation is in flight.
    pub fn ban(&mut self) {
        self.state = GestureState::Banned;
    }

    /// Back to idle; the in-flight operation is over.
    pub fn reset(&mut self) {
        self.state = GestureState::Idle;
        self.recording_since = None;
    }

    fn finish_recording(&mut self) -> GestureEvent {
        let duration_ms = self.recorded_ms();
        self.recording_since = None;
        self.state = GestureState::Banned;
        if duration_ms < self.min_record_ms {
            GestureEvent::RecordShort { duration_ms }
        } else {
            GestureEvent::RecordEnd { duration_ms }
        }
    }
}

// ============================================
// TESTS
// ============================================
