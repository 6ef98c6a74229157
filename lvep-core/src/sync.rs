//! Playback clocks
//!
//! The video scheduler asks a [`FrameSync`] which moment of the stream should
//! be on screen. [`DeltaSync`] advances with wall-clock time; [`AudioSync`]
//! follows an [`AudioClock`] fed by the audio output so video stays slaved to
//! what is actually being heard.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

// ============================================================================
// Wall-clock sources
// ============================================================================

/// Seconds since an arbitrary fixed origin.
pub trait Timer: Send + Sync {
    fn now(&self) -> f64;
}

pub struct MonotonicTimer {
    origin: Instant,
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for MonotonicTimer {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Externally stepped time for fixed-step hosts. Clones share one clock.
#[derive(Clone, Default)]
pub struct ManualTimer {
    time: Arc<Mutex<f64>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        *self.time.lock() = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *self.time.lock() += seconds;
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> f64 {
        *self.time.lock()
    }
}

// ============================================================================
// Audio clock
// ============================================================================

/// Audio clock - updated from the audio output callback
pub struct AudioClock {
    pts_us: AtomicI64,
    sample_rate: u32,
    samples_played: AtomicU64,
    playing: AtomicBool,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            pts_us: AtomicI64::new(0),
            sample_rate: sample_rate.max(1),
            samples_played: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }

    /// Anchor the clock at `pts_us` and restart sample counting.
    pub fn update(&self, pts_us: i64) {
        self.pts_us.store(pts_us, Ordering::SeqCst);
        self.samples_played.store(0, Ordering::SeqCst);
    }

    pub fn add_samples(&self, n: u64) {
        self.samples_played.fetch_add(n, Ordering::SeqCst);
    }

    pub fn time_us(&self) -> i64 {
        let base = self.pts_us.load(Ordering::SeqCst);
        if !self.playing.load(Ordering::SeqCst) {
            return base;
        }
        let samples = self.samples_played.load(Ordering::SeqCst);
        base + (samples as i64 * 1_000_000) / self.sample_rate as i64
    }

    pub fn time_secs(&self) -> f64 {
        self.time_us() as f64 / 1_000_000.0
    }

    pub fn set_playing(&self, playing: bool) {
        if !playing && self.playing.load(Ordering::SeqCst) {
            // Fold counted samples into the anchor so pausing freezes the position
            self.update(self.time_us());
        }
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Frame sync
// ============================================================================

pub trait FrameSync: Send {
    /// Playback position in seconds.
    fn position(&self) -> f64;
    /// Feed wall-clock seconds elapsed since the previous call.
    fn update(&mut self, dt: f64);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, seconds: f64);
    fn is_playing(&self) -> bool;
}

/// Accumulates wall-clock deltas while playing.
#[derive(Debug, Clone)]
pub struct DeltaSync {
    time: f64,
    speed: f64,
    playing: bool,
}

impl DeltaSync {
    /// Starts at zero, already playing.
    pub fn new() -> Self {
        Self {
            time: 0.0,
            speed: 1.0,
            playing: true,
        }
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(0.0);
    }
}

impl Default for DeltaSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync for DeltaSync {
    fn position(&self) -> f64 {
        self.time
    }

    fn update(&mut self, dt: f64) {
        if self.playing {
            self.time += dt * self.speed;
        }
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, seconds: f64) {
        self.time = seconds;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Reads the position straight off a shared [`AudioClock`].
pub struct AudioSync {
    clock: Arc<AudioClock>,
}

impl AudioSync {
    pub fn new(clock: Arc<AudioClock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> Arc<AudioClock> {
        self.clock.clone()
    }
}

impl FrameSync for AudioSync {
    fn position(&self) -> f64 {
        self.clock.time_secs()
    }

    fn update(&mut self, _dt: f64) {}

    fn play(&mut self) {
        self.clock.set_playing(true);
    }

    fn pause(&mut self) {
        self.clock.set_playing(false);
    }

    fn seek(&mut self, seconds: f64) {
        self.clock.update((seconds * 1_000_000.0) as i64);
    }

    fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }
}
