//! # Video Stream
//!
//! Keeps a "correct frame for now" ready for the host renderer.
//!
//! ```text
//! Timer ──dt──► FrameSync ──position──► fill_back_buffer ──► back ─┐
//!                                            ▲                     │ swap_buffers
//!                                     MediaStream<Video>   front ◄─┘
//! ```
//!
//! Each render tick the playback position is compared against the pending
//! decoded frame. Small lags decode forward, large lags seek, and a position
//! behind the last delivered frame (an external rewind) triggers a resync.
//! Decoding only ever writes the back buffer; the host reads the front one.

use std::sync::Arc;

use crate::codec::VideoFrame;
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::host::VideoSource;
use crate::io::{FileData, IoBridge, SharedFile};
use crate::stream::{MediaStream, Video};
use crate::sync::{DeltaSync, FrameSync, MonotonicTimer, Timer};

// ============================================================================
// Frame buffer
// ============================================================================

/// Planar 4:2:0 picture handed to the host. Chroma planes are
/// `width / 2` x `height / 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct YuvFrame {
    pub width: usize,
    pub height: usize,
    pub chroma_width: usize,
    pub chroma_height: usize,
    pub y: Box<[u8]>,
    pub cb: Box<[u8]>,
    pub cr: Box<[u8]>,
}

impl YuvFrame {
    pub fn new(width: usize, height: usize) -> Self {
        let (chroma_width, chroma_height) = (width / 2, height / 2);
        Self {
            width,
            height,
            chroma_width,
            chroma_height,
            y: vec![0; width * height].into_boxed_slice(),
            cb: vec![0; chroma_width * chroma_height].into_boxed_slice(),
            cr: vec![0; chroma_width * chroma_height].into_boxed_slice(),
        }
    }

    /// Copy the three planes of `frame`, dropping stride padding. A frame of a
    /// different size only fills the overlapping region.
    pub fn copy_from(&mut self, frame: &VideoFrame) {
        let (cw, ch) = (self.chroma_width, self.chroma_height);
        let planes: [(&mut [u8], usize, usize); 3] = [
            (&mut self.y, self.width, self.height),
            (&mut self.cb, cw, ch),
            (&mut self.cr, cw, ch),
        ];

        for (plane, (dst, width, height)) in planes.into_iter().enumerate() {
            for row in 0..height {
                let wanted = width.min(frame.linesize[plane]);
                let Some(src) = frame.row(plane, row, wanted) else {
                    break;
                };
                dst[row * width..row * width + src.len()].copy_from_slice(src);
            }
        }
    }
}

// ============================================================================
// Stream
// ============================================================================

pub struct VideoStream {
    stream: MediaStream<Video>,
    /// Next frame waiting for its presentation time
    frame: VideoFrame,
    front: YuvFrame,
    back: YuvFrame,
    dirty: bool,
    end_of_stream: bool,
    sync: Box<dyn FrameSync>,
    timer: Arc<dyn Timer>,
    previous_time: f64,
    /// Presentation time of the last frame copied to the back buffer
    previous_frame: f64,
    far_seek_threshold: f64,
    near_seek_threshold: f64,
    fine_seek_limit: usize,
}

impl VideoStream {
    pub fn new(io: IoBridge, config: &LvepConfig) -> Result<Self> {
        Self::with_timer(io, config, Arc::new(MonotonicTimer::new()))
    }

    pub fn with_timer(io: IoBridge, config: &LvepConfig, timer: Arc<dyn Timer>) -> Result<Self> {
        let mut stream = MediaStream::<Video>::with_config(io, config)?;

        let mut frame = VideoFrame::default();
        if !stream.read_frame(&mut frame) {
            return Err(LvepError::NoFirstFrame);
        }

        let (width, height) = (frame.width as usize, frame.height as usize);
        let previous_time = timer.now();
        tracing::debug!("{}: {}x{} video", stream.filename(), width, height);

        Ok(Self {
            stream,
            frame,
            front: YuvFrame::new(width, height),
            back: YuvFrame::new(width, height),
            dirty: false,
            end_of_stream: false,
            sync: Box::new(DeltaSync::new()),
            timer,
            previous_time,
            previous_frame: 0.0,
            far_seek_threshold: config.far_seek_threshold,
            near_seek_threshold: config.near_seek_threshold,
            fine_seek_limit: config.fine_seek_limit,
        })
    }

    pub fn from_file(file: SharedFile, config: &LvepConfig, timer: Arc<dyn Timer>) -> Result<Self> {
        Self::with_timer(IoBridge::from_file(file)?, config, timer)
    }

    pub fn from_data(data: &FileData, config: &LvepConfig, timer: Arc<dyn Timer>) -> Result<Self> {
        Self::with_timer(IoBridge::from_data(data), config, timer)
    }

    pub fn set_sync(&mut self, sync: Box<dyn FrameSync>) {
        self.sync = sync;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn stream(&self) -> &MediaStream<Video> {
        &self.stream
    }

    fn frame_time(&self) -> f64 {
        self.stream.translate_timestamp(self.frame.pts)
    }

    /// Decode forward until the pending frame reaches `target`.
    fn fine_seek(&mut self, target: f64) {
        let mut decoded = 0;
        while self.frame_time() < target {
            if decoded >= self.fine_seek_limit {
                tracing::warn!(
                    "{}: gave up fast-forwarding to {:.3}s after {} frames",
                    self.stream.filename(),
                    target,
                    decoded
                );
                return;
            }
            if !self.stream.read_frame(&mut self.frame) {
                self.end_of_stream = true;
                return;
            }
            decoded += 1;
        }
    }

    /// Land on the keyframe before `target`, then walk up to it.
    fn resync(&mut self, target: f64) {
        self.stream.seek(target);
        if !self.stream.read_frame(&mut self.frame) {
            tracing::warn!("{}: nothing to decode at {:.3}s", self.stream.filename(), target);
        }
        self.fine_seek(target);
        self.end_of_stream = false;
        self.previous_frame = target;
    }
}

impl VideoSource for VideoStream {
    fn width(&self) -> u32 {
        self.front.width as u32
    }

    fn height(&self) -> u32 {
        self.front.height as u32
    }

    fn filename(&self) -> &str {
        self.stream.filename()
    }

    fn fill_back_buffer(&mut self) {
        let now = self.timer.now();
        let dt = now - self.previous_time;
        self.previous_time = now;

        self.sync.update(dt);
        let time = self.sync.position();

        // Behind the last delivered frame: the position was rewound
        if time < self.previous_frame {
            tracing::debug!("{}: resync to {:.3}s", self.stream.filename(), time);
            self.resync(time);
        }

        if self.end_of_stream {
            return;
        }

        let pts = self.frame_time();
        if time < pts {
            return;
        }

        if time > pts + self.far_seek_threshold {
            self.stream.seek(time);
            self.stream.read_frame(&mut self.frame);
        } else if time > pts + self.near_seek_threshold {
            self.fine_seek(time);
        }

        self.back.copy_from(&self.frame);
        self.dirty = true;
        // Fine seeking can copy a frame stamped past the clock
        self.previous_frame = time.min(self.frame_time());

        if !self.stream.read_frame(&mut self.frame) {
            self.end_of_stream = true;
        }
    }

    fn front_buffer(&self) -> &YuvFrame {
        &self.front
    }

    fn size(&self) -> usize {
        std::mem::size_of::<YuvFrame>()
    }

    fn swap_buffers(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        std::mem::swap(&mut self.front, &mut self.back);
        true
    }

    fn play(&mut self) {
        self.sync.play();
    }

    fn pause(&mut self) {
        self.sync.pause();
    }

    fn seek(&mut self, seconds: f64) {
        self.sync.seek(seconds);
    }

    fn tell(&self) -> f64 {
        self.sync.position()
    }

    fn is_playing(&self) -> bool {
        self.sync.is_playing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{AudioClock, AudioSync, ManualTimer};
    use crate::test_support::{y4m_420, y4m_with_header};

    fn open(frames: usize, config: &LvepConfig) -> (VideoStream, ManualTimer) {
        let timer = ManualTimer::new();
        let data = FileData::new("clip.y4m", y4m_420(8, 8, 25, frames));
        let video = VideoStream::from_data(&data, config, Arc::new(timer.clone())).unwrap();
        (video, timer)
    }

    fn tick(video: &mut VideoStream, timer: &ManualTimer, dt: f64) -> bool {
        timer.advance(dt);
        video.fill_back_buffer();
        video.swap_buffers()
    }

    #[test]
    fn test_plays_ten_seconds() {
        let timer = ManualTimer::new();
        let data = FileData::new("clip.y4m", y4m_420(16, 16, 25, 250));
        let mut video =
            VideoStream::from_data(&data, &LvepConfig::default(), Arc::new(timer.clone())).unwrap();
        assert_eq!((video.width(), video.height()), (16, 16));
        assert_eq!(video.front_buffer().cb.len(), 64);

        let mut swaps = 0;
        for k in 1..=250 {
            timer.set(k as f64 / 25.0);
            video.fill_back_buffer();
            if video.swap_buffers() {
                swaps += 1;
                assert_eq!(video.front_buffer().y[0], (k - 1) as u8);
            }
            assert_eq!(video.is_end_of_stream(), k == 250, "tick {}", k);
        }
        assert_eq!(swaps, 250);

        timer.set(11.0);
        video.fill_back_buffer();
        assert!(!video.swap_buffers());
    }

    #[test]
    fn test_swap_without_new_frame() {
        let (mut video, timer) = open(25, &LvepConfig::default());
        assert!(tick(&mut video, &timer, 0.02));
        assert!(!video.swap_buffers());

        // Too early for the next frame
        assert!(!tick(&mut video, &timer, 0.0));
    }

    #[test]
    fn test_rewind_resyncs() {
        let (mut video, timer) = open(100, &LvepConfig::default());
        for _ in 0..20 {
            tick(&mut video, &timer, 0.04);
        }
        assert!(video.front_buffer().y[0] >= 18);

        video.seek(0.0);
        let mut shown = None;
        for _ in 0..3 {
            if tick(&mut video, &timer, 0.04) {
                shown = Some(video.front_buffer().y[0]);
                break;
            }
        }
        assert!(shown.unwrap() <= 5);
        assert!(!video.is_end_of_stream());
    }

    #[test]
    fn test_coarse_seek() {
        let (mut video, timer) = open(750, &LvepConfig::default());
        video.seek(20.0);
        assert!(tick(&mut video, &timer, 0.02));
        // Frame 500, wrapped into a byte
        assert_eq!(video.front_buffer().y[0], (500 % 256) as u8);
    }

    #[test]
    fn test_fine_seek_reaches_target() {
        let (mut video, timer) = open(250, &LvepConfig::default());
        video.seek(5.0);
        assert!(tick(&mut video, &timer, 0.02));
        let shown = video.front_buffer().y[0] as f64 / 25.0;
        assert!(shown >= 5.02, "showed frame at {}", shown);
        assert!(shown < 5.02 + 0.04 + 1e-9);
    }

    #[test]
    fn test_no_resync_after_fast_forward() {
        let (mut video, timer) = open(250, &LvepConfig::default());
        video.seek(5.0);
        assert!(tick(&mut video, &timer, 0.02));
        assert_eq!(video.front_buffer().y[0], 126);
        assert!(video.previous_frame <= 5.02 + 1e-9);

        // Still before frame 127 at 5.08; frame 126 must not come back
        assert!(!tick(&mut video, &timer, 0.01));
        assert!(!tick(&mut video, &timer, 0.02));
        assert!(tick(&mut video, &timer, 0.04));
        assert_eq!(video.front_buffer().y[0], 127);
    }

    #[test]
    fn test_fine_seek_limit() {
        let config = LvepConfig {
            fine_seek_limit: 10,
            ..Default::default()
        };
        let (mut video, timer) = open(250, &config);
        video.seek(5.0);
        assert!(tick(&mut video, &timer, 0.02));
        assert_eq!(video.front_buffer().y[0], 10);
    }

    #[test]
    fn test_fine_seek_stops_at_end() {
        let (mut video, timer) = open(10, &LvepConfig::default());
        video.seek(5.0);
        assert!(tick(&mut video, &timer, 0.02));
        assert_eq!(video.front_buffer().y[0], 9);
        assert!(video.is_end_of_stream());
    }

    #[test]
    fn test_pause_holds_position() {
        let (mut video, timer) = open(50, &LvepConfig::default());
        tick(&mut video, &timer, 0.04);
        video.pause();
        assert!(!video.is_playing());

        let before = video.tell();
        tick(&mut video, &timer, 1.0);
        assert_eq!(video.tell(), before);
        assert!(!tick(&mut video, &timer, 1.0));

        video.play();
        assert!(tick(&mut video, &timer, 0.06));
    }

    #[test]
    fn test_audio_sync() {
        let (mut video, timer) = open(50, &LvepConfig::default());
        let clock = Arc::new(AudioClock::new(1000));
        video.set_sync(Box::new(AudioSync::new(clock.clone())));
        video.play();

        clock.add_samples(400);
        assert!(tick(&mut video, &timer, 0.0));
        assert_eq!(video.front_buffer().y[0], 10);
    }

    #[test]
    fn test_no_first_frame() {
        // A full frame's worth of bytes, but behind a malformed frame line
        let mut payload = b"JUNK\n".to_vec();
        payload.resize(5 + 96, 0);
        let data = FileData::new("broken.y4m", y4m_with_header("W8 H8 F25:1", &payload));
        let timer = Arc::new(ManualTimer::new());
        let result = VideoStream::from_data(&data, &LvepConfig::default(), timer);
        assert!(matches!(result, Err(LvepError::NoFirstFrame)));
    }

    #[test]
    fn test_frame_struct_size() {
        let (video, _timer) = open(1, &LvepConfig::default());
        assert_eq!(video.size(), std::mem::size_of::<YuvFrame>());
        assert_eq!(video.filename(), "clip.y4m");
    }
}
