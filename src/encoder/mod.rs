//! # Video Encoder Module
//!
//! JPEG compression and the constant-frame-rate video recorder.
//!
//! ## Plain English Explanation
//!
//! While the user holds the button, every camera frame is handed to a
//! writer thread. The writer squeezes each one into a JPEG and appends it
//! to the file, so the recording is a flipbook of photos (Motion JPEG).
//!
//! The hand-off queue is short. When the writer falls behind, new frames
//! are thrown away at the door instead of piling up in memory.
//!
//! Cameras do not deliver frames on a perfect beat, but players assume
//! one. The writer fixes that up: if two frames arrive in the same time
//! slot the extra one is dropped, and if a slot is missed the previous
//! picture is written again.
//!
//! ```text
//!   camera thread           writer thread                 VID_....mjpeg
//!   ┌───────────┐ channel ┌─────────────────────┐       ┌──┬──┬──┬──┐
//!   │ frames    │ ──────▶ │ rotate → JPEG → pace│ ────▶ │1 │2 │2 │3 │
//!   └───────────┘         └─────────────────────┘       └──┴──┴──┴──┘
//! ```

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ColorType, RgbaImage};
use parking_lot::Mutex;

use crate::capture::{CameraFrame, RecordingCallback};
use crate::error::EncoderError;

// ============================================
// FRAME COMPRESSOR
// ============================================

/// Compresses raw frame data to JPEG format.
///
/// ## Quality Guidelines
/// - 90-100: Visually lossless, larger files
/// - 70-85: Good quality, reasonable size
/// - 50-70: Noticeable artifacts, small files
pub struct FrameCompressor {
    quality: u8,
}

impl FrameCompressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Compresses raw RGBA pixels to JPEG. Alpha is dropped.
    pub fn compress(&self, raw_rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, EncoderError> {
        let expected = width as usize * height as usize * 4;
        if raw_rgba.len() != expected {
            return Err(EncoderError::InvalidFrame {
                expected,
                got: raw_rgba.len(),
            });
        }

        let rgb: Vec<u8> = raw_rgba
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect();

        let mut output = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut output, self.quality)
            .encode(&rgb, width, height, ColorType::Rgb8)
            .map_err(|e| EncoderError::Compression(e.to_string()))?;
        Ok(output.into_inner())
    }

    pub fn compress_image(&self, image: &RgbaImage) -> Result<Vec<u8>, EncoderError> {
        self.compress(image.as_raw(), image.width(), image.height())
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for FrameCompressor {
    fn default() -> Self {
        Self::new(80)
    }
}

// ============================================
// VIDEO RECORDER
// ============================================

/// Recorder output settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecorderSettings {
    /// Constant output frame rate
    pub fps: u32,
    /// JPEG quality of each frame
    pub quality: u8,
    /// Clockwise rotation applied to every frame (0/90/180/270)
    pub rotation: u32,
    /// Frames allowed to wait for the writer; extras are dropped
    pub queue_capacity: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            quality: 80,
            rotation: 0,
            queue_capacity: 8,
        }
    }
}

enum RecorderMessage {
    Frame(CameraFrame),
    Stop,
    Cancel,
}

enum Outcome {
    Finished(u64),
    Cancelled,
}

type SharedCallback = Arc<Mutex<Option<RecordingCallback>>>;

/// Writes a frame stream to a Motion JPEG file on a background thread.
///
/// The completion callback fires exactly once: with the file after a
/// successful [`stop`](Self::stop), with `None` on cancel, error, drop, or
/// when no frame was ever written. Failed recordings leave no file behind.
pub struct VideoRecorder {
    path: PathBuf,
    sender: Sender<RecorderMessage>,
    worker: Option<JoinHandle<()>>,
    queue_capacity: usize,
    frames_dropped: Arc<AtomicU64>,
}

impl VideoRecorder {
    /// Creates the file and starts the writer thread.
    ///
    /// On error the callback has already been called with `None`.
    pub fn start(
        path: PathBuf,
        settings: RecorderSettings,
        on_complete: RecordingCallback,
    ) -> Result<Self, EncoderError> {
        let file = match File::create(&path) {
            Ok(file) => file,
            Err(e) => {
                on_complete(None);
                return Err(e.into());
            }
        };

        let callback: SharedCallback = Arc::new(Mutex::new(Some(on_complete)));
        let queue_capacity = settings.queue_capacity.max(1);
        let (sender, receiver) = bounded(queue_capacity);

        let thread_path = path.clone();
        let thread_callback = Arc::clone(&callback);
        let spawned = thread::Builder::new()
            .name("billie-recorder".into())
            .spawn(move || {
                let outcome = write_stream(file, &receiver, settings);
                finish(&thread_path, outcome, &thread_callback);
            });

        match spawned {
            Ok(worker) => {
                log::info!(
                    "Recording to {:?} @ {} fps, rotation {}",
                    path,
                    settings.fps,
                    settings.rotation
                );
                Ok(Self {
                    path,
                    sender,
                    worker: Some(worker),
                    queue_capacity,
                    frames_dropped: Arc::new(AtomicU64::new(0)),
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                if let Some(on_complete) = callback.lock().take() {
                    on_complete(None);
                }
                Err(e.into())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a frame; never blocks the camera thread.
    ///
    /// The frame is dropped when the writer is `queue_capacity` frames behind.
    pub fn push(&self, frame: CameraFrame) {
        match self.sender.try_send(RecorderMessage::Frame(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 30 == 1 {
                    log::debug!("Recorder queue full, {} frames dropped", dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Frames waiting for the writer.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Frames turned away because the queue was full.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Writes out the queued frames and closes the file.
    pub fn stop(mut self) {
        self.shut_down(RecorderMessage::Stop);
    }

    /// Abandons the recording and deletes the file.
    pub fn cancel(mut self) {
        self.shut_down(RecorderMessage::Cancel);
    }

    fn shut_down(&mut self, message: RecorderMessage) {
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(message);
            if worker.join().is_err() {
                log::error!("Recorder thread panicked");
            }
        }
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        self.shut_down(RecorderMessage::Cancel);
    }
}

// ----------------------------------------
// Writer thread
// ----------------------------------------

fn write_stream(
    file: File,
    receiver: &Receiver<RecorderMessage>,
    settings: RecorderSettings,
) -> Result<Outcome, EncoderError> {
    let mut writer = BufWriter::new(file);
    let compressor = FrameCompressor::new(settings.quality);
    let interval_ns = 1_000_000_000 / settings.fps.max(1) as u64;
    let max_repeat = settings.fps.max(1) as u64;

    let mut first_timestamp: Option<u64> = None;
    let mut written = 0u64;
    let mut dropped = 0u64;
    let mut previous: Option<Vec<u8>> = None;

    loop {
        let frame = match receiver.recv() {
            Ok(RecorderMessage::Frame(frame)) => frame,
            Ok(RecorderMessage::Stop) => break,
            Ok(RecorderMessage::Cancel) | Err(_) => return Ok(Outcome::Cancelled),
        };

        let first = *first_timestamp.get_or_insert(frame.timestamp_ns);
        // Number of output frames that should exist once this one is written
        let slot = frame.timestamp_ns.saturating_sub(first) / interval_ns + 1;
        if slot <= written {
            dropped += 1;
            continue;
        }

        let jpeg = compressor.compress_image(&upright(&frame.image, settings.rotation))?;

        if let Some(prev) = &previous {
            let gap = slot - written - 1;
            for _ in 0..gap.min(max_repeat) {
                writer.write_all(prev)?;
                written += 1;
            }
        }
        writer.write_all(&jpeg)?;
        written += 1;
        previous = Some(jpeg);
    }

    writer.flush()?;
    log::debug!("Recorder wrote {} frames, dropped {}", written, dropped);
    Ok(Outcome::Finished(written))
}

fn finish(path: &Path, outcome: Result<Outcome, EncoderError>, callback: &SharedCallback) {
    let result = match outcome {
        Ok(Outcome::Finished(frames)) if frames > 0 => {
            log::info!("Recording finished: {:?} ({} frames)", path, frames);
            Some(path.to_path_buf())
        }
        Ok(Outcome::Finished(_)) => {
            log::warn!("Recording produced no frames: {:?}", path);
            None
        }
        Ok(Outcome::Cancelled) => {
            log::info!("Recording cancelled: {:?}", path);
            None
        }
        Err(e) => {
            log::warn!("Recording failed: {}", e);
            None
        }
    };

    if result.is_none() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Could not delete {:?}: {}", path, e);
        }
    }
    if let Some(on_complete) = callback.lock().take() {
        on_complete(result);
    }
}

/// Rotates a sensor-order frame clockwise by `rotation` degrees.
fn upright(image: &RgbaImage, rotation: u32) -> Cow<'_, RgbaImage> {
    match rotation % 360 {
        90 => Cow::Owned(imageops::rotate90(image)),
        180 => Cow::Owned(imageops::rotate180(image)),
        270 => Cow::Owned(imageops::rotate270(image)),
        _ => Cow::Borrowed(image),
    }
}

// ============================================
// MJPEG PARSING
// ============================================

/// Splits a Motion JPEG stream into its JPEG images.
///
/// Stops at the first byte that does not start a complete JPEG.
pub fn split_mjpeg_frames(bytes: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 4 <= bytes.len() && bytes[pos] == 0xFF && bytes[pos + 1] == 0xD8 {
        match jpeg_end(bytes, pos) {
            Some(end) => {
                frames.push(&bytes[pos..end]);
                pos = end;
            }
            None => break,
        }
    }
    frames
}

/// Offset just past the EOI marker of the JPEG starting at `start`.
fn jpeg_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 2;
    loop {
        if i + 1 >= bytes.len() || bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        match marker {
            0xFF => {
                i += 1;
                continue;
            }
            0xD9 => return Some(i + 2),
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            _ => {}
        }

        if i + 3 >= bytes.len() {
            return None;
        }
        let length = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        if length < 2 {
            return None;
        }
        i += 2 + length;

        if marker == 0xDA {
            // Entropy-coded data runs until the next real marker
            loop {
                if i + 1 >= bytes.len() {
                    return None;
                }
                let next = bytes[i + 1];
                if bytes[i] == 0xFF && next != 0x00 && !(0xD0..=0xD7).contains(&next) {
                    break;
                }
                i += 1;
            }
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use image::Rgba;
    use std::time::Duration;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 8) as u8, (y * 8) as u8, 128, 255]))
    }

    fn callback() -> (RecordingCallback, Receiver<Option<PathBuf>>) {
        let (tx, rx) = bounded(1);
        (
            Box::new(move |path| {
                let _ = tx.send(path);
            }),
            rx,
        )
    }

    #[test]
    fn test_compressor_quality() {
        assert_eq!(FrameCompressor::new(80).quality(), 80);
        assert_eq!(FrameCompressor::new(150).quality(), 100);
        assert_eq!(FrameCompressor::new(0).quality(), 1);
    }

    #[test]
    fn test_compression() {
        let compressor = FrameCompressor::new(80);
        let image = gradient(100, 100);
        let jpeg = compressor.compress_image(&image).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(jpeg.len() < image.as_raw().len() / 2);
    }

    #[test]
    fn test_compression_invalid_size() {
        let compressor = FrameCompressor::new(80);
        let result = compressor.compress(&[0u8; 100], 100, 100);
        assert!(matches!(result, Err(EncoderError::InvalidFrame { .. })));
    }

    #[test]
    fn test_split_mjpeg_frames() {
        let compressor = FrameCompressor::new(70);
        let a = compressor.compress_image(&gradient(16, 8)).unwrap();
        let b = compressor.compress_image(&gradient(8, 16)).unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);
        stream.extend_from_slice(&[0xFF, 0xD8, 0xFF]); // truncated tail

        let frames = split_mjpeg_frames(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], a.as_slice());
        assert_eq!(frames[1], b.as_slice());
        assert!(split_mjpeg_frames(b"not a jpeg").is_empty());
    }

    #[test]
    fn test_recorder_paces_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let (on_complete, rx) = callback();
        let settings = RecorderSettings {
            fps: 10,
            quality: 60,
            rotation: 90,
            ..RecorderSettings::default()
        };
        let recorder = VideoRecorder::start(path.clone(), settings, on_complete).unwrap();

        let step = 100_000_000; // one output slot at 10 fps
        let base = 1_000_000_000;
        recorder.push(CameraFrame::with_timestamp(gradient(16, 8), base));
        // Same slot: dropped
        recorder.push(CameraFrame::with_timestamp(gradient(16, 8), base + step / 2));
        // Skips one slot: previous frame repeated once
        recorder.push(CameraFrame::with_timestamp(gradient(16, 8), base + 2 * step));
        recorder.stop();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(path.clone()));
        let bytes = fs::read(&path).unwrap();
        let frames = split_mjpeg_frames(&bytes);
        assert_eq!(frames.len(), 3);

        let first = image::load_from_memory(frames[0]).unwrap();
        assert_eq!((first.width(), first.height()), (8, 16));
    }

    #[test]
    fn test_slow_writer_keeps_queue_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burst.mjpeg");
        let (on_complete, rx) = callback();
        let settings = RecorderSettings {
            quality: 95,
            queue_capacity: 2,
            ..RecorderSettings::default()
        };
        let recorder = VideoRecorder::start(path.clone(), settings, on_complete).unwrap();
        assert_eq!(recorder.queue_capacity(), 2);

        // Every frame lands in its own slot so the writer has to encode it
        let frame = Arc::new(gradient(1280, 720));
        let step = 1_000_000_000 / 30;
        for i in 0..64u64 {
            recorder.push(CameraFrame {
                image: Arc::clone(&frame),
                timestamp_ns: 1_000_000_000 + i * step,
            });
            assert!(recorder.queued() <= 2);
        }
        assert!(recorder.frames_dropped() > 0);
        recorder.stop();

        assert_eq!(rx.recv_timeout(Duration::from_secs(30)).unwrap(), Some(path.clone()));
        let bytes = fs::read(&path).unwrap();
        assert!(!split_mjpeg_frames(&bytes).is_empty());
    }

    #[test]
    fn test_empty_recording_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mjpeg");
        let (on_complete, rx) = callback();
        let recorder =
            VideoRecorder::start(path.clone(), RecorderSettings::default(), on_complete).unwrap();
        recorder.stop();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_cancel_and_drop_delete_file() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("cancelled.mjpeg");
        let (on_complete, rx) = callback();
        let recorder =
            VideoRecorder::start(path.clone(), RecorderSettings::default(), on_complete).unwrap();
        recorder.push(CameraFrame::new(gradient(8, 8)));
        recorder.cancel();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        assert!(!path.exists());

        let path = dir.path().join("dropped.mjpeg");
        let (on_complete, rx) = callback();
        let recorder =
            VideoRecorder::start(path.clone(), RecorderSettings::default(), on_complete).unwrap();
        drop(recorder);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_start_failure_reports_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("clip.mjpeg");
        let (on_complete, rx) = callback();
        assert!(VideoRecorder::start(path, RecorderSettings::default(), on_complete).is_err());
        assert_eq!(rx.try_recv().unwrap(), None);
    }
}
