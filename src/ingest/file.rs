//! Local file frame source.
//!
//! `FileSource` opens the asset at construction time, so an unreadable asset is
//! reported before any pipeline work starts. It then enforces the ordering
//! contract on top of whichever decoder backs it:
//! - timestamps never go backwards (a regressing timestamp is clamped)
//! - after the first `None`, every later call returns `None` too
//!
//! Only local paths are accepted. `stub://` paths select a synthetic asset:
//! `stub://name?frames=N&width=W&height=H&fps=F&corrupt_every=K`.

use std::time::Duration;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::FrameSource;
use crate::error::PipelineError;
use crate::frame::{Frame, BYTES_PER_PIXEL};

const DEFAULT_SYNTHETIC_FRAMES: u64 = 120;
const DEFAULT_SYNTHETIC_WIDTH: u32 = 320;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 180;
const DEFAULT_SYNTHETIC_FPS: u32 = 30;
/// Largest synthetic frame accepted (8K RGB24).
const MAX_SYNTHETIC_FRAME_BYTES: usize = 7680 * 4320 * BYTES_PER_PIXEL;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/overlay/clip.mp4") or a `stub://` asset.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub timestamps_clamped: u64,
    pub exhausted: bool,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
    path: String,
    order: PtsGuard,
    stats: FileStats,
}

/// Keeps presentation timestamps non-decreasing.
#[derive(Debug, Default)]
struct PtsGuard {
    last: Option<Duration>,
}

impl PtsGuard {
    /// Returns true when `frame.pts` had to be raised to the previous timestamp.
    fn admit(&mut self, frame: &mut Frame) -> bool {
        let clamped = match self.last {
            Some(last) if frame.pts < last => {
                log::debug!(
                    "FileSource: timestamp {:?} went backwards, clamping to {:?}",
                    frame.pts,
                    last
                );
                frame.pts = last;
                true
            }
            _ => false,
        };
        self.last = Some(frame.pts);
        clamped
    }
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the asset. Fails with `AssetUnreadable` if it cannot be decoded.
    pub fn new(config: FileConfig) -> Result<Self, PipelineError> {
        if !is_local_file_path(&config.path) {
            return Err(PipelineError::asset(
                &config.path,
                "file ingestion only supports local paths (no URL schemes)",
            ));
        }
        let backend = if let Some(asset) = config.path.strip_prefix("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::parse(asset).map_err(|reason| {
                PipelineError::asset(&config.path, reason)
            })?)
        } else {
            open_decoder(&config)?
        };
        log::info!("FileSource: opened {}", config.path);
        Ok(Self {
            backend,
            path: config.path,
            order: PtsGuard::default(),
            stats: FileStats::default(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stats(&self) -> FileStats {
        self.stats.clone()
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, PipelineError> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_decoder(config: &FileConfig) -> Result<FileBackend, PipelineError> {
    Ok(FileBackend::Ffmpeg(FfmpegFileSource::new(config)?))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_decoder(config: &FileConfig) -> Result<FileBackend, PipelineError> {
    Err(PipelineError::asset(
        &config.path,
        "file ingestion requires the ingest-file-ffmpeg feature",
    ))
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.stats.exhausted {
            return Ok(None);
        }
        let mut frame = match self.decode_next() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stats.exhausted = true;
                log::info!(
                    "FileSource: {} exhausted after {} frames",
                    self.path,
                    self.stats.frames_decoded
                );
                return Ok(None);
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                return Err(e);
            }
        };

        if self.order.admit(&mut frame) {
            self.stats.timestamps_clamped += 1;
        }
        self.stats.frames_decoded += 1;
        Ok(Some(frame))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for demos and tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    frames: u64,
    width: u32,
    height: u32,
    fps: u32,
    corrupt_every: Option<u64>,
    index: u64,
}

impl SyntheticFileSource {
    fn parse(asset: &str) -> Result<Self, String> {
        let mut source = Self {
            frames: DEFAULT_SYNTHETIC_FRAMES,
            width: DEFAULT_SYNTHETIC_WIDTH,
            height: DEFAULT_SYNTHETIC_HEIGHT,
            fps: DEFAULT_SYNTHETIC_FPS,
            corrupt_every: None,
            index: 0,
        };
        let query = asset.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("malformed query parameter '{pair}'"))?;
            let parsed: u64 = value
                .parse()
                .map_err(|_| format!("'{key}' must be an unsigned integer, got '{value}'"))?;
            match key {
                "frames" => source.frames = parsed,
                "width" => source.width = to_u32(key, parsed)?,
                "height" => source.height = to_u32(key, parsed)?,
                "fps" => source.fps = to_u32(key, parsed)?,
                "corrupt_every" => source.corrupt_every = Some(parsed).filter(|k| *k > 0),
                other => return Err(format!("unknown synthetic asset parameter '{other}'")),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err("synthetic asset needs a non-zero size".to_string());
        }
        let frame_bytes = (source.width as usize)
            .checked_mul(source.height as usize)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL));
        if !frame_bytes.is_some_and(|bytes| bytes <= MAX_SYNTHETIC_FRAME_BYTES) {
            return Err(format!(
                "synthetic frame {}x{} exceeds the {} byte limit",
                source.width, source.height, MAX_SYNTHETIC_FRAME_BYTES
            ));
        }
        if source.fps == 0 {
            return Err("synthetic asset needs a non-zero frame rate".to_string());
        }
        Ok(source)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.index >= self.frames {
            return Ok(None);
        }
        let index = self.index;
        self.index += 1;

        if self.corrupt_every.is_some_and(|k| (index + 1) % k == 0) {
            return Err(PipelineError::FrameDecodeError {
                index,
                reason: "synthetic corrupt packet".to_string(),
            });
        }

        let pts = Duration::from_secs_f64(index as f64 / self.fps as f64);
        let pixels = self.render(index);
        Frame::new(pixels, self.width, self.height, pts)
            .map(Some)
            .ok_or_else(|| PipelineError::FrameDecodeError {
                index,
                reason: "synthetic frame size mismatch".to_string(),
            })
    }

    /// Dim gradient with a white square sweeping left to right.
    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.width as u64, self.height as u64);
        let side = (w.min(h) / 5).max(1);
        let travel = w.saturating_sub(side).max(1);
        let sq_x = (index * 4) % travel;
        let sq_y = (h - side.min(h)) / 2;

        let mut pixels = vec![0u8; (w * h * 3) as usize];
        for y in 0..h {
            for x in 0..w {
                let idx = ((y * w + x) * 3) as usize;
                let inside = x >= sq_x && x < sq_x + side && y >= sq_y && y < sq_y + side;
                let px = if inside {
                    [255, 255, 255]
                } else {
                    [(x * 96 / w) as u8, (y * 96 / h) as u8, 48]
                };
                pixels[idx..idx + 3].copy_from_slice(&px);
            }
        }
        pixels
    }
}

fn to_u32(key: &str, value: u64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("'{key}' is out of range"))
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_ends_with_a_sticky_none() {
        let mut source =
            FileSource::new(FileConfig::new("stub://clip?frames=5&width=40&height=20")).unwrap();

        let mut last = Duration::ZERO;
        for _ in 0..5 {
            let frame = source.next_frame().unwrap().expect("frame");
            assert!(frame.pts >= last);
            assert_eq!((frame.width, frame.height), (40, 20));
            last = frame.pts;
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.stats().exhausted);
        assert_eq!(source.stats().frames_decoded, 5);
    }

    #[test]
    fn corrupt_frames_are_reported_and_skippable() {
        let mut source = FileSource::new(FileConfig::new(
            "stub://clip?frames=6&width=8&height=8&corrupt_every=3",
        ))
        .unwrap();

        let mut ok = 0;
        let mut failed = Vec::new();
        loop {
            match source.next_frame() {
                Ok(Some(_)) => ok += 1,
                Ok(None) => break,
                Err(PipelineError::FrameDecodeError { index, .. }) => failed.push(index),
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ok, 4);
        assert_eq!(failed, vec![2, 5]);
        assert_eq!(source.stats().decode_failures, 2);
    }

    #[test]
    fn remote_and_malformed_assets_are_unreadable() {
        for path in [
            "",
            "rtsp://camera/stream",
            "stub://clip?frames=abc",
            "stub://clip?width=0",
            "stub://clip?speed=2",
            "stub://clip?frames=1&width=4294967295&height=4294967295",
            "stub://clip?width=100000&height=100000",
        ] {
            match FileSource::new(FileConfig::new(path)) {
                Err(PipelineError::AssetUnreadable { .. }) => {}
                Err(other) => panic!("{path}: unexpected error {other:?}"),
                Ok(_) => panic!("{path}: expected AssetUnreadable"),
            }
        }
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn local_files_need_the_decoder_feature() {
        assert!(matches!(
            FileSource::new(FileConfig::new("/tmp/clip.mp4")),
            Err(PipelineError::AssetUnreadable { .. })
        ));
    }

    #[test]
    fn regressing_timestamps_are_clamped() {
        let mut guard = PtsGuard::default();
        let mut seen = Vec::new();
        let mut clamped = 0;
        for ms in [0, 40, 20, 80] {
            let mut frame = Frame::new(vec![0u8; 3], 1, 1, Duration::from_millis(ms)).unwrap();
            if guard.admit(&mut frame) {
                clamped += 1;
            }
            seen.push(frame.pts.as_millis());
        }
        assert_eq!(seen, vec![0, 40, 40, 80]);
        assert_eq!(clamped, 1);
    }
}
