//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a local asset into packed RGB24 frames,
//! timestamped from the stream's time base. Decoding happens in-memory.

use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::file::FileConfig;
use crate::error::PipelineError;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: &FileConfig) -> Result<Self, PipelineError> {
        let unreadable = |reason: String| PipelineError::asset(&config.path, reason);

        ffmpeg::init().map_err(|e| unreadable(format!("initialize ffmpeg: {e}")))?;
        let input = ffmpeg::format::input(&config.path)
            .map_err(|e| unreadable(format!("open with ffmpeg: {e}")))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| unreadable("file has no video track".to_string()))?;
        let stream_index = input_stream.index();
        let time_base = f64::from(input_stream.time_base());
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| unreadable(format!("load video decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| unreadable(format!("open ffmpeg video decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| unreadable(format!("create ffmpeg scaler: {e}")))?;

        log::info!(
            "FileSource: {} decodes at {}x{} (ffmpeg)",
            config.path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: config.path.clone(),
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        return Err(self.decode_error(format!("send packet to decoder: {e}")));
                    }
                }
                None => {
                    // Flush frames still buffered inside the decoder.
                    if let Err(e) = self.decoder.send_eof() {
                        log::debug!("FileSource: {} eof flush failed: {}", self.path, e);
                    }
                    self.eof_sent = true;
                }
            }
        }
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        for (stream, packet) in self.input.packets() {
            if stream.index() == self.stream_index {
                return Some(packet);
            }
        }
        None
    }

    fn receive(&mut self) -> Result<Option<Frame>, PipelineError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if let Err(e) = self.decoder.receive_frame(&mut decoded) {
            if is_drained(&e) {
                return Ok(None);
            }
            let err = self.decode_error(format!("receive frame from decoder: {e}"));
            self.frame_count += 1;
            return Err(err);
        }
        let index = self.frame_count;
        self.frame_count += 1;

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| PipelineError::FrameDecodeError {
                index,
                reason: format!("scale frame to RGB: {e}"),
            })?;
        let (pixels, width, height) =
            frame_to_pixels(&rgb_frame).ok_or_else(|| PipelineError::FrameDecodeError {
                index,
                reason: "ffmpeg frame row is out of bounds".to_string(),
            })?;

        let ticks = decoded.timestamp().or(decoded.pts()).unwrap_or(0).max(0);
        let pts = Duration::from_secs_f64(ticks as f64 * self.time_base);

        Frame::new(pixels, width, height, pts)
            .map(Some)
            .ok_or_else(|| PipelineError::FrameDecodeError {
                index,
                reason: "decoded frame size mismatch".to_string(),
            })
    }

    fn decode_error(&self, reason: String) -> PipelineError {
        PipelineError::FrameDecodeError {
            index: self.frame_count,
            reason,
        }
    }
}

/// The decoder needs more input, or has nothing left after the EOF flush.
fn is_drained(err: &ffmpeg::Error) -> bool {
    match err {
        ffmpeg::Error::Eof => true,
        ffmpeg::Error::Other { errno } => *errno == ffmpeg::util::error::EAGAIN,
        _ => false,
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Option<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Some((data.get(..row_bytes * height as usize)?.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(data.get(start..start + row_bytes)?);
    }

    Some((pixels, width, height))
}
