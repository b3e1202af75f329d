use std::path::Path;

use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::Frame;
use crate::error::{Error, Result};

/// Sequential and random-access reader of decoded frames.
///
/// One logical reader per handle: decoding is stateful. The handle is released on drop.
pub trait FrameSource {
    fn total_count(&self) -> usize;

    /// Next frame after the cursor, or `None` at end of stream.
    fn read_next(&mut self) -> Result<Option<Frame>>;

    /// Jump to `index`; the following `read_next` continues at `index + 1`.
    fn seek(&mut self, index: usize) -> Result<Frame>;
}

/// Where a decoded frame sits relative to a seek target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekStep {
    Before,
    Found,
    /// No timestamp, or already past the target: the frame cannot be identified.
    Lost,
    Ended,
}

fn seek_step(position: Option<usize>, target: usize) -> SeekStep {
    match position {
        Some(p) if p < target => SeekStep::Before,
        Some(p) if p == target => SeekStep::Found,
        _ => SeekStep::Lost,
    }
}

/// Frame index of a presentation timestamp, counted from the stream start.
fn frame_position(ts: i64, start_time: i64, time_base: f64, fps: f64) -> Option<usize> {
    let index = (ts.saturating_sub(start_time) as f64 * time_base * fps).round();
    (index >= 0.0).then_some(index as usize)
}

/// Initialize FFmpeg. Call once at startup, before opening any video.
pub fn init_ffmpeg() -> Result<()> {
    ffmpeg::init().map_err(|e| Error::Decode(format!("failed to initialize FFmpeg: {e}")))
}

/// Frame source over a video file decoded with FFmpeg, converted to RGB24.
pub struct VideoFrameSource {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::context::Context,
    decoded: ffmpeg::util::frame::video::Video,
    stream_index: usize,
    time_base: f64,
    start_time: i64,
    fps: f64,
    total: usize,
    cursor: usize,
    drained: bool,
}

impl VideoFrameSource {
    pub fn open<P: AsRef<Path>>(video_path: P) -> Result<Self> {
        let path = video_path.as_ref().to_path_buf();
        let open_err = |reason: String| Error::Open {
            path: path.clone(),
            reason,
        };

        if !path.is_file() {
            return Err(open_err("no such file".to_string()));
        }

        let input = ffmpeg::format::input(&path).map_err(|e| open_err(e.to_string()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_err("could not find video stream".to_string()))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        // AV_NOPTS_VALUE
        let start_time = match stream.start_time() {
            i64::MIN => 0,
            t => t,
        };
        let fps = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .map(f64::from)
            .find(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| open_err("unknown frame rate".to_string()))?;

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| open_err(format!("failed to create video decoder: {e}")))?;

        let total = if stream.frames() > 0 {
            stream.frames() as usize
        } else {
            let duration = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
            (duration * fps).round().max(0.0) as usize
        };

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| open_err(format!("failed to create scaler: {e}")))?;

        tracing::info!(
            path = %path.display(),
            width = decoder.width(),
            height = decoder.height(),
            fps,
            total,
            "opened video"
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            decoded: ffmpeg::util::frame::video::Video::empty(),
            stream_index,
            time_base,
            start_time,
            fps,
            total,
            cursor: 0,
            drained: false,
        })
    }

    /// Decode into `self.decoded`. Returns false once the stream is exhausted.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return Ok(true);
            }
            if self.drained {
                return Ok(false);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(|e| Error::Decode(format!("failed to send packet: {e}")))?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().ok();
                    self.drained = true;
                }
                Err(e) => return Err(Error::Decode(format!("failed to read packet: {e}"))),
            }
        }
    }

    /// Frame position of the last decoded frame, from its presentation timestamp.
    fn decoded_index(&self) -> Option<usize> {
        let ts = self.decoded.timestamp().or(self.decoded.pts())?;
        frame_position(ts, self.start_time, self.time_base, self.fps)
    }

    fn reposition<R>(&mut self, timestamp: i64, range: R) -> Result<()>
    where
        R: ffmpeg::util::range::Range<i64>,
    {
        self.input
            .seek(timestamp, range)
            .map_err(|e| Error::Decode(format!("failed to seek: {e}")))?;
        self.decoder.flush();
        self.drained = false;
        Ok(())
    }

    /// Seek to the keyframe at or before `index` and decode forward to it.
    fn seek_by_timestamp(&mut self, index: usize) -> Result<SeekStep> {
        let seconds = index as f64 / self.fps;
        let timestamp = (seconds * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.reposition(timestamp, ..timestamp)?;

        loop {
            if !self.decode_next()? {
                return Ok(SeekStep::Ended);
            }
            match seek_step(self.decoded_index(), index) {
                SeekStep::Before => {}
                step => return Ok(step),
            }
        }
    }

    /// Rewind and decode `index + 1` frames, numbering them the way `read_next` does.
    fn seek_by_counting(&mut self, index: usize) -> Result<SeekStep> {
        self.reposition(0, ..)?;
        for _ in 0..=index {
            if !self.decode_next()? {
                return Ok(SeekStep::Ended);
            }
        }
        Ok(SeekStep::Found)
    }

    /// Put the decoder back so `read_next` continues at `self.cursor`.
    fn restore_cursor(&mut self) -> Result<()> {
        match self.cursor.checked_sub(1) {
            Some(current) => self.seek_by_counting(current).map(|_| ()),
            None => self.reposition(0, ..),
        }
    }

    fn decoded_to_rgb(&mut self) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::util::frame::video::Video::empty();
        self.scaler
            .run(&self.decoded, &mut rgb_frame)
            .map_err(|e| Error::Decode(format!("failed to scale frame: {e}")))?;

        let width = rgb_frame.width();
        let height = rgb_frame.height();
        let stride = rgb_frame.stride(0);
        let row = width as usize * 3;
        let data = rgb_frame.data(0);

        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            pixels.extend_from_slice(&data[y * stride..y * stride + row]);
        }

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::Decode("failed to create image buffer from frame".to_string()))
    }
}

impl FrameSource for VideoFrameSource {
    fn total_count(&self) -> usize {
        self.total
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        if !self.decode_next()? {
            return Ok(None);
        }
        let image = self.decoded_to_rgb()?;
        let frame = Frame::new(self.cursor, image);
        self.cursor += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, index: usize) -> Result<Frame> {
        if index >= self.total {
            return Err(Error::OutOfRange {
                index,
                total: self.total,
            });
        }

        let mut step = self.seek_by_timestamp(index)?;
        if step == SeekStep::Lost {
            tracing::debug!(index, "frame timestamps unusable, counting from the start");
            step = self.seek_by_counting(index)?;
        }
        if step != SeekStep::Found {
            // The frame count was an estimate and the stream is shorter.
            self.restore_cursor()?;
            return Err(Error::OutOfRange {
                index,
                total: self.total,
            });
        }

        let image = self.decoded_to_rgb()?;
        self.cursor = index + 1;
        tracing::debug!(index, "seeked");
        Ok(Frame::new(index, image))
    }
}
