//! Local video file source using FFmpeg.
//!
//! Decodes the best video stream of a local file to RGB24 in memory. Reaching the
//! end of the container flushes the decoder, then reports end of stream.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::FrameSource;

pub struct FfmpegFileSource {
    locator: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    eof_sent: bool,
    frame_count: u64,
}

// SAFETY: the FFmpeg contexts are owned by the source and used from one thread at a time.
unsafe impl Send for FfmpegFileSource {}

impl FfmpegFileSource {
    pub fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let fps = f64::from(input_stream.avg_frame_rate());
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!("FfmpegFileSource: connected to {} ({:.2} fps)", path, fps);

        Ok(Self {
            locator: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            eof_sent: false,
            frame_count: 0,
        })
    }

    fn receive(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        self.frame_count += 1;
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("decoded frame buffer does not match {}x{}", width, height))?;
        Ok(Some(image))
    }
}

impl FrameSource for FfmpegFileSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        loop {
            if let Some(image) = self.receive()? {
                return Ok(Some(image));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn close(&mut self) {
        log::info!(
            "FfmpegFileSource: closed {} after {} frames",
            self.locator,
            self.frame_count
        );
    }

    fn is_recorded(&self) -> bool {
        true
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame buffer is shorter than expected")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
