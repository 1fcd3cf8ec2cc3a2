use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::f64::consts::PI;

use super::FrameSource;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FRAMES: u64 = 300;
const DEFAULT_FPS: f64 = 30.0;
const SUBJECT_WIDTH: u32 = 40;
const SUBJECT_HEIGHT: u32 = 80;
const JUMP_HEIGHT: f64 = 150.0;
/// Frames per stand-then-jump cycle.
pub const CYCLE_FRAMES: u64 = 30;
const STAND_FRAMES: u64 = 10;

/// Synthetic source: a white subject on black that jumps every [`CYCLE_FRAMES`] frames.
///
/// Locator: `stub://<name>?frames=N&fps=F&width=W&height=H`. `frames=0` never ends.
/// The subject stands for 10 frames, then follows a 20-frame arc; the landing is
/// visible from the 26th frame of each cycle.
#[derive(Debug)]
pub struct SyntheticSource {
    locator: String,
    width: u32,
    height: u32,
    fps: f64,
    total_frames: u64,
    produced: u64,
}

impl SyntheticSource {
    pub fn parse(locator: &str) -> Result<Self> {
        let rest = locator
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic locator must start with stub://"))?;
        let mut source = Self {
            locator: locator.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            total_frames: DEFAULT_FRAMES,
            produced: 0,
        };
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "frames" => source.total_frames = parse_param(key, value)?,
                "fps" => source.fps = parse_param(key, value)?,
                "width" => source.width = parse_param(key, value)?,
                "height" => source.height = parse_param(key, value)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.width < SUBJECT_WIDTH * 2 || source.height < SUBJECT_HEIGHT * 3 {
            return Err(anyhow!(
                "stub frame {}x{} is too small for the subject",
                source.width,
                source.height
            ));
        }
        log::info!("SyntheticSource: connected to {}", source.locator);
        Ok(source)
    }

    /// Top edge of the subject for frame index `n` (0-based).
    fn subject_top(&self, n: u64) -> u32 {
        let ground = self.height - SUBJECT_HEIGHT - self.height / 10;
        let phase = n % CYCLE_FRAMES;
        if phase < STAND_FRAMES {
            return ground;
        }
        let t = (phase - STAND_FRAMES) as f64 / (CYCLE_FRAMES - STAND_FRAMES) as f64;
        let lift = (JUMP_HEIGHT * (PI * t).sin()).min(ground as f64);
        ground - lift as u32
    }

    fn render(&self, n: u64) -> RgbImage {
        let mut image = RgbImage::new(self.width, self.height);
        let left = self.width / 2 - SUBJECT_WIDTH / 2;
        let top = self.subject_top(n);
        for y in top..top + SUBJECT_HEIGHT {
            for x in left..left + SUBJECT_WIDTH {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        image
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid value '{}' for stub parameter '{}'", value, key))
}

impl FrameSource for SyntheticSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.total_frames != 0 && self.produced >= self.total_frames {
            return Ok(None);
        }
        let image = self.render(self.produced);
        self.produced += 1;
        Ok(Some(image))
    }
}
