//! Synthetic frame source (`stub://`).
//!
//! Locator: `stub://<name>[?frames=N][&fps=F][&fail_every=K][&fire=1]`
//!
//! - `frames`: end of stream after N frames (file-backed). Without it the source is live.
//! - `fps`: pace frames in real time. Defaults to 10 for live sources, unpaced otherwise.
//! - `fail_every`: every K-th read fails, to exercise retry paths.
//! - `fire`: paint a flame-coloured block in the top-left quarter of every frame.

use anyhow::{anyhow, Result};

use super::{FramePacer, FrameSource, SourceStats};
use crate::frame::{Frame, Roi};

const DEFAULT_LIVE_FPS: u32 = 10;
const FLAME_BGR: [u8; 3] = [0, 140, 255];

pub struct SyntheticSource {
    locator: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    pacer: FramePacer,
    fail_every: Option<u64>,
    fire: bool,
    reads: u64,
    frame_count: u64,
    stats: SourceStats,
}

impl SyntheticSource {
    pub fn parse(locator: &str, width: u32, height: u32) -> Result<Self> {
        let rest = locator
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic locator must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        if name.is_empty() {
            return Err(anyhow!("synthetic locator {} has no name", locator));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic frames need a non-zero size"));
        }

        let mut frame_limit = None;
        let mut fps = None;
        let mut fail_every = None;
        let mut fire = false;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "frames" => frame_limit = Some(parse_param::<u64>(locator, key, value)?),
                "fps" => fps = Some(parse_param::<u32>(locator, key, value)?),
                "fail_every" => {
                    let every = parse_param::<u64>(locator, key, value)?;
                    fail_every = (every > 0).then_some(every);
                }
                "fire" => fire = matches!(value, "1" | "true" | ""),
                other => {
                    return Err(anyhow!("unknown parameter {:?} in {}", other, locator));
                }
            }
        }

        let fps = fps.unwrap_or(if frame_limit.is_none() { DEFAULT_LIVE_FPS } else { 0 });
        Ok(Self {
            locator: locator.to_string(),
            width,
            height,
            frame_limit,
            pacer: FramePacer::new(fps),
            fail_every,
            fire,
            reads: 0,
            frame_count: 0,
            stats: SourceStats::default(),
        })
    }

    fn render(&self) -> Frame {
        let mut frame = Frame::blank(self.width, self.height, self.frame_count);
        // slow-moving grey bar so consecutive frames differ
        let bar_y = (self.frame_count % u64::from(self.height)) as u32;
        frame.fill(Roi::new(0, bar_y, self.width, bar_y + 1), [96, 96, 96]);
        if self.fire {
            frame.fill(Roi::new(0, 0, self.width / 2, self.height / 2), FLAME_BGR);
        }
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.locator);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.reads += 1;
        if self.fail_every.is_some_and(|every| self.reads % every == 0) {
            self.stats.read_failures += 1;
            return Err(anyhow!("{}: simulated read failure", self.locator));
        }
        self.pacer.pace();
        let frame = self.render();
        self.frame_count += 1;
        self.stats.frames_captured += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        if self.is_live() {
            return Err(anyhow!("{} is live and cannot be rewound", self.locator));
        }
        self.frame_count = 0;
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.frame_limit.is_none()
    }

    fn describe(&self) -> String {
        self.locator.clone()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn parse_param<T: std::str::FromStr>(locator: &str, key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid {} value {:?} in {}", key, value, locator))
}
