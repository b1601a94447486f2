//! Synthetic screens for tests: every marker gets a flat colour, frames paint those colours
//! into the marker regions, and a scripted source plays frames back in order.

use crate::screen::GameScreen;
use anyhow::{anyhow, bail, Result};
use image::{Rgba, RgbaImage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use ult_capture::{FrameSource, Rect, REFERENCE_HEIGHT, REFERENCE_WIDTH};
use ult_vision::{Marker, Matcher, Profile, Template, TemplateStore, DEFAULT_TOLERANCE};

/// Colours far enough apart that no two markers (or the black background) match each other.
pub fn marker_color(marker: Marker) -> Rgba<u8> {
    let i = Marker::ALL.iter().position(|m| *m == marker).unwrap_or(0) as u8;
    Rgba([20 + i * 20, (i % 2) * 120, 200, 255])
}

pub fn synthetic_store() -> TemplateStore {
    TemplateStore::from_templates(Marker::ALL.into_iter().map(|marker| {
        let region = marker.region();
        Template {
            marker,
            profile: Profile::Fullscreen,
            region,
            reference: RgbaImage::from_pixel(region.w, region.h, marker_color(marker)),
        }
    }))
}

pub fn synthetic_matcher() -> Matcher {
    Matcher::new(synthetic_store(), DEFAULT_TOLERANCE)
}

pub fn paint(frame: &mut RgbaImage, region: Rect, color: Rgba<u8>) {
    for y in region.y..region.y + region.h {
        for x in region.x..region.x + region.w {
            frame.put_pixel(x, y, color);
        }
    }
}

/// Black reference-size frame showing exactly `markers`.
pub fn frame_with(markers: &[Marker]) -> RgbaImage {
    let mut frame = RgbaImage::new(REFERENCE_WIDTH, REFERENCE_HEIGHT);
    for &marker in markers {
        paint(&mut frame, marker.region(), marker_color(marker));
    }
    frame
}

/// A typical frame for each screen. The select screen is shown without CPU markers.
pub fn screen_frame(screen: GameScreen) -> RgbaImage {
    match screen {
        GameScreen::MainMenu => frame_with(&[Marker::MainMenu]),
        GameScreen::Ruleset => frame_with(&[Marker::Ruleset]),
        GameScreen::StageSelection => frame_with(&[Marker::StageSelection]),
        GameScreen::CharacterSelect => frame_with(&[Marker::CharacterSelect]),
        GameScreen::MatchInProgress => frame_with(&[Marker::MatchCountdown]),
        GameScreen::MatchFinished => frame_with(&[Marker::MatchOver]),
        GameScreen::CheckingWinner => frame_with(&[Marker::MatchOver, Marker::Player1Won]),
    }
}

/// Select screen with both pads already set to CPU.
pub fn ready_frame() -> RgbaImage {
    frame_with(&[
        Marker::CharacterSelect,
        Marker::Player1Cpu,
        Marker::Player2Cpu,
    ])
}

pub fn winner_frame(player_number: u8) -> RgbaImage {
    let banner = if player_number == 1 {
        Marker::Player1Won
    } else {
        Marker::Player2Won
    };
    frame_with(&[Marker::MatchOver, banner])
}

#[derive(Default)]
struct Script {
    queue: VecDeque<RgbaImage>,
    last: Option<RgbaImage>,
    sampled: usize,
}

/// Plays queued frames in order, then keeps repeating the last one. Clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: RgbaImage, times: usize) {
        if let Ok(mut script) = self.script.lock() {
            for _ in 0..times {
                script.queue.push_back(frame.clone());
            }
        }
    }

    /// Drop anything still queued and show `frame` from now on.
    pub fn show(&self, frame: RgbaImage) {
        if let Ok(mut script) = self.script.lock() {
            script.queue.clear();
            script.last = Some(frame);
        }
    }

    pub fn sampled(&self) -> usize {
        self.script.lock().map(|s| s.sampled).unwrap_or_default()
    }
}

impl FrameSource for ScriptedSource {
    async fn sample(&mut self) -> Result<RgbaImage> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?;
        script.sampled += 1;
        if let Some(frame) = script.queue.pop_front() {
            script.last = Some(frame.clone());
            return Ok(frame);
        }
        match &script.last {
            Some(frame) => Ok(frame.clone()),
            None => bail!("no frame scripted"),
        }
    }
}
