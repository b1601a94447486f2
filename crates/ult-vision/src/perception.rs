use crate::markers::Marker;
use crate::templates::{Template, TemplateStore};
use anyhow::Result;
use image::{Rgba, RgbaImage};
use tracing::trace;
use ult_capture::{crop_region, FrameSource};

/// Largest share of differing pixels for a crop to still count as a match.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// A channel must move by more than this (about 10% of full scale) for the pixel to differ.
const CHANNEL_THRESHOLD: u8 = 25;

/// Whether two pixels differ beyond encoding noise. Alpha is ignored.
fn pixel_differs(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    (0..3).any(|c| a[c].abs_diff(b[c]) > CHANNEL_THRESHOLD)
}

/// Share of differing pixels between two images, from 0.0 (identical) to 1.0.
///
/// Images of different sizes are treated as completely different.
pub fn diff_percent(a: &RgbaImage, b: &RgbaImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 1.0;
    }
    let total = a.width() as u64 * a.height() as u64;
    if total == 0 {
        return 1.0;
    }
    let differing = a
        .pixels()
        .zip(b.pixels())
        .filter(|(pa, pb)| pixel_differs(pa, pb))
        .count() as u64;
    differing as f64 / total as f64
}

/// Exact-region template matching against a fixed template library.
pub struct Matcher {
    store: TemplateStore,
    tolerance: f64,
}

impl Matcher {
    pub fn new(store: TemplateStore, tolerance: f64) -> Self {
        Self { store, tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Crop the template's region out of `frame` and compare it with the reference.
    pub fn matches(&self, frame: &RgbaImage, template: &Template) -> bool {
        let crop = crop_region(frame, &template.region);
        let diff = diff_percent(&crop, &template.reference);
        trace!(
            "{} ({}) diff {:.4} vs tolerance {:.4}",
            template.marker,
            template.profile,
            diff,
            self.tolerance
        );
        diff <= self.tolerance
    }

    /// True if any profile of `marker` matches.
    pub fn marker_present(&self, frame: &RgbaImage, marker: Marker) -> bool {
        self.store
            .templates_for(marker)
            .iter()
            .any(|t| self.matches(frame, t))
    }

    /// First candidate (in the given priority order) with a matching profile.
    ///
    /// `None` is not an error: the caller should wait and sample again.
    pub fn classify(&self, frame: &RgbaImage, candidates: &[Marker]) -> Option<Marker> {
        candidates
            .iter()
            .copied()
            .find(|&m| self.marker_present(frame, m))
    }
}

/// Frame source plus matcher: everything the state machine needs to look at the screen.
pub struct Perception<S> {
    source: S,
    matcher: Matcher,
}

impl<S: FrameSource> Perception<S> {
    pub fn new(source: S, matcher: Matcher) -> Self {
        Self { source, matcher }
    }

    /// Grab the whole viewport at the reference resolution.
    pub async fn sample(&mut self) -> Result<RgbaImage> {
        self.source.sample().await
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::Profile;
    use ult_capture::Rect;

    const GRAY: Rgba<u8> = Rgba([100, 100, 100, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn template(marker: Marker, profile: Profile, region: Rect, color: Rgba<u8>) -> Template {
        Template {
            marker,
            profile,
            region,
            reference: RgbaImage::from_pixel(region.w, region.h, color),
        }
    }

    /// Frame with `count` white pixels (row-major) inside `region`, gray elsewhere.
    fn frame_with_changes(region: Rect, count: u32) -> RgbaImage {
        let mut frame = RgbaImage::from_pixel(200, 200, GRAY);
        for i in 0..count {
            frame.put_pixel(region.x + i % region.w, region.y + i / region.w, WHITE);
        }
        frame
    }

    #[test]
    fn test_match_at_exact_tolerance_boundary() {
        let region = Rect::new(50, 50, 100, 100);
        let store = TemplateStore::from_templates([template(
            Marker::MainMenu,
            Profile::Native,
            region,
            GRAY,
        )]);
        let matcher = Matcher::new(store, DEFAULT_TOLERANCE);
        let t = &matcher.store().templates_for(Marker::MainMenu)[0];

        // 100 of 10_000 pixels = exactly 1%
        assert!(matcher.matches(&frame_with_changes(region, 100), t));
        assert!(!matcher.matches(&frame_with_changes(region, 101), t));
        assert!(matcher.matches(&frame_with_changes(region, 0), t));
    }

    #[test]
    fn test_small_channel_noise_is_ignored() {
        let a = RgbaImage::from_pixel(4, 4, GRAY);
        let b = RgbaImage::from_pixel(4, 4, Rgba([125, 75, 100, 0]));
        assert_eq!(diff_percent(&a, &b), 0.0);
        let c = RgbaImage::from_pixel(4, 4, Rgba([126, 100, 100, 255]));
        assert_eq!(diff_percent(&a, &c), 1.0);
    }

    #[test]
    fn test_size_mismatch_is_full_difference() {
        let a = RgbaImage::new(4, 4);
        let b = RgbaImage::new(4, 5);
        assert_eq!(diff_percent(&a, &b), 1.0);
    }

    #[test]
    fn test_classify_respects_priority_order() {
        let region = Rect::new(0, 0, 10, 10);
        let store = TemplateStore::from_templates([
            template(Marker::MainMenu, Profile::Native, region, GRAY),
            template(Marker::Ruleset, Profile::Native, region, GRAY),
        ]);
        let matcher = Matcher::new(store, DEFAULT_TOLERANCE);
        let frame = RgbaImage::from_pixel(50, 50, GRAY);

        assert_eq!(
            matcher.classify(&frame, &[Marker::Ruleset, Marker::MainMenu]),
            Some(Marker::Ruleset)
        );
        assert_eq!(
            matcher.classify(&frame, &[Marker::MainMenu, Marker::Ruleset]),
            Some(Marker::MainMenu)
        );
    }

    #[test]
    fn test_classify_tries_every_profile_before_next_marker() {
        let region = Rect::new(0, 0, 10, 10);
        let store = TemplateStore::from_templates([
            template(Marker::CharacterSelect, Profile::Fullscreen, region, WHITE),
            template(Marker::CharacterSelect, Profile::Letterboxed, region, GRAY),
            template(Marker::MatchOver, Profile::Fullscreen, region, GRAY),
        ]);
        let matcher = Matcher::new(store, DEFAULT_TOLERANCE);
        let frame = RgbaImage::from_pixel(50, 50, GRAY);

        assert_eq!(
            matcher.classify(&frame, &[Marker::CharacterSelect, Marker::MatchOver]),
            Some(Marker::CharacterSelect)
        );
    }

    #[test]
    fn test_classify_unknown_is_none() {
        let matcher = Matcher::new(TemplateStore::default(), DEFAULT_TOLERANCE);
        let frame = RgbaImage::from_pixel(50, 50, GRAY);
        assert_eq!(matcher.classify(&frame, &Marker::ALL), None);
    }
}
