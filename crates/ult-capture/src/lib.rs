use anyhow::{Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use tokio::sync::watch;
use tracing::{debug, warn};
use xcap::{Monitor, Window};

pub mod snapshot;

pub use snapshot::SnapshotCapture;

/// Every region and template is defined against this resolution.
pub const REFERENCE_WIDTH: u32 = 1920;
pub const REFERENCE_HEIGHT: u32 = 1080;

/// Pixel rectangle at the reference resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

/// Top-left corner of the game viewport in desktop coordinates.
///
/// This is the only on-disk state the runner needs at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportOffset {
    pub x: i32,
    pub y: i32,
}

impl ViewportOffset {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read viewport file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid viewport file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_string(self).context("Failed to serialize viewport")?;
        std::fs::write(path, payload)
            .with_context(|| format!("Failed to write viewport file {}", path.display()))
    }
}

/// Crop a pixel region from a frame, clamped to the frame bounds.
pub fn crop_region(frame: &RgbaImage, region: &Rect) -> RgbaImage {
    let (w, h) = (frame.width(), frame.height());

    let x = region.x.min(w.saturating_sub(1));
    let y = region.y.min(h.saturating_sub(1));
    let rw = region.w.min(w - x);
    let rh = region.h.min(h - y);

    image::imageops::crop_imm(frame, x, y, rw, rh).to_image()
}

/// Bring any captured frame to the reference resolution so region coordinates line up.
pub fn normalize_frame(frame: RgbaImage) -> RgbaImage {
    if frame.dimensions() == (REFERENCE_WIDTH, REFERENCE_HEIGHT) {
        return frame;
    }
    debug!(
        "Resizing {}x{} frame to reference resolution",
        frame.width(),
        frame.height()
    );
    image::imageops::resize(
        &frame,
        REFERENCE_WIDTH,
        REFERENCE_HEIGHT,
        image::imageops::FilterType::Triangle,
    )
}

/// Anything that can hand out the current game screen.
///
/// Implementations must return frames already normalized to the reference resolution.
pub trait FrameSource: Send {
    fn sample(&mut self) -> impl Future<Output = Result<RgbaImage>> + Send;
}

/// Captures the viewport straight off the desktop (emulator mode).
pub struct ScreenCapture {
    offset: watch::Receiver<ViewportOffset>,
}

impl ScreenCapture {
    /// The offset receiver lets the supervisor move the viewport while we keep sampling.
    pub fn new(offset: watch::Receiver<ViewportOffset>) -> Self {
        Self { offset }
    }
}

impl FrameSource for ScreenCapture {
    async fn sample(&mut self) -> Result<RgbaImage> {
        let offset = *self.offset.borrow();
        // xcap is sync
        let frame = tokio::task::spawn_blocking(move || capture_viewport(offset))
            .await
            .context("Capture task panicked")??;
        Ok(normalize_frame(frame))
    }
}

/// Capture the reference-sized viewport at `offset` from whichever monitor contains it.
fn capture_viewport(offset: ViewportOffset) -> Result<RgbaImage> {
    let monitor = Monitor::from_point(offset.x, offset.y)
        .with_context(|| format!("No monitor contains ({}, {})", offset.x, offset.y))?;
    let screen = monitor
        .capture_image()
        .context("Failed to capture monitor image")?;
    let monitor_x = monitor.x().context("Failed to read monitor position")?;
    let monitor_y = monitor.y().context("Failed to read monitor position")?;

    let region = Rect::new(
        (offset.x - monitor_x).max(0) as u32,
        (offset.y - monitor_y).max(0) as u32,
        REFERENCE_WIDTH,
        REFERENCE_HEIGHT,
    );
    Ok(crop_region(&screen, &region))
}

/// Position of a top-level window on the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub pid: u32,
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Find a visible window whose title contains `title_fragment`, optionally owned by `pid`.
pub fn find_window(title_fragment: &str, pid: Option<u32>) -> Option<WindowInfo> {
    let windows = match Window::all() {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to enumerate windows: {}", e);
            return None;
        }
    };

    let needle = title_fragment.to_lowercase();
    for window in windows {
        let title = match window.title() {
            Ok(t) => t,
            Err(_) => continue,
        };
        if !title.to_lowercase().contains(&needle) {
            continue;
        }
        if window.is_minimized().unwrap_or(false) {
            continue;
        }
        let window_pid = window.pid().unwrap_or_default();
        if pid.is_some_and(|p| p != window_pid) {
            continue;
        }

        let info = WindowInfo {
            pid: window_pid,
            title,
            x: window.x().unwrap_or_default(),
            y: window.y().unwrap_or_default(),
            width: window.width().unwrap_or_default(),
            height: window.height().unwrap_or_default(),
        };
        debug!("Found window: {:?}", info);
        return Some(info);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_region() {
        let img = RgbaImage::new(1920, 1080);
        let cropped = crop_region(&img, &Rect::new(960, 540, 25, 10));
        assert_eq!(cropped.dimensions(), (25, 10));
    }

    #[test]
    fn test_crop_region_clamps_to_frame() {
        let img = RgbaImage::new(100, 100);
        let cropped = crop_region(&img, &Rect::new(90, 95, 50, 50));
        assert_eq!(cropped.dimensions(), (10, 5));
    }

    #[test]
    fn test_normalize_frame_resizes() {
        let img = RgbaImage::from_pixel(960, 540, image::Rgba([10, 20, 30, 255]));
        let normalized = normalize_frame(img);
        assert_eq!(normalized.dimensions(), (REFERENCE_WIDTH, REFERENCE_HEIGHT));
        assert_eq!(normalized.get_pixel(500, 500), &image::Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_normalize_frame_keeps_reference_size() {
        let img = RgbaImage::from_fn(REFERENCE_WIDTH, REFERENCE_HEIGHT, |x, _| {
            image::Rgba([(x % 256) as u8, 0, 0, 255])
        });
        let normalized = normalize_frame(img.clone());
        assert_eq!(normalized, img);
    }

    #[test]
    fn test_viewport_offset_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windowconfig.json");
        std::fs::write(&path, r#"{"x": 7, "y": 52}"#).unwrap();
        assert_eq!(ViewportOffset::load(&path).unwrap(), ViewportOffset { x: 7, y: 52 });

        ViewportOffset { x: -1920, y: 10 }.save(&path).unwrap();
        assert_eq!(
            ViewportOffset::load(&path).unwrap(),
            ViewportOffset { x: -1920, y: 10 }
        );
    }
}
