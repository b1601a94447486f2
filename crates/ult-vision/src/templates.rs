use crate::markers::Marker;
use anyhow::{bail, Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use ult_capture::{crop_region, Rect, REFERENCE_HEIGHT, REFERENCE_WIDTH};

/// Rendering mode a template was captured under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Capture device in front of a physical console
    Native,
    /// Emulator window filling the viewport
    Fullscreen,
    /// Emulator window with black bars around the picture
    Letterboxed,
}

impl Profile {
    pub fn dir_name(self) -> &'static str {
        match self {
            Profile::Native => "native",
            Profile::Fullscreen => "fullscreen",
            Profile::Letterboxed => "letterboxed",
        }
    }

    /// Profiles to try, in order, for the given environment.
    pub fn for_environment(real_hardware: bool) -> &'static [Profile] {
        if real_hardware {
            &[Profile::Native]
        } else {
            &[Profile::Fullscreen, Profile::Letterboxed]
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Reference crop for one marker under one profile.
#[derive(Debug, Clone)]
pub struct Template {
    pub marker: Marker,
    pub profile: Profile,
    pub region: Rect,
    pub reference: RgbaImage,
}

/// Read-only library of reference crops, loaded once at startup.
#[derive(Debug, Default)]
pub struct TemplateStore {
    by_marker: HashMap<Marker, Vec<Template>>,
}

impl TemplateStore {
    /// Where the reference for `marker` under `profile` lives.
    pub fn reference_path(references_dir: &Path, profile: Profile, marker: Marker) -> PathBuf {
        references_dir
            .join(profile.dir_name())
            .join(format!("{}.png", marker.file_stem()))
    }

    /// Load every marker for the given profiles.
    ///
    /// Expects `references_dir/<profile>/<marker>.png`. A file may be either the region crop
    /// itself or a full reference-resolution screenshot, which gets cropped here.
    pub fn load(references_dir: &Path, profiles: &[Profile]) -> Result<Self> {
        if !references_dir.is_dir() {
            bail!(
                "References directory {} does not exist",
                references_dir.display()
            );
        }

        let mut templates = Vec::new();
        for marker in Marker::ALL {
            for &profile in profiles {
                let path = Self::reference_path(references_dir, profile, marker);
                if !path.exists() {
                    debug!("Missing reference for {} ({}): {}", marker, profile, path.display());
                    continue;
                }
                match load_template(&path, marker, profile) {
                    Ok(t) => templates.push(t),
                    Err(e) => warn!("Failed to load reference for {}: {:#}", marker, e),
                }
            }
        }

        let store = Self::from_templates(templates);
        info!(
            "TemplateStore loaded {} templates from {}",
            store.template_count(),
            references_dir.display()
        );
        for marker in Marker::ALL {
            if store.templates_for(marker).is_empty() {
                warn!("No template for {}; it will never be detected", marker);
            }
        }
        Ok(store)
    }

    /// Build a store from already prepared templates, keeping their order per marker.
    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        let mut by_marker: HashMap<Marker, Vec<Template>> = HashMap::new();
        for t in templates {
            by_marker.entry(t.marker).or_default().push(t);
        }
        Self { by_marker }
    }

    /// All profiles of a marker, in load order.
    pub fn templates_for(&self, marker: Marker) -> &[Template] {
        self.by_marker.get(&marker).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn template_count(&self) -> usize {
        self.by_marker.values().map(Vec::len).sum()
    }
}

fn load_template(path: &Path, marker: Marker, profile: Profile) -> Result<Template> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .to_rgba8();
    let region = marker.region();

    let reference = if img.dimensions() == (region.w, region.h) {
        img
    } else if img.dimensions() == (REFERENCE_WIDTH, REFERENCE_HEIGHT) {
        crop_region(&img, &region)
    } else {
        bail!(
            "{} is {}x{}, expected a {}x{} crop or a full frame",
            path.display(),
            img.width(),
            img.height(),
            region.w,
            region.h
        );
    };

    Ok(Template {
        marker,
        profile,
        region,
        reference,
    })
}
