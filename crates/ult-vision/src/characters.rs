use crate::perception::diff_percent;
use anyhow::{Context, Result};
use image::RgbaImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Character pick strips are noisier than menu markers.
pub const PICK_TOLERANCE: f64 = 0.02;

/// Verdict on whether the select screen shows the character we asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickCheck {
    /// The strip matches the stored reference for this character
    Confirmed,
    /// No reference existed and nothing else matched; the strip was saved as the reference
    Learned,
    /// No reference exists, but the strip looks like other characters. Accepted anyway.
    Ambiguous(Vec<String>),
    /// The strip matches exactly one other character: the cursor landed on the wrong slot
    Wrong(String),
    /// A reference exists and does not match, but nothing else does either. Accepted.
    Unrecognized,
}

impl PickCheck {
    pub fn accepted(&self) -> bool {
        !matches!(self, PickCheck::Wrong(_))
    }
}

/// Reference crops of each character's name strip, learned as picks happen.
pub struct CharacterReferences {
    dir: PathBuf,
    references: BTreeMap<String, RgbaImage>,
    tolerance: f64,
}

impl CharacterReferences {
    /// Load every `<Name>.png` in `dir`. A missing directory is created empty.
    pub fn load(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut references = BTreeMap::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match image::open(&path) {
                Ok(img) => {
                    references.insert(name.to_string(), img.to_rgba8());
                }
                Err(e) => warn!("Failed to load character reference {}: {}", path.display(), e),
            }
        }

        info!(
            "Loaded {} character references from {}",
            references.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            references,
            tolerance: PICK_TOLERANCE,
        })
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Every known character whose reference matches the strip.
    pub fn which(&self, strip: &RgbaImage) -> Vec<String> {
        self.references
            .iter()
            .filter(|(_, reference)| diff_percent(strip, reference) <= self.tolerance)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Compare the pick strip with what `character` should look like, learning unknown ones.
    pub fn verify_pick(&mut self, character: &str, strip: &RgbaImage) -> Result<PickCheck> {
        if let Some(reference) = self.references.get(character) {
            if diff_percent(strip, reference) <= self.tolerance {
                return Ok(PickCheck::Confirmed);
            }
            let mut might_be = self.which(strip);
            might_be.retain(|name| name != character);
            return Ok(match might_be.len() {
                1 => PickCheck::Wrong(might_be.remove(0)),
                _ => PickCheck::Unrecognized,
            });
        }

        let might_be = self.which(strip);
        if might_be.is_empty() {
            let path = self.dir.join(format!("{}.png", character));
            strip
                .save(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            debug!("Learned pick strip for {}", character);
            self.references.insert(character.to_string(), strip.clone());
            Ok(PickCheck::Learned)
        } else {
            Ok(PickCheck::Ambiguous(might_be))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(shade: u8) -> RgbaImage {
        RgbaImage::from_pixel(300, 10, image::Rgba([shade, shade, shade, 255]))
    }

    #[test]
    fn test_learn_then_confirm() {
        let dir = tempfile::tempdir().unwrap();
        let mut refs = CharacterReferences::load(dir.path()).unwrap();
        assert!(refs.is_empty());

        assert_eq!(refs.verify_pick("Mario", &strip(10)).unwrap(), PickCheck::Learned);
        assert!(dir.path().join("Mario.png").exists());
        assert_eq!(refs.verify_pick("Mario", &strip(10)).unwrap(), PickCheck::Confirmed);

        let reloaded = CharacterReferences::load(dir.path()).unwrap();
        assert_eq!(reloaded.which(&strip(10)), vec!["Mario".to_string()]);
    }

    #[test]
    fn test_wrong_pick_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut refs = CharacterReferences::load(dir.path()).unwrap();
        refs.verify_pick("Mario", &strip(10)).unwrap();
        refs.verify_pick("Luigi", &strip(200)).unwrap();

        let check = refs.verify_pick("Luigi", &strip(10)).unwrap();
        assert_eq!(check, PickCheck::Wrong("Mario".to_string()));
        assert!(!check.accepted());
    }

    #[test]
    fn test_unknown_pick_resembling_others_is_not_learned() {
        let dir = tempfile::tempdir().unwrap();
        let mut refs = CharacterReferences::load(dir.path()).unwrap();
        refs.verify_pick("Mario", &strip(10)).unwrap();

        let check = refs.verify_pick("DrMario", &strip(10)).unwrap();
        assert_eq!(check, PickCheck::Ambiguous(vec!["Mario".to_string()]));
        assert!(check.accepted());
        assert!(!dir.path().join("DrMario.png").exists());
    }
}
