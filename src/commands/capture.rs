use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use ult_capture::{crop_region, FrameSource};
use ult_vision::{Marker, Profile, TemplateStore};

/// Profile named on the command line, or the first one used in this environment.
pub fn resolve_profile(name: Option<&str>, real_hardware: bool) -> Result<Profile> {
    let Some(name) = name else {
        return Ok(Profile::for_environment(real_hardware)[0]);
    };
    [Profile::Native, Profile::Fullscreen, Profile::Letterboxed]
        .into_iter()
        .find(|p| p.dir_name().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("unknown profile '{}'", name))
}

/// Sample the screen and store `marker`'s region as its reference under `profile`.
///
/// The whole frame is kept next to it under `captures/` so a bad crop can be redone
/// without going back to that screen.
pub async fn capture_reference<S: FrameSource>(
    source: &mut S,
    references_dir: &Path,
    marker: Marker,
    profile: Profile,
) -> Result<PathBuf> {
    let frame = source.sample().await?;

    let path = TemplateStore::reference_path(references_dir, profile, marker);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    crop_region(&frame, &marker.region())
        .save(&path)
        .with_context(|| format!("Failed to save {}", path.display()))?;

    let captures = references_dir.join("captures");
    fs::create_dir_all(&captures)
        .with_context(|| format!("Failed to create {}", captures.display()))?;
    let full = captures.join(format!("{}-{}.png", profile, marker.file_stem()));
    frame
        .save(&full)
        .with_context(|| format!("Failed to save {}", full.display()))?;

    info!("Saved {} reference ({}) to {}", marker, profile, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ult_state::fixtures::{frame_with, ScriptedSource};
    use ult_vision::{Matcher, DEFAULT_TOLERANCE};

    #[test]
    fn test_resolve_profile() {
        assert_eq!(resolve_profile(None, true).unwrap(), Profile::Native);
        assert_eq!(resolve_profile(None, false).unwrap(), Profile::Fullscreen);
        assert_eq!(
            resolve_profile(Some("Letterboxed"), false).unwrap(),
            Profile::Letterboxed
        );
        assert!(resolve_profile(Some("widescreen"), false).is_err());
    }

    #[tokio::test]
    async fn test_captured_reference_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ScriptedSource::new();
        source.show(frame_with(&[Marker::Ruleset]));

        let path = capture_reference(&mut source, dir.path(), Marker::Ruleset, Profile::Fullscreen)
            .await
            .unwrap();
        assert!(path.ends_with("fullscreen/ruleset.png"));
        assert!(dir.path().join("captures/fullscreen-ruleset.png").exists());

        let store = TemplateStore::load(dir.path(), &[Profile::Fullscreen]).unwrap();
        let matcher = Matcher::new(store, DEFAULT_TOLERANCE);
        assert!(matcher.marker_present(&frame_with(&[Marker::Ruleset]), Marker::Ruleset));
        assert!(!matcher.marker_present(&frame_with(&[]), Marker::Ruleset));
    }
}
