//! CLI tool to run a saved screenshot through every marker template.
//! Usage: cargo run -p ult-vision --features cli --bin analyze_frame -- <screenshot.png> <references_dir> [output_dir]

use std::path::PathBuf;
use ult_capture::{crop_region, normalize_frame};
use ult_vision::{diff_percent, Marker, Profile, TemplateStore, DEFAULT_TOLERANCE};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <screenshot.png> <references_dir> [output_dir]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let references_dir = PathBuf::from(&args[2]);
    let output_dir = args.get(3).map(PathBuf::from);
    if let Some(dir) = &output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }

    println!("Loading image: {}", input_path.display());
    let img = match image::open(&input_path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            eprintln!("Failed to open image: {}", e);
            std::process::exit(1);
        }
    };
    println!("Image size: {}x{}", img.width(), img.height());
    let frame = normalize_frame(img);

    let profiles = [Profile::Native, Profile::Fullscreen, Profile::Letterboxed];
    let store = match TemplateStore::load(&references_dir, &profiles) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to load templates: {:#}", e);
            std::process::exit(1);
        }
    };

    println!("\n=== Markers (tolerance {:.1}%) ===", DEFAULT_TOLERANCE * 100.0);
    for marker in Marker::ALL {
        let region = marker.region();
        let crop = crop_region(&frame, &region);
        if let Some(dir) = &output_dir {
            let path = dir.join(format!("{}.png", marker.file_stem()));
            if let Err(e) = crop.save(&path) {
                eprintln!("Failed to save {}: {}", path.display(), e);
            }
        }

        let templates = store.templates_for(marker);
        if templates.is_empty() {
            println!("{:<16} no template", marker.to_string());
            continue;
        }
        for t in templates {
            let diff = diff_percent(&crop, &t.reference);
            println!(
                "{:<16} {:<12} diff={:>6.2}% {}",
                marker.to_string(),
                t.profile.to_string(),
                diff * 100.0,
                if diff <= DEFAULT_TOLERANCE { "MATCH" } else { "" }
            );
        }
    }

    if let Some(dir) = &output_dir {
        println!("\nRegion crops saved to: {}", dir.display());
    }
}
