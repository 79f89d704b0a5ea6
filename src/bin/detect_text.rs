//! Offline OCR check: prepare an image and print the fragments the detector finds
//! Run with: cargo run --release --bin detect_text -- <image_path> [lang ...]

use anyhow::{Context, Result};
use image_translator::core::{Config, Language, LanguageSet};
use image_translator::services::{DetectorFactory, OnnxDetectorFactory};
use image_translator::utils::prepare_image_async;
use std::path::Path;
use std::time::Instant;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("image_translator=debug,ort=off")
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(image_path) = args.next() else {
        eprintln!("Usage: detect_text <image_path> [lang ...]");
        std::process::exit(2);
    };

    if !Path::new(&image_path).exists() {
        eprintln!("Image not found: {}", image_path);
        std::process::exit(1);
    }

    let languages: LanguageSet = args
        .map(|code| code.parse::<Language>())
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .collect();
    let languages = if languages.is_empty() {
        LanguageSet::new([Language::English])
    } else {
        languages
    };

    let config = Config::new().context("Failed to load configuration")?;

    let bytes = std::fs::read(&image_path).with_context(|| format!("Failed to read {}", image_path))?;
    let prepared = prepare_image_async(bytes, config.max_dimension()).await?;
    info!(
        "Prepared image: {}x{}{}",
        prepared.width(),
        prepared.height(),
        if prepared.resized { " (downsampled)" } else { "" }
    );

    info!("Loading models from: {}", config.detection.models_dir.display());
    let factory = OnnxDetectorFactory::new(config.detection.clone());
    let detector = factory.create(&languages)?;

    let start = Instant::now();
    let fragments = tokio::task::spawn_blocking(move || detector.detect(&prepared.image)).await??;

    println!("\n=== Results [{}] ({:.2?}) ===", languages, start.elapsed());
    if fragments.is_empty() {
        println!("  (no text detected)");
    } else {
        for (i, fragment) in fragments.iter().enumerate() {
            println!("  {}. {}", i + 1, fragment);
        }
    }

    Ok(())
}
