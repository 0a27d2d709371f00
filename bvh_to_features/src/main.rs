use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use bvh_to_features::corpus::{ingest, list_bvh_files};
use bvh_to_features::{CorpusBundle, CorpusConfig, rig};
use tracing::{info, warn};

/// Share of unreadable files above which the run is reported as suspicious.
const FAILURE_WARNING_RATE: f32 = 0.1;

fn load_config(path: Option<&String>) -> Result<CorpusConfig> {
    let config = match path {
        Some(path) => CorpusConfig::from_path(path).with_context(|| format!("Could not read config {path}"))?,
        None => CorpusConfig::default(),
    };
    if let Some(name) = &config.rig {
        let rig = rig(name)?;
        info!("Using rig {} with {} joints", rig.name, rig.joint_count());
    }
    Ok(config)
}

fn convert_bvh_to_features(source_folder: &str, output_folder: &str, config: &CorpusConfig) -> Result<usize> {
    let paths = list_bvh_files(source_folder).with_context(|| format!("Could not list {source_folder}"))?;
    if paths.is_empty() {
        return Ok(0);
    }
    let (clips, report) = ingest(&paths, config);
    if report.failure_rate() > FAILURE_WARNING_RATE {
        warn!(
            "{} of {} files could not be loaded",
            report.skipped.len(),
            report.attempted()
        );
    }
    let bundle = CorpusBundle::from_clips(clips, report, config)
        .with_context(|| format!("Could not build corpus from {source_folder}"))?;
    bundle
        .save(Path::new(output_folder))
        .with_context(|| format!("Could not write cache to {output_folder}"))?;
    Ok(bundle.clip_count())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: {} <source_folder> <output_folder> [config.json]", args[0]);
        std::process::exit(1);
    }
    let config = match load_config(args.get(3)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    match convert_bvh_to_features(&args[1], &args[2], &config) {
        Ok(0) => println!("No BVH files found to convert"),
        Ok(count) => info!("Successfully converted {} BVH files to features", count),
        Err(e) => {
            eprintln!("Error converting BVH to features: {:#}", e);
            std::process::exit(1);
        }
    }
}
