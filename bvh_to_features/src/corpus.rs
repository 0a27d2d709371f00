//! Corpus ingestion and the on-disk cache bundle.
//!
//! A bundle is a directory holding `data.npz` (normalized features, clip
//! ranges, statistics and the reference skeleton) and `manifest.json`
//! (everything needed to tell whether the arrays are still valid).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bevy_math::Vec3;
use ndarray::{Array1, Array2, ArrayView2, Axis, Dimension, concatenate, s};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bvh::{ParseOptions, parse_file, write_file};
use crate::config::CorpusConfig;
use crate::error::{MotionError, Result};
use crate::features::FeatureCodec;
use crate::layout::FeatureLayout;
use crate::motion::MotionClip;
use crate::normalize::NormalizationStats;
use crate::rotation::EulerOrder;
use crate::skeleton::Skeleton;

pub const CACHE_VERSION: u32 = 1;
pub const DATA_FILE: &str = "data.npz";
pub const MANIFEST_FILE: &str = "manifest.json";
/// Relative frame-rate difference below which two clips share a rate.
const RATE_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub loaded: Vec<String>,
    /// File and the reason it was dropped.
    pub skipped: Vec<(String, String)>,
    /// File and its frame count after resampling and trimming.
    pub filtered: Vec<(String, usize)>,
}

impl IngestReport {
    /// Every file the report mentions, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self
            .loaded
            .iter()
            .chain(self.skipped.iter().map(|(p, _)| p))
            .chain(self.filtered.iter().map(|(p, _)| p))
            .cloned()
            .collect();
        sources.sort();
        sources
    }

    pub fn attempted(&self) -> usize {
        self.loaded.len() + self.skipped.len() + self.filtered.len()
    }

    /// Share of files that failed to load.
    pub fn failure_rate(&self) -> f32 {
        match self.attempted() {
            0 => 0.0,
            n => self.skipped.len() as f32 / n as f32,
        }
    }
}

/// `.bvh` files directly inside `dir`, sorted by path.
pub fn list_bvh_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("bvh")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads one file and applies resampling, trimming and joint removal.
pub fn prepare_clip(path: &Path, config: &CorpusConfig) -> Result<MotionClip> {
    let mut clip = parse_file(path, ParseOptions::default())?;
    if let Some(fps) = config.resample_fps()? {
        clip = clip.resample(fps);
    }
    let end = config
        .trim_end
        .map_or(clip.frame_count(), |len| config.trim_begin.saturating_add(len));
    clip = clip.slice(config.trim_begin, end);
    if !config.drop_joints.is_empty() {
        clip.truncate_joints(&config.drop_joints)?;
    }
    Ok(clip)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Loads every file in parallel. Results keep the order of `paths`; files
/// that fail or fall outside the length limits end up in the report.
pub fn ingest(paths: &[PathBuf], config: &CorpusConfig) -> (Vec<(PathBuf, MotionClip)>, IngestReport) {
    let results: Vec<(PathBuf, Result<MotionClip>)> = paths
        .par_iter()
        .map(|path| (path.clone(), prepare_clip(path, config)))
        .collect();

    let mut clips = Vec::new();
    let mut report = IngestReport::default();
    for (path, result) in results {
        match result {
            Ok(clip) => {
                let frames = clip.frame_count();
                let too_long = config.max_clip_len.is_some_and(|max| frames > max);
                if frames < config.min_clip_len.max(1) || too_long {
                    info!("Filtered {} with {} frames", path.display(), frames);
                    report.filtered.push((display(&path), frames));
                } else {
                    report.loaded.push(display(&path));
                    clips.push((path, clip));
                }
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                report.skipped.push((display(&path), e.to_string()));
            }
        }
    }
    (clips, report)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub joint_names: Vec<String>,
    /// Every `.bvh` file the corpus was built from, sorted.
    pub sources: Vec<String>,
    /// Files whose clips are in the bundle, in row order.
    pub files: Vec<String>,
    /// Frame rate of the stored clips after resampling.
    pub fps: f32,
    pub config: CorpusConfig,
    pub layout: FeatureLayout,
    pub report: IngestReport,
}

#[derive(Debug, Clone)]
pub struct CorpusBundle {
    pub manifest: Manifest,
    /// Normalized features of all clips, stacked frame-wise.
    pub features: Array2<f32>,
    /// `[start, end)` rows of each clip in `features`.
    pub clip_ranges: Vec<(usize, usize)>,
    pub stats: NormalizationStats,
    /// Reference skeleton in source units.
    pub skeleton: Skeleton,
}

/// Runs the whole pipeline over the `.bvh` files of a folder.
pub fn build_corpus(dir: impl AsRef<Path>, config: &CorpusConfig) -> Result<CorpusBundle> {
    let paths = list_bvh_files(dir)?;
    let (clips, report) = ingest(&paths, config);
    CorpusBundle::from_clips(clips, report, config)
}

impl CorpusBundle {
    /// Encodes, concatenates and normalizes clips. Clips whose joints or
    /// frame rate differ from the first clip's are moved to the skip list.
    pub fn from_clips(
        clips: Vec<(PathBuf, MotionClip)>,
        mut report: IngestReport,
        config: &CorpusConfig,
    ) -> Result<Self> {
        let (reference, fps) = clips
            .first()
            .map(|(_, clip)| (clip.skeleton.clone(), clip.fps))
            .ok_or_else(|| MotionError::InvalidInput("no usable clips in corpus".to_string()))?;
        let names = reference.names();

        let mut kept = Vec::with_capacity(clips.len());
        for (path, clip) in clips {
            let reason = if clip.skeleton.names() != names {
                Some("joints differ from the reference skeleton".to_string())
            } else if (clip.fps - fps).abs() > RATE_TOLERANCE * clip.fps.max(fps) {
                Some(format!("frame rate {:.3} differs from {:.3}", clip.fps, fps))
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    warn!("Skipping {}: {}", path.display(), reason);
                    report.loaded.retain(|p| *p != display(&path));
                    report.skipped.push((display(&path), reason));
                }
                None => kept.push((path, clip)),
            }
        }
        let clips = kept;

        let codec = FeatureCodec::new(&reference, config.features.clone());
        let encoded = clips
            .par_iter()
            .map(|(_, clip)| codec.encode(clip))
            .collect::<Result<Vec<_>>>()?;

        let mut clip_ranges = Vec::with_capacity(encoded.len());
        let mut start = 0;
        for frames in &encoded {
            clip_ranges.push((start, start + frames.nrows()));
            start += frames.nrows();
        }
        let views: Vec<ArrayView2<f32>> = encoded.iter().map(|a| a.view()).collect();
        let raw = concatenate(Axis(0), &views).map_err(|e| MotionError::InvalidInput(e.to_string()))?;
        let stats = NormalizationStats::fit(&raw, config.normalization)?;
        let features = stats.apply(&raw)?;
        info!(
            "Encoded {} clips, {} frames of width {}",
            clip_ranges.len(),
            features.nrows(),
            features.ncols()
        );

        Ok(CorpusBundle {
            manifest: Manifest {
                version: CACHE_VERSION,
                joint_names: names,
                sources: report.sources(),
                files: clips.iter().map(|(p, _)| display(p)).collect(),
                fps,
                config: config.clone(),
                layout: codec.layout,
                report,
            },
            features,
            clip_ranges,
            stats,
            skeleton: reference,
        })
    }

    pub fn clip_count(&self) -> usize {
        self.clip_ranges.len()
    }

    /// Normalized frames of one clip.
    pub fn clip(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        let (start, end) = *self.clip_ranges.get(index)?;
        Some(self.features.slice(s![start..end, ..]))
    }

    pub fn codec(&self) -> FeatureCodec {
        FeatureCodec::new(&self.skeleton, self.manifest.config.features.clone())
    }

    /// Denormalizes and decodes one clip, in feature units.
    pub fn decode_clip(&self, index: usize) -> Result<MotionClip> {
        let frames = self
            .clip(index)
            .ok_or_else(|| MotionError::InvalidInput(format!("no clip {index} in bundle")))?
            .to_owned();
        let raw = self.stats.invert(&frames)?;
        self.codec().decode_clip(&raw, self.manifest.fps)
    }

    pub fn export_clip(&self, index: usize, path: impl AsRef<Path>, order: EulerOrder) -> Result<()> {
        write_file(path, &self.decode_clip(index)?, order)
    }

    /// Writes `data.npz` and `manifest.json` into `dir`. Files written by a
    /// failed save are removed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let data = dir.join(DATA_FILE);
        let manifest = dir.join(MANIFEST_FILE);
        let result = self.write_data(&data).and_then(|_| self.write_manifest(&manifest));
        if result.is_err() {
            for path in [&data, &manifest] {
                if path.exists() {
                    let _ = fs::remove_file(path);
                }
            }
        }
        result
    }

    fn write_data(&self, path: &Path) -> Result<()> {
        let ranges: Vec<i64> = self
            .clip_ranges
            .iter()
            .flat_map(|(a, b)| [*a as i64, *b as i64])
            .collect();
        let ranges = Array2::from_shape_vec((self.clip_ranges.len(), 2), ranges)
            .map_err(|e| MotionError::InvalidInput(e.to_string()))?;
        let offsets: Vec<f32> = self
            .skeleton
            .joint_offsets()
            .iter()
            .flat_map(|o| o.to_array())
            .collect();
        let offsets = Array2::from_shape_vec((self.skeleton.len(), 3), offsets)
            .map_err(|e| MotionError::InvalidInput(e.to_string()))?;
        let parents: Array1<i64> = self
            .skeleton
            .parent_indices()
            .iter()
            .map(|p| p.map_or(-1, |p| p as i64))
            .collect();

        let mut npz = NpzWriter::new(BufWriter::new(File::create(path)?));
        npz.add_array("features", &self.features)?;
        npz.add_array("clip_ranges", &ranges)?;
        npz.add_array("mean", &self.stats.mean)?;
        npz.add_array("std", &self.stats.std)?;
        npz.add_array("min", &self.stats.min)?;
        npz.add_array("max", &self.stats.max)?;
        npz.add_array("offsets", &offsets)?;
        npz.add_array("parents", &parents)?;
        let mut out = npz.finish()?;
        out.flush()?;
        Ok(())
    }

    fn write_manifest(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, &self.manifest)?;
        out.flush()?;
        Ok(())
    }

    /// Loads a bundle and checks it against the configuration and the
    /// source files the caller expects. Any disagreement is a
    /// [`MotionError::StaleCache`].
    pub fn load(dir: impl AsRef<Path>, expected: &CorpusConfig, sources: &[PathBuf]) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest: Manifest =
            serde_json::from_reader(BufReader::new(File::open(dir.join(MANIFEST_FILE))?))?;
        if manifest.version != CACHE_VERSION {
            return Err(MotionError::StaleCache(format!(
                "cache version {} but {} expected",
                manifest.version, CACHE_VERSION
            )));
        }
        if manifest.config != *expected {
            return Err(MotionError::StaleCache("corpus configuration changed".to_string()));
        }
        let mut sources: Vec<String> = sources.iter().map(|p| display(p)).collect();
        sources.sort();
        if manifest.sources != sources {
            return Err(MotionError::StaleCache("source files changed".to_string()));
        }
        let layout = FeatureLayout::new(manifest.joint_names.len(), &expected.features);
        if manifest.layout != layout {
            return Err(MotionError::StaleCache("feature layout changed".to_string()));
        }

        let mut npz = NpzReader::new(BufReader::new(File::open(dir.join(DATA_FILE))?))?;
        let features: Array2<f32> = read_array(&mut npz, "features")?;
        let ranges: Array2<i64> = read_array(&mut npz, "clip_ranges")?;
        let mean: Array1<f32> = read_array(&mut npz, "mean")?;
        let std: Array1<f32> = read_array(&mut npz, "std")?;
        let min: Array1<f32> = read_array(&mut npz, "min")?;
        let max: Array1<f32> = read_array(&mut npz, "max")?;
        let offsets: Array2<f32> = read_array(&mut npz, "offsets")?;
        let parents: Array1<i64> = read_array(&mut npz, "parents")?;

        let joints = manifest.joint_names.len();
        if features.ncols() != layout.width {
            return Err(MotionError::shape("cached feature width", layout.width, features.ncols()));
        }
        if offsets.dim() != (joints, 3) {
            return Err(MotionError::shape("cached offsets", joints * 3, offsets.len()));
        }
        if parents.len() != joints {
            return Err(MotionError::shape("cached parents", joints, parents.len()));
        }
        if ranges.ncols() != 2 {
            return Err(MotionError::shape("cached clip ranges", 2, ranges.ncols()));
        }
        let stats = NormalizationStats::from_columns(manifest.config.normalization, mean, std, min, max)?;
        if stats.width() != layout.width {
            return Err(MotionError::shape("cached statistics", layout.width, stats.width()));
        }

        let clip_ranges: Vec<(usize, usize)> = ranges
            .rows()
            .into_iter()
            .map(|r| (r[0].max(0) as usize, r[1].max(0) as usize))
            .collect();
        if let Some(bad) = clip_ranges
            .iter()
            .find(|(a, b)| a > b || *b > features.nrows())
        {
            return Err(MotionError::shape("cached clip range end", features.nrows(), bad.1));
        }

        let parents: Vec<Option<usize>> = parents
            .iter()
            .map(|p| usize::try_from(*p).ok())
            .collect();
        let offsets: Vec<Vec3> = offsets
            .rows()
            .into_iter()
            .map(|r| Vec3::new(r[0], r[1], r[2]))
            .collect();
        let skeleton = Skeleton::from_parts(&manifest.joint_names, &parents, &offsets)?;

        Ok(CorpusBundle {
            manifest,
            features,
            clip_ranges,
            stats,
            skeleton,
        })
    }
}

/// Reads one array. Archives differ on whether entry names carry the
/// `.npy` suffix, so both spellings are tried.
fn read_array<T, D>(npz: &mut NpzReader<BufReader<File>>, name: &str) -> Result<ndarray::Array<T, D>>
where
    T: ReadableElement,
    D: Dimension,
{
    match npz.by_name(name) {
        Ok(array) => Ok(array),
        Err(_) => Ok(npz.by_name(&format!("{name}.npy"))?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Joint;
    use bevy_math::Mat3;

    #[test]
    fn failure_rate() {
        let report = IngestReport {
            loaded: vec!["a.bvh".into(), "b.bvh".into()],
            skipped: vec![("c.bvh".into(), "bad".into())],
            filtered: vec![("d.bvh".into(), 1)],
        };
        assert_eq!(report.attempted(), 4);
        assert!((report.failure_rate() - 0.25).abs() < 1e-6);
        assert_eq!(IngestReport::default().failure_rate(), 0.0);
        assert_eq!(report.sources(), vec!["a.bvh", "b.bvh", "c.bvh", "d.bvh"]);
    }

    fn clip(fps: f32) -> MotionClip {
        let mut skeleton = Skeleton::new();
        skeleton.add_joint(Joint::new("root", None, Vec3::ZERO)).unwrap();
        skeleton.add_joint(Joint::new("leg", Some(0), Vec3::new(0.0, -40.0, 0.0))).unwrap();
        let roots = (0..6).map(|t| Vec3::new(t as f32, 45.0, 0.0)).collect();
        MotionClip::new(skeleton, roots, vec![vec![Mat3::IDENTITY; 2]; 6], fps).unwrap()
    }

    fn loaded(clips: &[(PathBuf, MotionClip)]) -> IngestReport {
        IngestReport {
            loaded: clips.iter().map(|(p, _)| display(p)).collect(),
            ..IngestReport::default()
        }
    }

    #[test]
    fn manifest_records_the_rate_of_the_stored_clips() {
        let config = CorpusConfig {
            target_fps: Some(30.0),
            ..CorpusConfig::default()
        };
        let clips = vec![(PathBuf::from("a.bvh"), clip(50.0).resample(30.0))];
        let report = loaded(&clips);
        let bundle = CorpusBundle::from_clips(clips, report, &config).unwrap();
        assert_eq!(bundle.manifest.fps, 50.0);
    }

    #[test]
    fn mixed_frame_rates_are_skipped() {
        let clips = vec![
            (PathBuf::from("a.bvh"), clip(30.0)),
            (PathBuf::from("b.bvh"), clip(50.0)),
            (PathBuf::from("c.bvh"), clip(30.0005)),
        ];
        let report = loaded(&clips);
        let bundle = CorpusBundle::from_clips(clips, report, &CorpusConfig::default()).unwrap();
        assert_eq!(bundle.manifest.files, vec!["a.bvh", "c.bvh"]);
        assert_eq!(bundle.manifest.report.loaded, vec!["a.bvh", "c.bvh"]);
        assert_eq!(bundle.manifest.report.skipped.len(), 1);
        assert_eq!(bundle.manifest.report.skipped[0].0, "b.bvh");
        assert_eq!(bundle.manifest.sources, vec!["a.bvh", "b.bvh", "c.bvh"]);
        assert_eq!(bundle.clip_ranges, vec![(0, 6), (6, 12)]);
    }

    #[test]
    fn empty_corpus_is_an_error() {
        let result = CorpusBundle::from_clips(Vec::new(), IngestReport::default(), &CorpusConfig::default());
        assert!(matches!(result, Err(MotionError::InvalidInput(_))));
    }
}
