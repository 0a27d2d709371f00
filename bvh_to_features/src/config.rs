//! Configuration surface of the feature pipeline. Every field has a
//! default, so partial JSON documents are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::ChannelBlock;
use crate::normalize::NormalizationMode;
use crate::rig::{RigInfo, rig};
use crate::rotation::{EulerOrder, RotationRepr};

/// How the per-frame heading change is stored in the root block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RootRotation {
    /// One signed angle in radians.
    #[default]
    #[serde(rename = "angle")]
    Angle,
    /// A yaw rotation in the configured rotation representation.
    #[serde(rename = "rot")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RootLinear {
    #[default]
    #[serde(rename = "dxdy")]
    Planar,
    #[serde(rename = "dxdydz")]
    Spatial,
}

impl RootLinear {
    pub fn width(self) -> usize {
        match self {
            RootLinear::Planar => 2,
            RootLinear::Spatial => 3,
        }
    }
}

/// Target unit of the features. Source files are read as centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "cm", alias = "centimeter")]
    Centimeter,
    #[serde(rename = "meter", alias = "m")]
    Meter,
    #[serde(rename = "foot", alias = "feet")]
    Foot,
}

impl Unit {
    /// Factor converting centimetres into this unit.
    pub fn scale(self) -> f32 {
        match self {
            Unit::Centimeter => 1.0,
            Unit::Meter => 1.0 / 100.0,
            Unit::Foot => 1.0 / 30.48,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub rotation_repr: RotationRepr,
    pub root_rotation: RootRotation,
    pub root_linear: RootLinear,
    pub channels: Vec<ChannelBlock>,
    /// Calibration added to every frame's heading, in degrees.
    pub heading_offset_deg: f32,
    pub unit: Unit,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            rotation_repr: RotationRepr::SixD,
            root_rotation: RootRotation::Angle,
            root_linear: RootLinear::Planar,
            channels: vec![ChannelBlock::Position, ChannelBlock::Velocity, ChannelBlock::Rotation],
            heading_offset_deg: 0.0,
            unit: Unit::Centimeter,
        }
    }
}

impl FeatureConfig {
    /// Defaults with the unit and heading calibration of a rig table.
    pub fn for_rig(rig: &RigInfo) -> Self {
        FeatureConfig {
            unit: rig.unit,
            heading_offset_deg: rig.heading_offset_deg,
            ..FeatureConfig::default()
        }
    }

    pub fn has(&self, block: ChannelBlock) -> bool {
        self.channels.contains(&block)
    }
}

/// Settings for building a corpus bundle out of a folder of clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub features: FeatureConfig,
    /// Name of a static rig table; supplies the Euler order used on export
    /// and the default resampling rate.
    pub rig: Option<String>,
    pub target_fps: Option<f32>,
    /// Frames dropped from the start of every clip.
    pub trim_begin: usize,
    /// Frames kept (after `trim_begin`); `None` keeps the rest.
    pub trim_end: Option<usize>,
    pub min_clip_len: usize,
    pub max_clip_len: Option<usize>,
    pub normalization: NormalizationMode,
    /// Joints deleted (with descendants) before encoding.
    pub drop_joints: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        CorpusConfig {
            features: FeatureConfig::default(),
            rig: None,
            target_fps: None,
            trim_begin: 0,
            trim_end: None,
            min_clip_len: 2,
            max_clip_len: None,
            normalization: NormalizationMode::ZScore,
            drop_joints: Vec::new(),
        }
    }
}

impl CorpusConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rate clips are resampled to: `target_fps` when set, otherwise the
    /// named rig's capture rate.
    pub fn resample_fps(&self) -> Result<Option<f32>> {
        match (self.target_fps, &self.rig) {
            (Some(fps), _) => Ok(Some(fps)),
            (None, Some(name)) => Ok(Some(rig(name)?.fps)),
            (None, None) => Ok(None),
        }
    }

    /// Euler order for exported clips: the rig's when one is named.
    pub fn euler_order(&self) -> Result<EulerOrder> {
        match &self.rig {
            Some(name) => Ok(rig(name)?.euler_order),
            None => Ok(EulerOrder::ZYX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config = CorpusConfig::from_json_str(
            r#"{ "features": { "rotation_repr": "expmap", "unit": "meter" }, "target_fps": 30 }"#,
        )
        .unwrap();
        assert_eq!(config.features.rotation_repr, RotationRepr::ExpMap);
        assert_eq!(config.features.unit, Unit::Meter);
        assert_eq!(config.features.root_rotation, RootRotation::Angle);
        assert_eq!(config.features.channels.len(), 3);
        assert_eq!(config.target_fps, Some(30.0));
        assert_eq!(config.min_clip_len, 2);
    }

    #[test]
    fn channel_names() {
        let config: FeatureConfig =
            serde_json::from_str(r#"{ "channels": ["angle", "offset"], "root_linear": "dxdydz" }"#).unwrap();
        assert_eq!(config.channels, vec![ChannelBlock::Rotation, ChannelBlock::Offset]);
        assert_eq!(config.root_linear.width(), 3);
    }

    #[test]
    fn unknown_variants_fail() {
        assert!(serde_json::from_str::<FeatureConfig>(r#"{ "rotation_repr": "euler" }"#).is_err());
        assert!(CorpusConfig::from_json_str(r#"{ "normalization": "robust" }"#).is_err());
    }

    #[test]
    fn rig_supplies_export_order() {
        let config = CorpusConfig::from_json_str(r#"{ "rig": "STYLE100_walk" }"#).unwrap();
        assert_eq!(config.euler_order().unwrap(), EulerOrder::YXZ);
        assert_eq!(CorpusConfig::default().euler_order().unwrap(), EulerOrder::ZYX);
        let unknown = CorpusConfig::from_json_str(r#"{ "rig": "mystery" }"#).unwrap();
        assert!(unknown.euler_order().is_err());
    }

    #[test]
    fn rig_supplies_default_rate() {
        let config = CorpusConfig::from_json_str(r#"{ "rig": "LAFAN1" }"#).unwrap();
        assert_eq!(config.resample_fps().unwrap(), Some(60.0));
        let explicit = CorpusConfig {
            target_fps: Some(30.0),
            ..config
        };
        assert_eq!(explicit.resample_fps().unwrap(), Some(30.0));
        assert_eq!(CorpusConfig::default().resample_fps().unwrap(), None);
    }

    #[test]
    fn rig_calibration() {
        let features = FeatureConfig::for_rig(&crate::rig::LAFAN1);
        assert_eq!(features.unit, Unit::Meter);
        assert_eq!(features.heading_offset_deg, -180.0);
    }

    #[test]
    fn unit_scales() {
        assert_eq!(Unit::Centimeter.scale(), 1.0);
        assert_eq!(Unit::Meter.scale(), 0.01);
        assert!((Unit::Foot.scale() * 30.48 - 1.0).abs() < 1e-6);
    }
}
