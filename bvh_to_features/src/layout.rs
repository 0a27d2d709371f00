//! Column layout of a feature frame, computed once per skeleton and
//! configuration.
//!
//! ```text
//! | root linear | heading | height | position | velocity | rotation | offset |
//! ```
//!
//! Channel blocks appear in that fixed order whatever order the
//! configuration lists them in; disabled blocks take no columns.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::{FeatureConfig, RootLinear, RootRotation};
use crate::error::{MotionError, Result};
use crate::rotation::RotationRepr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelBlock {
    #[serde(rename = "position")]
    Position,
    #[serde(rename = "velocity")]
    Velocity,
    #[serde(rename = "angle", alias = "rotation")]
    Rotation,
    #[serde(rename = "offset")]
    Offset,
}

impl ChannelBlock {
    pub const ALL: [ChannelBlock; 4] = [
        ChannelBlock::Position,
        ChannelBlock::Velocity,
        ChannelBlock::Rotation,
        ChannelBlock::Offset,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub joint_count: usize,
    pub rotation_repr: RotationRepr,
    pub root_rotation: RootRotation,
    pub root_linear_repr: RootLinear,
    pub root_linear: Range<usize>,
    pub heading: Range<usize>,
    pub height: usize,
    pub position: Option<Range<usize>>,
    pub velocity: Option<Range<usize>>,
    pub rotation: Option<Range<usize>>,
    pub offset: Option<Range<usize>>,
    pub width: usize,
}

impl FeatureLayout {
    pub fn new(joint_count: usize, config: &FeatureConfig) -> Self {
        let linear_width = config.root_linear.width();
        let heading_width = match config.root_rotation {
            RootRotation::Angle => 1,
            RootRotation::Full => config.rotation_repr.width(),
        };
        let root_linear = 0..linear_width;
        let heading = linear_width..linear_width + heading_width;
        let height = heading.end;

        let mut cursor = height + 1;
        let mut take = |block: ChannelBlock, per_joint: usize| {
            config.has(block).then(|| {
                let range = cursor..cursor + joint_count * per_joint;
                cursor = range.end;
                range
            })
        };
        let position = take(ChannelBlock::Position, 3);
        let velocity = take(ChannelBlock::Velocity, 3);
        let rotation = take(ChannelBlock::Rotation, config.rotation_repr.width());
        let offset = take(ChannelBlock::Offset, 3);

        FeatureLayout {
            joint_count,
            rotation_repr: config.rotation_repr,
            root_rotation: config.root_rotation,
            root_linear_repr: config.root_linear,
            root_linear,
            heading,
            height,
            position,
            velocity,
            rotation,
            offset,
            width: cursor,
        }
    }

    /// Width of the root block (linear velocity, heading and height).
    pub fn root_width(&self) -> usize {
        self.height + 1
    }

    pub fn block(&self, block: ChannelBlock) -> Option<Range<usize>> {
        match block {
            ChannelBlock::Position => self.position.clone(),
            ChannelBlock::Velocity => self.velocity.clone(),
            ChannelBlock::Rotation => self.rotation.clone(),
            ChannelBlock::Offset => self.offset.clone(),
        }
    }

    pub fn block_width(&self, block: ChannelBlock) -> usize {
        match block {
            ChannelBlock::Rotation => self.rotation_repr.width(),
            _ => 3,
        }
    }

    /// Columns holding one joint's values inside a block.
    pub fn joint_columns(&self, block: ChannelBlock, joint: usize) -> Option<Range<usize>> {
        if joint >= self.joint_count {
            return None;
        }
        let range = self.block(block)?;
        let width = self.block_width(block);
        let start = range.start + joint * width;
        Some(start..start + width)
    }

    pub fn enabled_blocks(&self) -> Vec<ChannelBlock> {
        ChannelBlock::ALL
            .into_iter()
            .filter(|b| self.block(*b).is_some())
            .collect()
    }

    pub fn require(&self, block: ChannelBlock) -> Result<Range<usize>> {
        self.block(block).ok_or_else(|| {
            MotionError::InvalidInput(format!("feature layout has no {block:?} block"))
        })
    }

    pub fn check_width(&self, actual: usize) -> Result<()> {
        if actual != self.width {
            return Err(MotionError::shape("feature width", self.width, actual));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let layout = FeatureLayout::new(22, &FeatureConfig::default());
        assert_eq!(layout.root_linear, 0..2);
        assert_eq!(layout.heading, 2..3);
        assert_eq!(layout.height, 3);
        assert_eq!(layout.position, Some(4..70));
        assert_eq!(layout.velocity, Some(70..136));
        assert_eq!(layout.rotation, Some(136..268));
        assert_eq!(layout.offset, None);
        assert_eq!(layout.width, 268);
    }

    #[test]
    fn blocks_follow_fixed_order() {
        let config = FeatureConfig {
            channels: vec![ChannelBlock::Offset, ChannelBlock::Rotation, ChannelBlock::Position],
            rotation_repr: RotationRepr::Quaternion,
            root_rotation: RootRotation::Full,
            root_linear: RootLinear::Spatial,
            ..FeatureConfig::default()
        };
        let layout = FeatureLayout::new(3, &config);
        assert_eq!(layout.root_linear, 0..3);
        assert_eq!(layout.heading, 3..7);
        assert_eq!(layout.height, 7);
        assert_eq!(layout.position, Some(8..17));
        assert_eq!(layout.velocity, None);
        assert_eq!(layout.rotation, Some(17..29));
        assert_eq!(layout.offset, Some(29..38));
        assert_eq!(
            layout.enabled_blocks(),
            vec![ChannelBlock::Position, ChannelBlock::Rotation, ChannelBlock::Offset]
        );
    }

    #[test]
    fn joint_columns() {
        let layout = FeatureLayout::new(3, &FeatureConfig::default());
        assert_eq!(layout.joint_columns(ChannelBlock::Position, 1), Some(7..10));
        assert_eq!(layout.joint_columns(ChannelBlock::Rotation, 2), Some(34..40));
        assert_eq!(layout.joint_columns(ChannelBlock::Rotation, 3), None);
        assert_eq!(layout.joint_columns(ChannelBlock::Offset, 0), None);
    }

    #[test]
    fn width_check() {
        let layout = FeatureLayout::new(3, &FeatureConfig::default());
        assert!(layout.check_width(layout.width).is_ok());
        assert!(matches!(
            layout.check_width(layout.width + 1),
            Err(MotionError::ShapeMismatch { .. })
        ));
    }
}
