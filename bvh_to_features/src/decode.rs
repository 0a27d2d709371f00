//! Reconstruction of world-space motion from feature frames.
//!
//! A [`PoseSource`] recovers the heading-normalized joint positions of every
//! frame; [`FeatureCodec::decode_with`] then integrates the root block and
//! places the poses in the world.

use std::fmt;
use std::str::FromStr;

use bevy_math::{Mat3, Vec3};
use ndarray::{Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};

use crate::config::{RootLinear, RootRotation};
use crate::error::{MotionError, Result};
use crate::features::FeatureCodec;
use crate::kinematics::{FkInput, forward_kinematics};
use crate::layout::ChannelBlock;
use crate::motion::MotionClip;
use crate::rotation::{yaw_matrix, yaw_of};
use crate::skeleton::Skeleton;
use crate::trajectory::{RootState, TrajectoryIntegrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DecodeMode {
    /// Positions read from the position block.
    Position,
    /// Velocity block summed up from the first frame's positions.
    Velocity,
    /// Forward kinematics over the rotation block.
    #[default]
    Angle,
    /// Rotations refined against the position block by an [`IkSolver`].
    IkFk,
}

impl FromStr for DecodeMode {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "position" => Ok(DecodeMode::Position),
            "velocity" => Ok(DecodeMode::Velocity),
            "angle" => Ok(DecodeMode::Angle),
            "ik_fk" => Ok(DecodeMode::IkFk),
            _ => Err(MotionError::UnsupportedDecodeMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for DecodeMode {
    type Error = MotionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DecodeMode> for String {
    fn from(mode: DecodeMode) -> String {
        mode.to_string()
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecodeMode::Position => "position",
            DecodeMode::Velocity => "velocity",
            DecodeMode::Angle => "angle",
            DecodeMode::IkFk => "ik_fk",
        })
    }
}

/// Inverse kinematics collaborator: refines local rotations so that forward
/// kinematics reaches the target joint positions.
pub trait IkSolver: Send + Sync {
    fn solve(
        &self,
        skeleton: &Skeleton,
        targets: &[Vec<Vec3>],
        initial: &[Vec<Mat3>],
    ) -> Result<Vec<Vec<Mat3>>>;
}

/// Recovers heading-normalized joint positions, one `Vec` per frame.
pub trait PoseSource {
    fn local_positions(&self, codec: &FeatureCodec, frames: &Array2<f32>) -> Result<Vec<Vec<Vec3>>>;
}

pub struct PositionSource;
pub struct VelocitySource;
pub struct AngleSource;
pub struct IkFkSource<'a> {
    pub solver: &'a dyn IkSolver,
}

fn read_block(codec: &FeatureCodec, row: ArrayView1<f32>, block: ChannelBlock) -> Result<Vec<Vec3>> {
    codec.layout.require(block)?;
    (0..codec.layout.joint_count)
        .map(|j| {
            let cols = codec
                .layout
                .joint_columns(block, j)
                .ok_or_else(|| MotionError::UnknownJoint(j.to_string()))?;
            Ok(Vec3::new(row[cols.start], row[cols.start + 1], row[cols.start + 2]))
        })
        .collect()
}

impl PoseSource for PositionSource {
    fn local_positions(&self, codec: &FeatureCodec, frames: &Array2<f32>) -> Result<Vec<Vec<Vec3>>> {
        frames
            .rows()
            .into_iter()
            .map(|row| read_block(codec, row, ChannelBlock::Position))
            .collect()
    }
}

impl PoseSource for VelocitySource {
    fn local_positions(&self, codec: &FeatureCodec, frames: &Array2<f32>) -> Result<Vec<Vec<Vec3>>> {
        let mut rows = frames.rows().into_iter();
        let Some(first) = rows.next() else {
            return Ok(Vec::new());
        };
        let mut current = read_block(codec, first, ChannelBlock::Position)?;
        let mut out = vec![current.clone()];
        for row in rows {
            let velocity = read_block(codec, row, ChannelBlock::Velocity)?;
            for (p, v) in current.iter_mut().zip(&velocity) {
                *p += *v;
            }
            out.push(current.clone());
        }
        Ok(out)
    }
}

impl PoseSource for AngleSource {
    fn local_positions(&self, codec: &FeatureCodec, frames: &Array2<f32>) -> Result<Vec<Vec<Vec3>>> {
        let rotations = codec.rotations(frames)?;
        angle_fk(codec, frames, &rotations)
    }
}

impl PoseSource for IkFkSource<'_> {
    fn local_positions(&self, codec: &FeatureCodec, frames: &Array2<f32>) -> Result<Vec<Vec<Vec3>>> {
        let targets = PositionSource.local_positions(codec, frames)?;
        let initial = codec.rotations(frames)?;
        let rotations = self.solver.solve(&codec.skeleton, &targets, &initial)?;
        angle_fk(codec, frames, &rotations)
    }
}

/// Forward kinematics with the root at the origin, decoded offsets and the
/// height column added afterwards.
fn angle_fk(codec: &FeatureCodec, frames: &Array2<f32>, rotations: &[Vec<Mat3>]) -> Result<Vec<Vec<Vec3>>> {
    let heights: Vec<f32> = frames.column(codec.layout.height).to_vec();
    let roots = vec![Vec3::ZERO; frames.nrows()];
    let offsets = match codec.layout.offset {
        Some(_) => Some(
            frames
                .rows()
                .into_iter()
                .map(|row| read_block(codec, row, ChannelBlock::Offset))
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    let mut input = FkInput::new(&roots, rotations).with_heights(&heights);
    if let Some(offsets) = &offsets {
        input = input.with_offsets(offsets);
    }
    Ok(forward_kinematics(&codec.skeleton, &input)?
        .into_iter()
        .map(|pose| pose.positions)
        .collect())
}

impl FeatureCodec {
    fn check(&self, frames: &Array2<f32>) -> Result<()> {
        self.layout.check_width(frames.ncols())
    }

    /// Local rotations of every frame, root still heading-normalized.
    pub fn rotations(&self, frames: &Array2<f32>) -> Result<Vec<Vec<Mat3>>> {
        self.check(frames)?;
        self.layout.require(ChannelBlock::Rotation)?;
        let repr = self.config.rotation_repr;
        frames
            .rows()
            .into_iter()
            .map(|row| {
                (0..self.layout.joint_count)
                    .map(|j| {
                        let cols = self
                            .layout
                            .joint_columns(ChannelBlock::Rotation, j)
                            .ok_or_else(|| MotionError::UnknownJoint(j.to_string()))?;
                        repr.decode(&row.slice(s![cols]).to_vec())
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    fn heading_delta(&self, row: ArrayView1<f32>) -> Result<f32> {
        Ok(match self.config.root_rotation {
            RootRotation::Angle => row[self.layout.heading.start],
            RootRotation::Full => {
                let values = row.slice(s![self.layout.heading.clone()]).to_vec();
                yaw_of(&self.config.rotation_repr.decode(&values)?)
            }
        })
    }

    fn root_velocity(&self, row: ArrayView1<f32>) -> Vec3 {
        let start = self.layout.root_linear.start;
        match self.config.root_linear {
            RootLinear::Planar => Vec3::new(row[start], 0.0, row[start + 1]),
            RootLinear::Spatial => Vec3::new(row[start], row[start + 1], row[start + 2]),
        }
    }

    /// Integrated root path: absolute heading and root position per frame.
    pub fn trajectory(&self, frames: &Array2<f32>) -> Result<Vec<RootState>> {
        self.check(frames)?;
        let mut integrator = TrajectoryIntegrator::new();
        frames
            .rows()
            .into_iter()
            .map(|row| -> Result<RootState> {
                let delta = self.heading_delta(row)?;
                Ok(integrator.step(self.root_velocity(row), delta))
            })
            .collect()
    }

    /// World-space joint positions, frame-major.
    pub fn decode_with(&self, frames: &Array2<f32>, source: &dyn PoseSource) -> Result<Vec<Vec<Vec3>>> {
        self.check(frames)?;
        let local = source.local_positions(self, frames)?;
        let path = self.trajectory(frames)?;
        Ok(local
            .into_iter()
            .zip(path)
            .map(|(pose, state)| {
                let turn = yaw_matrix(state.heading);
                let shift = Vec3::new(state.position.x, 0.0, state.position.z);
                pose.into_iter().map(|p| turn * p + shift).collect()
            })
            .collect())
    }

    /// Decodes with one of the built-in modes. `IkFk` needs a solver and is
    /// only available through [`FeatureCodec::decode_ik`].
    pub fn decode(&self, frames: &Array2<f32>, mode: DecodeMode) -> Result<Vec<Vec<Vec3>>> {
        match mode {
            DecodeMode::Position => self.decode_with(frames, &PositionSource),
            DecodeMode::Velocity => self.decode_with(frames, &VelocitySource),
            DecodeMode::Angle => self.decode_with(frames, &AngleSource),
            DecodeMode::IkFk => Err(MotionError::UnsupportedDecodeMode(mode.to_string())),
        }
    }

    pub fn decode_ik(&self, frames: &Array2<f32>, solver: &dyn IkSolver) -> Result<Vec<Vec<Vec3>>> {
        self.decode_with(frames, &IkFkSource { solver })
    }

    /// Rebuilds a clip for export: the root gets its integrated position and
    /// height, and its rotation gets the absolute heading back.
    pub fn decode_clip(&self, frames: &Array2<f32>, fps: f32) -> Result<MotionClip> {
        let mut rotations = self.rotations(frames)?;
        let path = self.trajectory(frames)?;
        let heights = frames.column(self.layout.height);
        let roots = path
            .iter()
            .zip(heights)
            .map(|(state, height)| Vec3::new(state.position.x, *height, state.position.z))
            .collect();
        for (frame, state) in rotations.iter_mut().zip(&path) {
            frame[0] = yaw_matrix(state.heading) * frame[0];
        }
        MotionClip::new(self.skeleton.clone(), roots, rotations, fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::skeleton::Joint;

    fn chain() -> Skeleton {
        let mut skeleton = Skeleton::new();
        skeleton.add_joint(Joint::new("root", None, Vec3::ZERO)).unwrap();
        skeleton.add_joint(Joint::new("child", Some(0), Vec3::Y)).unwrap();
        skeleton.add_joint(Joint::new("grandchild", Some(1), Vec3::Y)).unwrap();
        skeleton
    }

    fn bending(frames: usize) -> MotionClip {
        let roots = vec![Vec3::new(0.0, 1.0, 0.0); frames];
        let rotations = (0..frames)
            .map(|t| {
                vec![
                    Mat3::from_rotation_y(0.3),
                    Mat3::from_rotation_z(0.2 * t as f32),
                    Mat3::from_rotation_x(-0.1 * t as f32),
                ]
            })
            .collect();
        MotionClip::new(chain(), roots, rotations, 30.0).unwrap()
    }

    struct Passthrough;

    impl IkSolver for Passthrough {
        fn solve(&self, _: &Skeleton, _: &[Vec<Vec3>], initial: &[Vec<Mat3>]) -> Result<Vec<Vec<Mat3>>> {
            Ok(initial.to_vec())
        }
    }

    #[test]
    fn modes_agree_on_a_static_root() {
        let codec = FeatureCodec::new(&chain(), FeatureConfig::default());
        let features = codec.encode(&bending(5)).unwrap();
        let by_position = codec.decode(&features, DecodeMode::Position).unwrap();
        let by_velocity = codec.decode(&features, DecodeMode::Velocity).unwrap();
        let by_angle = codec.decode(&features, DecodeMode::Angle).unwrap();
        let by_ik = codec.decode_ik(&features, &Passthrough).unwrap();
        for t in 0..5 {
            for j in 0..3 {
                assert!(by_position[t][j].abs_diff_eq(by_velocity[t][j], 1e-4));
                assert!(by_position[t][j].abs_diff_eq(by_angle[t][j], 1e-4));
                assert!(by_angle[t][j].abs_diff_eq(by_ik[t][j], 1e-6));
            }
        }
    }

    #[test]
    fn ik_mode_needs_a_solver() {
        let codec = FeatureCodec::new(&chain(), FeatureConfig::default());
        let features = codec.encode(&bending(2)).unwrap();
        assert!(matches!(
            codec.decode(&features, DecodeMode::IkFk),
            Err(MotionError::UnsupportedDecodeMode(_))
        ));
        assert!(matches!(
            "ragdoll".parse::<DecodeMode>(),
            Err(MotionError::UnsupportedDecodeMode(_))
        ));
        assert_eq!("ik_fk".parse::<DecodeMode>().unwrap(), DecodeMode::IkFk);
    }

    #[test]
    fn missing_blocks_are_reported() {
        let config = FeatureConfig {
            channels: vec![ChannelBlock::Rotation],
            ..FeatureConfig::default()
        };
        let codec = FeatureCodec::new(&chain(), config);
        let features = codec.encode(&bending(2)).unwrap();
        assert!(codec.decode(&features, DecodeMode::Angle).is_ok());
        assert!(matches!(
            codec.decode(&features, DecodeMode::Position),
            Err(MotionError::InvalidInput(_))
        ));
    }

    #[test]
    fn width_is_checked() {
        let codec = FeatureCodec::new(&chain(), FeatureConfig::default());
        let frames = Array2::<f32>::zeros((2, codec.width() - 1));
        assert!(matches!(
            codec.decode(&frames, DecodeMode::Position),
            Err(MotionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn decoded_clip_re_encodes_to_the_same_features() {
        let codec = FeatureCodec::new(&chain(), FeatureConfig::default());
        let features = codec.encode(&bending(4)).unwrap();
        let clip = codec.decode_clip(&features, 30.0).unwrap();
        assert_eq!(clip.frame_count(), 4);
        assert!(yaw_of(&clip.joint_rotations[0][0]).abs() < 1e-6);
        let again = codec.encode(&clip).unwrap();
        for (a, b) in again.iter().zip(features.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
