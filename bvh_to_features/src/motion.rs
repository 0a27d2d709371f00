use bevy_math::{Mat3, Vec3};

use crate::error::{MotionError, Result};
use crate::kinematics::{FkInput, GlobalPose, forward_kinematics};
use crate::skeleton::Skeleton;

const RESAMPLE_TOLERANCE: f32 = 1e-3;

/// Raw motion: root translations plus local joint rotations, frame-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionClip {
    pub skeleton: Skeleton,
    pub root_positions: Vec<Vec3>,
    pub joint_rotations: Vec<Vec<Mat3>>,
    pub fps: f32,
}

impl MotionClip {
    pub fn new(
        skeleton: Skeleton,
        root_positions: Vec<Vec3>,
        joint_rotations: Vec<Vec<Mat3>>,
        fps: f32,
    ) -> Result<Self> {
        if root_positions.len() != joint_rotations.len() {
            return Err(MotionError::shape(
                "clip frames",
                root_positions.len(),
                joint_rotations.len(),
            ));
        }
        if let Some(bad) = joint_rotations.iter().find(|f| f.len() != skeleton.len()) {
            return Err(MotionError::shape("clip joints", skeleton.len(), bad.len()));
        }
        Ok(MotionClip {
            skeleton,
            root_positions,
            joint_rotations,
            fps,
        })
    }

    pub fn joint_count(&self) -> usize {
        self.skeleton.len()
    }

    pub fn frame_count(&self) -> usize {
        self.root_positions.len()
    }

    pub fn frame_time(&self) -> f32 {
        if self.fps > 0.0 { 1.0 / self.fps } else { 0.0 }
    }

    /// Global joint transforms for every frame.
    pub fn global_poses(&self) -> Result<Vec<GlobalPose>> {
        forward_kinematics(
            &self.skeleton,
            &FkInput::new(&self.root_positions, &self.joint_rotations),
        )
    }

    /// Global joint positions, frame-major.
    pub fn positions(&self) -> Result<Vec<Vec<Vec3>>> {
        Ok(self.global_poses()?.into_iter().map(|p| p.positions).collect())
    }

    /// Keeps frames `start..end`, clamped to the clip length.
    pub fn slice(&self, start: usize, end: usize) -> MotionClip {
        let end = end.min(self.frame_count());
        let start = start.min(end);
        MotionClip {
            skeleton: self.skeleton.clone(),
            root_positions: self.root_positions[start..end].to_vec(),
            joint_rotations: self.joint_rotations[start..end].to_vec(),
            fps: self.fps,
        }
    }

    /// Decimates by an integer stride when the clip is faster than
    /// `target_fps`; slower clips are returned unchanged. The tolerance
    /// absorbs frame times written with six decimals.
    pub fn resample(&self, target_fps: f32) -> MotionClip {
        if target_fps <= 0.0 || self.fps <= target_fps {
            return self.clone();
        }
        let stride = ((self.fps / target_fps + RESAMPLE_TOLERANCE).floor() as usize).max(1);
        MotionClip {
            skeleton: self.skeleton.clone(),
            root_positions: self.root_positions.iter().step_by(stride).copied().collect(),
            joint_rotations: self.joint_rotations.iter().step_by(stride).cloned().collect(),
            fps: self.fps / stride as f32,
        }
    }

    /// Scales translations and bone offsets, e.g. for unit conversion.
    pub fn scaled(&self, factor: f32) -> MotionClip {
        MotionClip {
            skeleton: self.skeleton.scaled(factor),
            root_positions: self.root_positions.iter().map(|p| *p * factor).collect(),
            joint_rotations: self.joint_rotations.clone(),
            fps: self.fps,
        }
    }

    /// Deletes the named joints (and their descendants) from the skeleton
    /// and the rotation tracks.
    pub fn truncate_joints(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let removed = self.skeleton.delete_joint(name)?;
            for frame in &mut self.joint_rotations {
                let mut index = 0;
                frame.retain(|_| {
                    let keep = !removed.contains(&index);
                    index += 1;
                    keep
                });
            }
        }
        Ok(())
    }
}
