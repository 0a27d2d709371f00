//! Forward kinematics over a [`Skeleton`]. Frames are solved in parallel,
//! joints within a frame strictly in hierarchy order.

use bevy_math::{Mat3, Vec3};
use rayon::prelude::*;

use crate::error::{MotionError, Result};
use crate::skeleton::Skeleton;

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalPose {
    pub orientations: Vec<Mat3>,
    pub positions: Vec<Vec3>,
}

/// Per-clip inputs. `heights` is added to every joint's vertical
/// coordinate after the hierarchy pass; `offsets` replaces the skeleton's
/// rest offsets frame by frame.
#[derive(Debug, Clone, Copy)]
pub struct FkInput<'a> {
    pub root_translations: &'a [Vec3],
    pub rotations: &'a [Vec<Mat3>],
    pub heights: Option<&'a [f32]>,
    pub offsets: Option<&'a [Vec<Vec3>]>,
}

impl<'a> FkInput<'a> {
    pub fn new(root_translations: &'a [Vec3], rotations: &'a [Vec<Mat3>]) -> Self {
        FkInput {
            root_translations,
            rotations,
            heights: None,
            offsets: None,
        }
    }

    pub fn with_heights(mut self, heights: &'a [f32]) -> Self {
        self.heights = Some(heights);
        self
    }

    pub fn with_offsets(mut self, offsets: &'a [Vec<Vec3>]) -> Self {
        self.offsets = Some(offsets);
        self
    }

    fn validate(&self, joint_count: usize) -> Result<()> {
        let frames = self.rotations.len();
        if self.root_translations.len() != frames {
            return Err(MotionError::shape("root translations", frames, self.root_translations.len()));
        }
        if let Some(heights) = self.heights {
            if heights.len() != frames {
                return Err(MotionError::shape("heights", frames, heights.len()));
            }
        }
        if let Some(offsets) = self.offsets {
            if offsets.len() != frames {
                return Err(MotionError::shape("offset frames", frames, offsets.len()));
            }
            if let Some(bad) = offsets.iter().find(|f| f.len() != joint_count) {
                return Err(MotionError::shape("offset joints", joint_count, bad.len()));
            }
        }
        if let Some(bad) = self.rotations.iter().find(|f| f.len() != joint_count) {
            return Err(MotionError::shape("rotation joints", joint_count, bad.len()));
        }
        Ok(())
    }
}

/// Solves one frame. `parents[j]` must precede `j`.
pub fn solve_frame(parents: &[Option<usize>], offsets: &[Vec3], root: Vec3, local: &[Mat3]) -> GlobalPose {
    let mut orientations = Vec::with_capacity(local.len());
    let mut positions = Vec::with_capacity(local.len());
    for (j, rotation) in local.iter().enumerate() {
        match parents[j] {
            None => {
                orientations.push(*rotation);
                positions.push(root);
            }
            Some(p) => {
                let parent_orientation: Mat3 = orientations[p];
                let parent_position: Vec3 = positions[p];
                orientations.push(parent_orientation * *rotation);
                positions.push(parent_position + parent_orientation * offsets[j]);
            }
        }
    }
    GlobalPose {
        orientations,
        positions,
    }
}

pub fn forward_kinematics(skeleton: &Skeleton, input: &FkInput) -> Result<Vec<GlobalPose>> {
    input.validate(skeleton.len())?;
    let parents = skeleton.parent_indices();
    let rest_offsets = skeleton.joint_offsets();

    Ok((0..input.rotations.len())
        .into_par_iter()
        .map(|t| {
            let offsets = input.offsets.map_or(rest_offsets.as_slice(), |o| o[t].as_slice());
            let mut pose = solve_frame(&parents, offsets, input.root_translations[t], &input.rotations[t]);
            if let Some(heights) = input.heights {
                for p in &mut pose.positions {
                    p.y += heights[t];
                }
            }
            pose
        })
        .collect())
}
