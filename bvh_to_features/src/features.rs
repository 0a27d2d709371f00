//! Encoding of motion clips into heading-normalized feature frames.
//!
//! Per frame the root block stores the planar root velocity expressed in the
//! previous frame's heading, the heading change and the root height. Joint
//! blocks hold positions relative to the root's ground projection, rotated
//! into the frame's own heading.

use bevy_math::{Mat3, Vec3};
use itertools::izip;
use ndarray::{Array2, ArrayViewMut1, s};

use crate::config::{FeatureConfig, RootLinear, RootRotation};
use crate::error::{MotionError, Result};
use crate::layout::{ChannelBlock, FeatureLayout};
use crate::motion::MotionClip;
use crate::rotation::{wrap_angle, yaw_matrix, yaw_of};
use crate::skeleton::Skeleton;

/// Converts between [`MotionClip`]s and feature matrices for one skeleton
/// and configuration.
#[derive(Debug, Clone)]
pub struct FeatureCodec {
    /// Reference skeleton in feature units. Used for the joint count and
    /// for decoding when no offset block is present.
    pub skeleton: Skeleton,
    pub config: FeatureConfig,
    pub layout: FeatureLayout,
}

/// Intermediate result of the geometric part of encoding.
#[derive(Debug, Clone)]
pub(crate) struct Canonical {
    pub headings: Vec<f32>,
    /// Heading-normalized, root-relative joint positions.
    pub positions: Vec<Vec<Vec3>>,
    /// Root displacement between consecutive frames, world axes.
    pub root_steps: Vec<Vec3>,
    pub heights: Vec<f32>,
    /// Local rotations with the heading removed from the root.
    pub rotations: Vec<Vec<Mat3>>,
    /// The clip's own bone offsets, in feature units.
    pub offsets: Vec<Vec3>,
}

fn write_vec3(mut out: ArrayViewMut1<f32>, v: Vec3) {
    out[0] = v.x;
    out[1] = v.y;
    out[2] = v.z;
}

impl FeatureCodec {
    /// `skeleton` is given in source units (centimetres) and is scaled into
    /// the configured unit.
    pub fn new(skeleton: &Skeleton, config: FeatureConfig) -> Self {
        let layout = FeatureLayout::new(skeleton.len(), &config);
        FeatureCodec {
            skeleton: skeleton.scaled(config.unit.scale()),
            config,
            layout,
        }
    }

    pub fn width(&self) -> usize {
        self.layout.width
    }

    pub(crate) fn canonicalize(&self, clip: &MotionClip) -> Result<Canonical> {
        if clip.joint_count() != self.layout.joint_count {
            return Err(MotionError::shape("clip joints", self.layout.joint_count, clip.joint_count()));
        }
        if clip.frame_count() == 0 {
            return Err(MotionError::InvalidInput("cannot encode an empty clip".to_string()));
        }
        let clip = clip.scaled(self.config.unit.scale());
        let offsets = clip.skeleton.joint_offsets();
        let mut positions = clip.positions()?;

        let first = &positions[0];
        let floor = first.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let origin = Vec3::new(first[0].x, floor, first[0].z);
        for frame in &mut positions {
            for p in frame.iter_mut() {
                *p -= origin;
            }
        }
        let roots: Vec<Vec3> = positions.iter().map(|f| f[0]).collect();
        let root_steps = std::iter::once(Vec3::ZERO)
            .chain(roots.windows(2).map(|w| w[1] - w[0]))
            .collect();
        let heights = roots.iter().map(|r| r.y).collect();

        let offset = self.config.heading_offset_deg.to_radians();
        let headings: Vec<f32> = clip
            .joint_rotations
            .iter()
            .map(|frame| yaw_of(&frame[0]) + offset)
            .collect();

        let mut rotations = clip.joint_rotations;
        for (frame, root, heading, rotation) in izip!(&mut positions, &roots, &headings, &mut rotations) {
            let unturn = yaw_matrix(-heading);
            for p in frame.iter_mut() {
                p.x -= root.x;
                p.z -= root.z;
                *p = unturn * *p;
            }
            rotation[0] = unturn * rotation[0];
        }

        Ok(Canonical {
            headings,
            positions,
            root_steps,
            heights,
            rotations,
            offsets,
        })
    }

    /// Encodes a clip into a `frames x width` matrix.
    pub fn encode(&self, clip: &MotionClip) -> Result<Array2<f32>> {
        let canonical = self.canonicalize(clip)?;
        let frames = canonical.positions.len();
        let layout = &self.layout;
        let repr = self.config.rotation_repr;
        let mut out = Array2::<f32>::zeros((frames, layout.width));

        for (t, mut row) in out.rows_mut().into_iter().enumerate() {
            if t > 0 {
                let velocity = yaw_matrix(-canonical.headings[t - 1]) * canonical.root_steps[t];
                let linear = match self.config.root_linear {
                    RootLinear::Planar => vec![velocity.x, velocity.z],
                    RootLinear::Spatial => velocity.to_array().to_vec(),
                };
                for (i, v) in layout.root_linear.clone().zip(linear) {
                    row[i] = v;
                }

                let delta = wrap_angle(canonical.headings[t] - canonical.headings[t - 1]);
                match self.config.root_rotation {
                    RootRotation::Angle => row[layout.heading.start] = delta,
                    RootRotation::Full => {
                        let mut slot = row.slice_mut(s![layout.heading.clone()]);
                        let values = slot
                            .as_slice_mut()
                            .ok_or_else(|| MotionError::InvalidInput("non-contiguous row".to_string()))?;
                        repr.encode(&yaw_matrix(delta), values)?;
                    }
                }
            }
            row[layout.height] = canonical.heights[t];

            for j in 0..layout.joint_count {
                if let Some(cols) = layout.joint_columns(ChannelBlock::Position, j) {
                    write_vec3(row.slice_mut(s![cols]), canonical.positions[t][j]);
                }
                if let Some(cols) = layout.joint_columns(ChannelBlock::Velocity, j) {
                    let velocity = if t > 0 {
                        canonical.positions[t][j] - canonical.positions[t - 1][j]
                    } else {
                        Vec3::ZERO
                    };
                    write_vec3(row.slice_mut(s![cols]), velocity);
                }
                if let Some(cols) = layout.joint_columns(ChannelBlock::Rotation, j) {
                    let mut slot = row.slice_mut(s![cols]);
                    let values = slot
                        .as_slice_mut()
                        .ok_or_else(|| MotionError::InvalidInput("non-contiguous row".to_string()))?;
                    repr.encode(&canonical.rotations[t][j], values)?;
                }
                if let Some(cols) = layout.joint_columns(ChannelBlock::Offset, j) {
                    write_vec3(row.slice_mut(s![cols]), canonical.offsets[j]);
                }
            }
        }
        Ok(out)
    }
}
