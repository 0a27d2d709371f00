//! Conversions between the rotation parameterizations used by the feature
//! codec: matrices, quaternions, axis-angle, exponential maps, the continuous
//! 6D encoding and Euler angles.
//!
//! Matrices act on column vectors. The vertical axis is Y.

use std::f32::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use bevy_math::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{MotionError, Result};

/// Below this `sin(angle / 2)` the rotation axis is considered undefined.
pub const MIN_THETA: f32 = 1e-5;
const GRAM_SCHMIDT_EPS: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn from_letter(letter: char) -> Option<Axis> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    /// Rotation of `angle` radians about this axis.
    pub fn rotation(self, angle: f32) -> Mat3 {
        match self {
            Axis::X => Mat3::from_rotation_x(angle),
            Axis::Y => Mat3::from_rotation_y(angle),
            Axis::Z => Mat3::from_rotation_z(angle),
        }
    }
}

/// A validated three-letter Euler convention, applied intrinsically:
/// `R = R_a0(t0) * R_a1(t1) * R_a2(t2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EulerOrder([Axis; 3]);

impl EulerOrder {
    pub const XYZ: EulerOrder = EulerOrder([Axis::X, Axis::Y, Axis::Z]);
    pub const ZYX: EulerOrder = EulerOrder([Axis::Z, Axis::Y, Axis::X]);
    pub const YXZ: EulerOrder = EulerOrder([Axis::Y, Axis::X, Axis::Z]);

    pub fn new(axes: [Axis; 3]) -> Result<EulerOrder> {
        if axes[1] == axes[0] || axes[1] == axes[2] {
            let order: String = axes.iter().map(|a| a.letter()).collect();
            return Err(MotionError::InvalidRotationOrder(order));
        }
        Ok(EulerOrder(axes))
    }

    pub fn axes(&self) -> [Axis; 3] {
        self.0
    }

    /// Proper Euler conventions (ZXZ, YXY, ...) repeat their outer axis.
    pub fn is_tait_bryan(&self) -> bool {
        self.0[0] != self.0[2]
    }
}

impl FromStr for EulerOrder {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MotionError::InvalidRotationOrder(s.to_string());
        let axes = s
            .chars()
            .map(|c| Axis::from_letter(c).ok_or_else(invalid))
            .collect::<Result<Vec<_>>>()?;
        let axes: [Axis; 3] = axes.try_into().map_err(|_| invalid())?;
        EulerOrder::new(axes)
    }
}

impl fmt::Display for EulerOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in self.0 {
            write!(f, "{}", axis.letter())?;
        }
        Ok(())
    }
}

/// Parses a sequence of axis letters as found in BVH channel declarations.
/// Unlike [`EulerOrder`] this accepts zero to three letters.
pub fn parse_axes(order: &str) -> Result<Vec<Axis>> {
    if order.len() > 3 {
        return Err(MotionError::InvalidRotationOrder(order.to_string()));
    }
    order
        .chars()
        .map(|c| Axis::from_letter(c).ok_or_else(|| MotionError::InvalidRotationOrder(order.to_string())))
        .collect()
}

#[inline]
fn at(m: &Mat3, row: usize, col: usize) -> f32 {
    m.col(col)[row]
}

fn from_rows(r0: Vec3, r1: Vec3, r2: Vec3) -> Mat3 {
    Mat3::from_cols(r0, r1, r2).transpose()
}

/// Wraps an angle into `(-pi, pi]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle.sin().atan2(angle.cos());
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Wraps an angle into `[0, 2pi)`.
pub fn wrap_positive(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU { 0.0 } else { wrapped }
}

//-------------------------------------------------------------------------------------------------
// Quaternions

/// Converts a rotation matrix to a unit quaternion with a non-negative real part.
pub fn quat_from_matrix(m: &Mat3) -> Quat {
    let (m00, m01, m02) = (at(m, 0, 0), at(m, 0, 1), at(m, 0, 2));
    let (m10, m11, m12) = (at(m, 1, 0), at(m, 1, 1), at(m, 1, 2));
    let (m20, m21, m22) = (at(m, 2, 0), at(m, 2, 1), at(m, 2, 2));

    let q_abs = [
        1.0 + m00 + m11 + m22,
        1.0 + m00 - m11 - m22,
        1.0 - m00 + m11 - m22,
        1.0 - m00 - m11 + m22,
    ]
    .map(|x| if x > 0.0 { x.sqrt() } else { 0.0 });

    // Each row is (w, x, y, z) scaled by the matching q_abs entry.
    let candidates = [
        [q_abs[0] * q_abs[0], m21 - m12, m02 - m20, m10 - m01],
        [m21 - m12, q_abs[1] * q_abs[1], m10 + m01, m02 + m20],
        [m02 - m20, m10 + m01, q_abs[2] * q_abs[2], m12 + m21],
        [m10 - m01, m20 + m02, m21 + m12, q_abs[3] * q_abs[3]],
    ];

    let best = (0..4)
        .max_by(|&a, &b| q_abs[a].total_cmp(&q_abs[b]))
        .unwrap_or(0);
    let denom = 2.0 * q_abs[best].max(0.1);
    let [w, x, y, z] = candidates[best].map(|v| v / denom);
    standardize(Quat::from_xyzw(x, y, z, w).normalize())
}

pub fn matrix_from_quat(q: Quat) -> Mat3 {
    Mat3::from_quat(q.normalize())
}

/// Flips the quaternion onto the hemisphere with `w >= 0`.
pub fn standardize(q: Quat) -> Quat {
    if q.w < 0.0 { -q } else { q }
}

//-------------------------------------------------------------------------------------------------
// Axis-angle and exponential map

/// Returns a unit axis and an angle in `(-pi, pi]`. Near-identity rotations
/// yield the default axis `+Z` with angle zero.
pub fn axis_angle_from_quat(q: Quat) -> (Vec3, f32) {
    let q = q.normalize();
    let v = Vec3::new(q.x, q.y, q.z);
    let sin_half = v.length();
    if sin_half <= MIN_THETA {
        return (Vec3::Z, 0.0);
    }
    let angle = wrap_angle(2.0 * sin_half.atan2(q.w));
    (v / sin_half, angle)
}

pub fn quat_from_axis_angle(axis: Vec3, angle: f32) -> Quat {
    match axis.try_normalize() {
        Some(axis) => Quat::from_axis_angle(axis, angle),
        None => Quat::IDENTITY,
    }
}

pub fn exp_map_from_quat(q: Quat) -> Vec3 {
    let (axis, angle) = axis_angle_from_quat(q);
    axis * angle
}

pub fn quat_from_exp_map(exp_map: Vec3) -> Quat {
    let angle = exp_map.length();
    if angle <= MIN_THETA {
        return Quat::IDENTITY;
    }
    let axis = exp_map / angle;
    let angle = wrap_angle(angle);
    if angle.abs() <= MIN_THETA {
        return Quat::IDENTITY;
    }
    standardize(Quat::from_axis_angle(axis, angle))
}

pub fn exp_map_from_matrix(m: &Mat3) -> Vec3 {
    exp_map_from_quat(quat_from_matrix(m))
}

pub fn matrix_from_exp_map(exp_map: Vec3) -> Mat3 {
    matrix_from_quat(quat_from_exp_map(exp_map))
}

//-------------------------------------------------------------------------------------------------
// Continuous 6D

/// First two rows of the matrix.
pub fn matrix_to_6d(m: &Mat3) -> [f32; 6] {
    let r0 = m.row(0);
    let r1 = m.row(1);
    [r0.x, r0.y, r0.z, r1.x, r1.y, r1.z]
}

/// Gram-Schmidt reconstruction. A vanishing first row falls back to `+X`,
/// a second row parallel to the first falls back to an arbitrary
/// perpendicular direction, so the result is always a rotation.
pub fn matrix_from_6d(m6d: &[f32; 6]) -> Mat3 {
    let a1 = Vec3::new(m6d[0], m6d[1], m6d[2]);
    let a2 = Vec3::new(m6d[3], m6d[4], m6d[5]);

    let b1 = if a1.length_squared() > GRAM_SCHMIDT_EPS {
        a1.normalize()
    } else {
        Vec3::X
    };
    let b2 = a2 - b1.dot(a2) * b1;
    let b2 = if b2.length_squared() > GRAM_SCHMIDT_EPS {
        b2.normalize()
    } else {
        b1.any_orthonormal_vector()
    };
    let b3 = b1.cross(b2);
    from_rows(b1, b2, b3)
}

//-------------------------------------------------------------------------------------------------
// Euler angles

fn angle_from_tan(axis: Axis, other_axis: Axis, data: [f32; 3], horizontal: bool, tait_bryan: bool) -> f32 {
    let (mut i1, mut i2) = match axis {
        Axis::X => (2, 1),
        Axis::Y => (0, 2),
        Axis::Z => (1, 0),
    };
    if horizontal {
        std::mem::swap(&mut i1, &mut i2);
    }
    let even = matches!(
        (axis, other_axis),
        (Axis::X, Axis::Y) | (Axis::Y, Axis::Z) | (Axis::Z, Axis::X)
    );
    if horizontal == even {
        data[i1].atan2(data[i2])
    } else if tait_bryan {
        (-data[i2]).atan2(data[i1])
    } else {
        data[i2].atan2(-data[i1])
    }
}

/// Extracts Euler angles in radians, one per axis of `order`.
pub fn matrix_to_euler(m: &Mat3, order: EulerOrder) -> [f32; 3] {
    let [a0, a1, a2] = order.axes();
    let i0 = a0.index();
    let i2 = a2.index();
    let tait_bryan = order.is_tait_bryan();

    let central = if tait_bryan {
        let sign = match i0 as i32 - i2 as i32 {
            -1 | 2 => -1.0,
            _ => 1.0,
        };
        (at(m, i0, i2) * sign).clamp(-1.0, 1.0).asin()
    } else {
        at(m, i0, i0).clamp(-1.0, 1.0).acos()
    };

    let column = [at(m, 0, i2), at(m, 1, i2), at(m, 2, i2)];
    let row = [at(m, i0, 0), at(m, i0, 1), at(m, i0, 2)];
    [
        angle_from_tan(a0, a1, column, false, tait_bryan),
        central,
        angle_from_tan(a2, a1, row, true, tait_bryan),
    ]
}

pub fn matrix_to_euler_degrees(m: &Mat3, order: EulerOrder) -> [f32; 3] {
    matrix_to_euler(m, order).map(f32::to_degrees)
}

/// Composes intrinsic rotations about `axes`, angles in degrees.
pub fn matrix_from_axes(axes: &[Axis], degrees: &[f32]) -> Result<Mat3> {
    if axes.len() != degrees.len() {
        return Err(MotionError::InvalidInput(format!(
            "{} axes but {} angles",
            axes.len(),
            degrees.len()
        )));
    }
    Ok(axes
        .iter()
        .zip(degrees)
        .fold(Mat3::IDENTITY, |acc, (axis, deg)| acc * axis.rotation(deg.to_radians())))
}

pub fn matrix_from_euler(order: EulerOrder, degrees: [f32; 3]) -> Mat3 {
    let [a0, a1, a2] = order.axes();
    a0.rotation(degrees[0].to_radians())
        * a1.rotation(degrees[1].to_radians())
        * a2.rotation(degrees[2].to_radians())
}

//-------------------------------------------------------------------------------------------------
// Yaw

/// Pure rotation about the vertical axis.
pub fn yaw_matrix(angle: f32) -> Mat3 {
    Mat3::from_rotation_y(angle)
}

/// Signed yaw of a matrix, read from its forward basis.
pub fn yaw_of(m: &Mat3) -> f32 {
    at(m, 0, 2).atan2(at(m, 2, 2))
}

//-------------------------------------------------------------------------------------------------

/// Parameterization used for rotation columns in the feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotationRepr {
    #[default]
    #[serde(rename = "6d")]
    SixD,
    #[serde(rename = "expmap")]
    ExpMap,
    #[serde(rename = "aa")]
    AxisAngle,
    #[serde(rename = "quat")]
    Quaternion,
}

impl RotationRepr {
    pub fn width(self) -> usize {
        match self {
            RotationRepr::SixD => 6,
            RotationRepr::ExpMap => 3,
            RotationRepr::AxisAngle => 4,
            RotationRepr::Quaternion => 4,
        }
    }

    /// Writes `m` into `out`, which must be exactly `width()` long.
    pub fn encode(self, m: &Mat3, out: &mut [f32]) -> Result<()> {
        if out.len() != self.width() {
            return Err(MotionError::InvalidInput(format!(
                "{:?} needs {} values, got {}",
                self,
                self.width(),
                out.len()
            )));
        }
        match self {
            RotationRepr::SixD => out.copy_from_slice(&matrix_to_6d(m)),
            RotationRepr::ExpMap => out.copy_from_slice(&exp_map_from_matrix(m).to_array()),
            RotationRepr::AxisAngle => {
                let (axis, angle) = axis_angle_from_quat(quat_from_matrix(m));
                out.copy_from_slice(&[axis.x, axis.y, axis.z, angle]);
            }
            RotationRepr::Quaternion => out.copy_from_slice(&quat_from_matrix(m).to_array()),
        }
        Ok(())
    }

    pub fn decode(self, values: &[f32]) -> Result<Mat3> {
        if values.len() != self.width() {
            return Err(MotionError::InvalidInput(format!(
                "{:?} needs {} values, got {}",
                self,
                self.width(),
                values.len()
            )));
        }
        Ok(match self {
            RotationRepr::SixD => {
                let mut m6d = [0.0; 6];
                m6d.copy_from_slice(values);
                matrix_from_6d(&m6d)
            }
            RotationRepr::ExpMap => matrix_from_exp_map(Vec3::from_slice(values)),
            RotationRepr::AxisAngle => {
                matrix_from_quat(quat_from_axis_angle(Vec3::from_slice(&values[..3]), values[3]))
            }
            RotationRepr::Quaternion => {
                let q = Quat::from_slice(values);
                if q.length_squared() <= GRAM_SCHMIDT_EPS {
                    Mat3::IDENTITY
                } else {
                    matrix_from_quat(q)
                }
            }
        })
    }
}
