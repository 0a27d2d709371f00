//! Static joint tables of the supported capture rigs.

use bevy_math::Vec3;

use crate::config::Unit;
use crate::error::{MotionError, Result};
use crate::rotation::EulerOrder;
use crate::skeleton::Skeleton;

#[derive(Debug)]
pub struct RigInfo {
    pub name: &'static str,
    pub joint_names: &'static [&'static str],
    /// `(parent, child)` pairs.
    pub links: &'static [(usize, usize)],
    pub offsets: Option<&'static [[f32; 3]]>,
    pub euler_order: EulerOrder,
    pub unit: Unit,
    /// Calibration added to the measured heading, in degrees.
    pub heading_offset_deg: f32,
    pub fps: f32,
}

impl RigInfo {
    pub fn joint_count(&self) -> usize {
        self.joint_names.len()
    }

    pub fn parents(&self) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.joint_count()];
        for &(a, b) in self.links {
            let (parent, child) = if a < b { (a, b) } else { (b, a) };
            parents[child] = Some(parent);
        }
        parents
    }
}

const LAFAN1_NAMES: [&str; 22] = [
    "Hips", "LeftUpLeg", "LeftLeg", "LeftFoot", "LeftToe",
    "RightUpLeg", "RightLeg", "RightFoot", "RightToe",
    "Spine", "Spine1", "Spine2", "Neck", "Head",
    "LeftShoulder", "LeftArm", "LeftForeArm", "LeftHand",
    "RightShoulder", "RightArm", "RightForeArm", "RightHand",
];

const LAFAN1_LINKS: [(usize, usize); 21] = [
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (0, 9), (9, 10), (10, 11), (11, 12), (12, 13),
    (11, 14), (14, 15), (15, 16), (16, 17),
    (11, 18), (18, 19), (19, 20), (20, 21),
];

const STYLE100_NAMES: [&str; 23] = [
    "Hips", "Chest", "Chest2", "Chest3", "Chest4", "Neck", "Head",
    "RightCollar", "RightShoulder", "RightElbow", "RightWrist",
    "LeftCollar", "LeftShoulder", "LeftElbow", "LeftWrist",
    "RightHip", "RightKnee", "RightAnkle", "RightToe",
    "LeftHip", "LeftKnee", "LeftAnkle", "LeftToe",
];

const STYLE100_LINKS: [(usize, usize); 22] = [
    (0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 6),
    (4, 7), (7, 8), (8, 9), (9, 10),
    (4, 11), (11, 12), (12, 13), (13, 14),
    (0, 15), (15, 16), (16, 17), (17, 18),
    (0, 19), (19, 20), (20, 21), (21, 22),
];

const SMPL_NAMES: [&str; 22] = [
    "root", "lhip", "rhip", "lowerback", "lknee", "rknee",
    "upperback", "lankle", "rankle", "chest", "ltoe", "rtoe",
    "lowerneck", "lclavicle", "rclavicle", "upperneck",
    "lshoulder", "rshoulder", "lelbow", "relbow", "lwrist", "rwrist",
];

const SMPL_LINKS: [(usize, usize); 21] = [
    (0, 1), (1, 4), (4, 7), (7, 10),
    (0, 2), (2, 5), (5, 8), (8, 11),
    (0, 3), (3, 6), (6, 9), (9, 14), (14, 17), (17, 19), (19, 21),
    (9, 13), (13, 16), (16, 18), (18, 20),
    (9, 12), (12, 15),
];

const SMPL_OFFSETS: [[f32; 3]; 22] = [
    [0.0, 0.0, 0.0],
    [0.074191, -0.085461, -0.017308],
    [-0.071594, -0.083623, -0.014339],
    [-0.0013948, 0.098195, -0.014825],
    [0.035133, -0.39267, 0.0027427],
    [-0.040115, -0.3973, 0.00020664],
    [0.0019905, 0.1218, 0.00016719],
    [-0.013309, -0.41153, -0.048053],
    [0.014754, -0.40995, -0.047991],
    [0.0024568, 0.050603, 0.024683],
    [0.020389, -0.057741, 0.12779],
    [-0.026866, -0.04796, 0.13085],
    [0.0014684, 0.23297, -0.060496],
    [0.072725, 0.12933, -0.043755],
    [-0.073775, 0.12371, -0.049582],
    [0.0089063, 0.064604, 0.057413],
    [0.086998, 0.038014, -0.0024794],
    [-0.092, 0.039984, -0.0062488],
    [0.25586, -0.018661, -0.02634],
    [-0.25963, -0.019262, -0.018788],
    [0.25177, 0.01009, 0.0025703],
    [-0.25894, 0.0049262, -0.0025922],
];

pub static LAFAN1: RigInfo = RigInfo {
    name: "LAFAN1",
    joint_names: &LAFAN1_NAMES,
    links: &LAFAN1_LINKS,
    offsets: None,
    euler_order: EulerOrder::ZYX,
    unit: Unit::Meter,
    heading_offset_deg: -180.0,
    fps: 60.0,
};

pub static STYLE100: RigInfo = RigInfo {
    name: "STYLE100",
    joint_names: &STYLE100_NAMES,
    links: &STYLE100_LINKS,
    offsets: None,
    euler_order: EulerOrder::YXZ,
    unit: Unit::Meter,
    heading_offset_deg: 90.0,
    fps: 30.0,
};

pub static AMASS: RigInfo = RigInfo {
    name: "AMASS",
    joint_names: &SMPL_NAMES,
    links: &SMPL_LINKS,
    offsets: Some(&SMPL_OFFSETS),
    euler_order: EulerOrder::ZYX,
    unit: Unit::Centimeter,
    heading_offset_deg: 90.0,
    fps: 30.0,
};

pub static HUMANML3D: RigInfo = RigInfo {
    name: "HumanML3D",
    joint_names: &SMPL_NAMES,
    links: &SMPL_LINKS,
    offsets: Some(&SMPL_OFFSETS),
    euler_order: EulerOrder::ZYX,
    unit: Unit::Centimeter,
    heading_offset_deg: 90.0,
    fps: 30.0,
};

pub static RIGS: [&RigInfo; 4] = [&LAFAN1, &STYLE100, &AMASS, &HUMANML3D];

/// Looks up a rig by dataset name. A name such as `LAFAN1_hetero` resolves
/// through its prefix before the first underscore.
pub fn rig(name: &str) -> Result<&'static RigInfo> {
    let lookup = |key: &str| RIGS.iter().copied().find(|r| r.name.eq_ignore_ascii_case(key));
    lookup(name)
        .or_else(|| name.split('_').next().and_then(lookup))
        .ok_or_else(|| MotionError::UnknownRig(name.to_string()))
}

impl Skeleton {
    /// Builds a skeleton from a rig table. Rigs without stored offsets get
    /// zero offsets; callers fill them from data.
    pub fn from_rig(rig: &RigInfo) -> Result<Skeleton> {
        let names: Vec<String> = rig.joint_names.iter().map(|n| n.to_string()).collect();
        let offsets: Vec<Vec3> = match rig.offsets {
            Some(table) => table.iter().map(|o| Vec3::from_array(*o)).collect(),
            None => vec![Vec3::ZERO; names.len()],
        };
        Skeleton::from_parts(&names, &rig.parents(), &offsets)
    }
}
