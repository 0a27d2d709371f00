//! Joint hierarchy stored as an arena. Joints are addressed by index, a
//! parent always precedes its children, and index 0 is the unique root.

use bevy_math::Vec3;

use crate::error::{MotionError, Result};
use crate::rotation::Axis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Position(Axis),
    Rotation(Axis),
}

impl Channel {
    pub fn parse(token: &str) -> Option<Channel> {
        let mut chars = token.chars();
        let axis = Axis::from_letter(chars.next()?)?;
        match chars.as_str().to_ascii_lowercase().as_str() {
            "position" => Some(Channel::Position(axis)),
            "rotation" => Some(Channel::Rotation(axis)),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Channel::Position(axis) => format!("{}position", axis.letter()),
            Channel::Rotation(axis) => format!("{}rotation", axis.letter()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    pub parent: Option<usize>,
    pub offset: Vec3,
    pub channels: Vec<Channel>,
    /// End-Site stubs carry an offset but no channels.
    pub end_site: bool,
}

impl Joint {
    pub fn new(name: impl Into<String>, parent: Option<usize>, offset: Vec3) -> Self {
        Joint {
            name: name.into(),
            parent,
            offset,
            channels: Vec::new(),
            end_site: false,
        }
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn dof(&self) -> usize {
        self.channels.len()
    }

    /// Rotation axes in file-declared order.
    pub fn rotation_axes(&self) -> Vec<Axis> {
        self.channels
            .iter()
            .filter_map(|c| match c {
                Channel::Rotation(axis) => Some(*axis),
                Channel::Position(_) => None,
            })
            .collect()
    }

    pub fn has_translation(&self) -> bool {
        self.channels.iter().any(|c| matches!(c, Channel::Position(_)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    joints: Vec<Joint>,
}

impl Skeleton {
    pub fn new() -> Self {
        Skeleton::default()
    }

    /// Builds a skeleton from parallel name/parent/offset tables.
    pub fn from_parts(names: &[String], parents: &[Option<usize>], offsets: &[Vec3]) -> Result<Self> {
        if parents.len() != names.len() {
            return Err(MotionError::shape("joint parents", names.len(), parents.len()));
        }
        if offsets.len() != names.len() {
            return Err(MotionError::shape("joint offsets", names.len(), offsets.len()));
        }
        let mut skeleton = Skeleton::new();
        for ((name, parent), offset) in names.iter().zip(parents).zip(offsets) {
            skeleton.add_joint(Joint::new(name.clone(), *parent, *offset))?;
        }
        Ok(skeleton)
    }

    /// Declares a joint. The first joint must be the root, every later
    /// joint must name an already declared parent.
    pub fn add_joint(&mut self, joint: Joint) -> Result<usize> {
        let index = self.joints.len();
        match (index, joint.parent) {
            (0, Some(_)) => {
                return Err(MotionError::InvalidInput(format!(
                    "first joint {} must be the root",
                    joint.name
                )));
            }
            (0, None) => {}
            (_, None) => {
                return Err(MotionError::InvalidInput(format!(
                    "skeleton already has a root, {} needs a parent",
                    joint.name
                )));
            }
            (_, Some(parent)) if parent >= index => {
                return Err(MotionError::InvalidInput(format!(
                    "parent {} of {} is not declared yet",
                    parent, joint.name
                )));
            }
            _ => {}
        }
        if self.find(&joint.name).is_some() {
            return Err(MotionError::InvalidInput(format!("duplicate joint name {}", joint.name)));
        }
        self.joints.push(joint);
        Ok(index)
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint(&self, index: usize) -> Option<&Joint> {
        self.joints.get(index)
    }

    pub fn joint_mut(&mut self, index: usize) -> Option<&mut Joint> {
        self.joints.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn root(&self) -> Option<&Joint> {
        self.joints.first()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }

    pub fn parent_indices(&self) -> Vec<Option<usize>> {
        self.joints.iter().map(|j| j.parent).collect()
    }

    /// `(child, parent)` pairs in joint order.
    pub fn links(&self) -> Vec<(usize, usize)> {
        self.joints
            .iter()
            .enumerate()
            .filter_map(|(i, j)| j.parent.map(|p| (i, p)))
            .collect()
    }

    pub fn joint_offsets(&self) -> Vec<Vec3> {
        self.joints.iter().map(|j| j.offset).collect()
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        self.joints
            .iter()
            .enumerate()
            .filter(|(_, j)| j.parent == Some(index))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn total_dof(&self) -> usize {
        self.joints.iter().map(Joint::dof).sum()
    }

    pub fn scaled(&self, factor: f32) -> Skeleton {
        let mut skeleton = self.clone();
        for joint in &mut skeleton.joints {
            joint.offset *= factor;
        }
        skeleton
    }

    /// Removes the named joint and all of its descendants, re-indexing the
    /// survivors. Returns the removed indices as they were before deletion.
    pub fn delete_joint(&mut self, name: &str) -> Result<Vec<usize>> {
        let target = self
            .find(name)
            .ok_or_else(|| MotionError::UnknownJoint(name.to_string()))?;
        if target == 0 {
            return Err(MotionError::InvalidInput(format!("cannot delete root joint {name}")));
        }

        let mut removed = vec![false; self.joints.len()];
        for (i, joint) in self.joints.iter().enumerate() {
            removed[i] = i == target || joint.parent.is_some_and(|p| removed[p]);
        }

        let mut new_index = vec![None; self.joints.len()];
        let mut next = 0;
        for (i, gone) in removed.iter().enumerate() {
            if !gone {
                new_index[i] = Some(next);
                next += 1;
            }
        }

        let joints = std::mem::take(&mut self.joints);
        self.joints = joints
            .into_iter()
            .zip(&removed)
            .filter(|(_, gone)| !**gone)
            .map(|(mut joint, _)| {
                joint.parent = joint.parent.and_then(|p| new_index[p]);
                joint
            })
            .collect();

        Ok(removed
            .iter()
            .enumerate()
            .filter(|(_, gone)| **gone)
            .map(|(i, _)| i)
            .collect())
    }
}
