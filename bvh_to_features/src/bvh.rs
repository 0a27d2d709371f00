//! Reader and writer for the BVH motion capture format.
//!
//! The reader keeps values in the file's units. Joints are indexed in
//! declaration order, which is the depth-first order of the hierarchy.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bevy_math::{Mat3, Vec3};
use itertools::Itertools;
use tracing::debug;

use crate::error::{MotionError, Result};
use crate::motion::MotionClip;
use crate::rotation::{Axis, EulerOrder, matrix_from_axes, matrix_to_euler_degrees};
use crate::skeleton::{Channel, Joint, Skeleton};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Keep `End Site` blocks as channel-less joints.
    pub include_end_sites: bool,
}

struct Tokens<'a> {
    tokens: Vec<(usize, &'a str)>,
    cursor: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        let tokens = text
            .lines()
            .enumerate()
            .flat_map(|(i, line)| line.split_whitespace().map(move |t| (i + 1, t)))
            .collect();
        Tokens { tokens, cursor: 0 }
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .map_or(0, |(line, _)| *line)
    }

    fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.cursor)
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.cursor).map(|(_, t)| *t)
    }

    fn next(&mut self, what: &str) -> Result<(usize, &'a str)> {
        let token = self
            .tokens
            .get(self.cursor)
            .copied()
            .ok_or_else(|| MotionError::parse(self.line(), format!("unexpected end of file, expected {what}")))?;
        self.cursor += 1;
        Ok(token)
    }

    fn expect(&mut self, word: &str) -> Result<()> {
        let (line, token) = self.next(word)?;
        if token != word {
            return Err(MotionError::parse(line, format!("expected {word}, found {token}")));
        }
        Ok(())
    }

    fn float(&mut self, what: &str) -> Result<f32> {
        let (line, token) = self.next(what)?;
        token
            .parse()
            .map_err(|_| MotionError::parse(line, format!("expected {what}, found {token}")))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let (line, token) = self.next(what)?;
        token
            .parse()
            .map_err(|_| MotionError::parse(line, format!("expected {what}, found {token}")))
    }

    fn vec3(&mut self, what: &str) -> Result<Vec3> {
        Ok(Vec3::new(self.float(what)?, self.float(what)?, self.float(what)?))
    }
}

fn parse_channels(tokens: &mut Tokens, joint: &str) -> Result<Vec<Channel>> {
    let count = tokens.count("channel count")?;
    if !matches!(count, 1 | 2 | 3 | 6) {
        return Err(MotionError::UnsupportedChannelCount {
            joint: joint.to_string(),
            count,
        });
    }
    (0..count)
        .map(|_| {
            let (line, token) = tokens.next("channel name")?;
            Channel::parse(token).ok_or_else(|| MotionError::parse(line, format!("unknown channel {token}")))
        })
        .collect()
}

/// Parses the body of a `ROOT`/`JOINT` block, from its name up to and
/// including the closing brace.
fn parse_joint(
    tokens: &mut Tokens,
    skeleton: &mut Skeleton,
    parent: Option<usize>,
    options: ParseOptions,
) -> Result<()> {
    let (_, name) = tokens.next("joint name")?;
    tokens.expect("{")?;
    tokens.expect("OFFSET")?;
    let offset = tokens.vec3("offset")?;
    let channels = match tokens.peek() {
        Some("CHANNELS") => {
            tokens.next("CHANNELS")?;
            parse_channels(tokens, name)?
        }
        _ => Vec::new(),
    };
    let index = skeleton.add_joint(Joint::new(name, parent, offset).with_channels(channels))?;

    loop {
        let (line, token) = tokens.next("JOINT, End Site or }")?;
        match token {
            "JOINT" => parse_joint(tokens, skeleton, Some(index), options)?,
            "End" => {
                tokens.expect("Site")?;
                tokens.expect("{")?;
                tokens.expect("OFFSET")?;
                let offset = tokens.vec3("end site offset")?;
                tokens.expect("}")?;
                if options.include_end_sites {
                    let mut end = Joint::new(format!("{name}_end"), Some(index), offset);
                    end.end_site = true;
                    skeleton.add_joint(end)?;
                }
            }
            "}" => return Ok(()),
            other => return Err(MotionError::parse(line, format!("unexpected token {other}"))),
        }
    }
}

fn read_frame(tokens: &mut Tokens, skeleton: &Skeleton, frame: usize) -> Result<(Vec3, Vec<Mat3>)> {
    let mut root = skeleton.root().map_or(Vec3::ZERO, |j| j.offset);
    let mut rotations = Vec::with_capacity(skeleton.len());
    for (j, joint) in skeleton.joints().iter().enumerate() {
        let mut axes: Vec<Axis> = Vec::with_capacity(3);
        let mut degrees = Vec::with_capacity(3);
        let mut translated = false;
        for channel in &joint.channels {
            let (line, token) = tokens
                .next("motion value")
                .map_err(|_| MotionError::parse(tokens.line(), format!("truncated motion data in frame {frame}")))?;
            let value: f32 = token
                .parse()
                .map_err(|_| MotionError::parse(line, format!("expected motion value, found {token}")))?;
            match channel {
                Channel::Rotation(axis) => {
                    axes.push(*axis);
                    degrees.push(value);
                }
                // Translation channels below the root are read and dropped.
                Channel::Position(axis) if j == 0 => {
                    if !translated {
                        root = Vec3::ZERO;
                        translated = true;
                    }
                    root[axis.index()] = value;
                }
                Channel::Position(_) => {}
            }
        }
        rotations.push(matrix_from_axes(&axes, &degrees)?);
    }
    Ok((root, rotations))
}

pub fn parse(text: &str, options: ParseOptions) -> Result<MotionClip> {
    let mut tokens = Tokens::new(text);
    tokens.expect("HIERARCHY")?;
    tokens.expect("ROOT")?;
    let mut skeleton = Skeleton::new();
    parse_joint(&mut tokens, &mut skeleton, None, options)?;

    tokens.expect("MOTION")?;
    tokens.expect("Frames:")?;
    let frames = tokens.count("frame count")?;
    tokens.expect("Frame")?;
    tokens.expect("Time:")?;
    let line = tokens.line();
    let frame_time = tokens.float("frame time")?;
    if frame_time <= 0.0 {
        return Err(MotionError::parse(line, format!("frame time must be positive, got {frame_time}")));
    }

    // The header count is untrusted; truncation is caught while reading.
    let capacity = frames.min(tokens.remaining() / skeleton.total_dof().max(1));
    let mut root_positions = Vec::with_capacity(capacity);
    let mut joint_rotations = Vec::with_capacity(capacity);
    for frame in 0..frames {
        let (root, rotations) = read_frame(&mut tokens, &skeleton, frame)?;
        root_positions.push(root);
        joint_rotations.push(rotations);
    }
    debug!(
        "Parsed {} joints, {} channels, {} frames",
        skeleton.len(),
        skeleton.total_dof(),
        frames
    );
    MotionClip::new(skeleton, root_positions, joint_rotations, 1.0 / frame_time)
}

pub fn parse_file(path: impl AsRef<Path>, options: ParseOptions) -> Result<MotionClip> {
    let text = fs::read_to_string(path)?;
    parse(&text, options)
}

//-------------------------------------------------------------------------------------------------
// Writing

/// Euler order written for a joint: its own three rotation channels when it
/// declares them, `fallback` otherwise.
pub fn joint_order(joint: &Joint, fallback: EulerOrder) -> EulerOrder {
    let axes = joint.rotation_axes();
    <[Axis; 3]>::try_from(axes)
        .ok()
        .and_then(|axes| EulerOrder::new(axes).ok())
        .unwrap_or(fallback)
}

fn depth_first(skeleton: &Skeleton) -> Vec<usize> {
    let mut order = Vec::with_capacity(skeleton.len());
    let mut stack = vec![0];
    while let Some(j) = stack.pop() {
        order.push(j);
        stack.extend(skeleton.children(j).into_iter().rev());
    }
    order
}

fn format_values(values: &[f32]) -> String {
    values.iter().map(|v| format!("{v:.6}")).join(" ")
}

fn write_joint<W: Write>(
    out: &mut W,
    skeleton: &Skeleton,
    orders: &[EulerOrder],
    index: usize,
    depth: usize,
) -> Result<()> {
    let pad = " ".repeat(depth);
    let joint = &skeleton.joints()[index];
    let offset = format_values(&joint.offset.to_array());
    if joint.end_site {
        writeln!(out, "{pad}End Site\n{pad}{{\n{pad} OFFSET {offset}\n{pad}}}")?;
        return Ok(());
    }

    let [a0, a1, a2] = orders[index].axes().map(|a| a.letter());
    if index == 0 {
        writeln!(out, "ROOT {}\n{{", joint.name)?;
        writeln!(
            out,
            " OFFSET {offset}\n CHANNELS 6 Xposition Yposition Zposition {a0}rotation {a1}rotation {a2}rotation"
        )?;
    } else {
        writeln!(out, "{pad}JOINT {}\n{pad}{{", joint.name)?;
        writeln!(out, "{pad} OFFSET {offset}\n{pad} CHANNELS 3 {a0}rotation {a1}rotation {a2}rotation")?;
    }

    let children = skeleton.children(index);
    if children.is_empty() {
        writeln!(out, "{pad} End Site\n{pad} {{\n{pad}  OFFSET {}\n{pad} }}", format_values(&[0.0; 3]))?;
    }
    for child in children {
        write_joint(out, skeleton, orders, child, depth + 1)?;
    }
    writeln!(out, "{pad}}}")?;
    Ok(())
}

fn check_motion(
    skeleton: &Skeleton,
    root_translations: &[Vec3],
    eulers: &[Vec<[f32; 3]>],
    orders: &[EulerOrder],
    fps: f32,
) -> Result<()> {
    if skeleton.is_empty() {
        return Err(MotionError::InvalidInput("cannot write an empty skeleton".to_string()));
    }
    if orders.len() != skeleton.len() {
        return Err(MotionError::shape("euler orders", skeleton.len(), orders.len()));
    }
    if eulers.len() != root_translations.len() {
        return Err(MotionError::shape("euler frames", root_translations.len(), eulers.len()));
    }
    if let Some(bad) = eulers.iter().find(|f| f.len() != skeleton.len()) {
        return Err(MotionError::shape("euler joints", skeleton.len(), bad.len()));
    }
    if fps <= 0.0 {
        return Err(MotionError::InvalidInput(format!("frame rate must be positive, got {fps}")));
    }
    Ok(())
}

/// Writes a clip given as root translations and per-joint Euler angles in
/// degrees, each joint in its own order from `orders`. End-Site joints
/// carry no motion columns.
pub fn write_to<W: Write>(
    out: &mut W,
    skeleton: &Skeleton,
    root_translations: &[Vec3],
    eulers: &[Vec<[f32; 3]>],
    orders: &[EulerOrder],
    fps: f32,
) -> Result<()> {
    check_motion(skeleton, root_translations, eulers, orders, fps)?;
    writeln!(out, "HIERARCHY")?;
    write_joint(out, skeleton, orders, 0, 0)?;

    let columns: Vec<usize> = depth_first(skeleton)
        .into_iter()
        .filter(|j| !skeleton.joints()[*j].end_site)
        .collect();
    writeln!(out, "MOTION\nFrames: {}\nFrame Time: {:.6}", eulers.len(), 1.0 / fps)?;
    for (root, frame) in root_translations.iter().zip(eulers) {
        let values: Vec<f32> = root
            .to_array()
            .into_iter()
            .chain(columns.iter().flat_map(|j| frame[*j]))
            .collect();
        writeln!(out, "{}", format_values(&values))?;
    }
    Ok(())
}

pub fn write(
    skeleton: &Skeleton,
    root_translations: &[Vec3],
    eulers: &[Vec<[f32; 3]>],
    orders: &[EulerOrder],
    fps: f32,
) -> Result<String> {
    let mut buffer = Vec::new();
    write_to(&mut buffer, skeleton, root_translations, eulers, orders, fps)?;
    String::from_utf8(buffer).map_err(|e| MotionError::InvalidInput(e.to_string()))
}

fn clip_eulers(clip: &MotionClip, fallback: EulerOrder) -> (Vec<EulerOrder>, Vec<Vec<[f32; 3]>>) {
    let orders: Vec<EulerOrder> = clip
        .skeleton
        .joints()
        .iter()
        .map(|j| joint_order(j, fallback))
        .collect();
    let eulers = clip
        .joint_rotations
        .iter()
        .map(|frame| {
            frame
                .iter()
                .zip(&orders)
                .map(|(m, order)| matrix_to_euler_degrees(m, *order))
                .collect()
        })
        .collect();
    (orders, eulers)
}

/// Converts every rotation to Euler angles in its joint's order and writes
/// the clip. Joints without three rotation channels use `fallback`.
pub fn write_clip(clip: &MotionClip, fallback: EulerOrder) -> Result<String> {
    let (orders, eulers) = clip_eulers(clip, fallback);
    write(&clip.skeleton, &clip.root_positions, &eulers, &orders, clip.fps)
}

/// Writes a clip to `path`. The input is validated before anything is
/// touched, and the text goes to a sibling temporary file that replaces
/// `path` only once it is complete, so a failed call leaves an existing
/// file intact.
pub fn write_file(path: impl AsRef<Path>, clip: &MotionClip, fallback: EulerOrder) -> Result<()> {
    let path = path.as_ref();
    let (orders, eulers) = clip_eulers(clip, fallback);
    check_motion(&clip.skeleton, &clip.root_positions, &eulers, &orders, clip.fps)?;

    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    let result = File::create(&partial)
        .map_err(MotionError::from)
        .and_then(|file| {
            let mut out = BufWriter::new(file);
            write_to(&mut out, &clip.skeleton, &clip.root_positions, &eulers, &orders, clip.fps)?;
            out.flush()?;
            Ok(())
        })
        .and_then(|_| fs::rename(&partial, path).map_err(MotionError::from));
    if result.is_err() && partial.exists() {
        let _ = fs::remove_file(&partial);
    }
    result
}
