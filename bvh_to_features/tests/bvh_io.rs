use std::fs;
use std::path::PathBuf;

use bevy_math::Vec3;
use bvh_to_features::bvh::{self, ParseOptions};
use bvh_to_features::rotation::{Axis, EulerOrder, matrix_from_euler};
use bvh_to_features::skeleton::Channel;
use bvh_to_features::{Joint, MotionError, Skeleton};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bvh_to_features_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn two_joints() -> Skeleton {
    let rotation = |a, b, c| vec![Channel::Rotation(a), Channel::Rotation(b), Channel::Rotation(c)];
    let mut root_channels = vec![
        Channel::Position(Axis::X),
        Channel::Position(Axis::Y),
        Channel::Position(Axis::Z),
    ];
    root_channels.extend(rotation(Axis::Z, Axis::Y, Axis::X));

    let mut skeleton = Skeleton::new();
    skeleton
        .add_joint(Joint::new("Hips", None, Vec3::new(0.0, 0.0, 0.0)).with_channels(root_channels))
        .unwrap();
    skeleton
        .add_joint(
            Joint::new("Spine", Some(0), Vec3::new(0.5, 11.25, -1.0))
                .with_channels(rotation(Axis::Y, Axis::X, Axis::Z)),
        )
        .unwrap();
    skeleton
}

#[test]
fn two_joint_clip_survives_write_and_parse() {
    let skeleton = two_joints();
    let roots = vec![
        Vec3::new(0.0, 90.0, 0.0),
        Vec3::new(1.5, 90.25, -0.5),
        Vec3::new(3.0, 90.5, -1.0),
    ];
    let eulers = vec![
        vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
        vec![[30.0, -10.0, 5.0], [45.0, 20.0, -15.0]],
        vec![[-60.0, 25.0, 80.0], [-90.0, 35.0, 10.0]],
    ];
    let orders = [EulerOrder::ZYX, EulerOrder::YXZ];
    let text = bvh::write(&skeleton, &roots, &eulers, &orders, 30.0).unwrap();
    let clip = bvh::parse(&text, ParseOptions::default()).unwrap();

    assert_eq!(clip.skeleton.names(), vec!["Hips", "Spine"]);
    assert_eq!(clip.skeleton.links(), vec![(1, 0)]);
    assert_eq!(clip.skeleton.joint_offsets(), skeleton.joint_offsets());
    assert_eq!(clip.root_positions, roots);
    assert_eq!(clip.skeleton.joint(1).unwrap().rotation_axes(), vec![Axis::Y, Axis::X, Axis::Z]);

    for (frame, angles) in clip.joint_rotations.iter().zip(&eulers) {
        for ((m, a), order) in frame.iter().zip(angles).zip(orders) {
            assert!(m.abs_diff_eq(matrix_from_euler(order, *a), 1e-5));
        }
    }
}

#[test]
fn write_clip_reuses_declared_orders() {
    let skeleton = two_joints();
    let text = bvh::write(
        &skeleton,
        &[Vec3::ZERO],
        &[vec![[10.0, 20.0, 30.0], [-5.0, 15.0, 25.0]]],
        &[EulerOrder::ZYX, EulerOrder::YXZ],
        60.0,
    )
    .unwrap();
    let clip = bvh::parse(&text, ParseOptions::default()).unwrap();
    let written = bvh::write_clip(&clip, EulerOrder::XYZ).unwrap();
    assert!(written.contains("CHANNELS 3 Yrotation Xrotation Zrotation"));
    assert!(written.contains("Frame Time: 0.016667"));
    let again = bvh::parse(&written, ParseOptions::default()).unwrap();
    for (a, b) in again.joint_rotations[0].iter().zip(&clip.joint_rotations[0]) {
        assert!(a.abs_diff_eq(*b, 1e-5));
    }
}

#[test]
fn files_round_trip_through_disk() {
    let dir = scratch("bvh_io");
    let path = dir.join("clip.bvh");
    let text = bvh::write(&two_joints(), &[Vec3::ZERO, Vec3::X], &vec![vec![[0.0; 3]; 2]; 2], &[EulerOrder::ZYX; 2], 30.0)
        .unwrap();
    let clip = bvh::parse(&text, ParseOptions::default()).unwrap();
    bvh::write_file(&path, &clip, EulerOrder::ZYX).unwrap();
    let loaded = bvh::parse_file(&path, ParseOptions::default()).unwrap();
    assert_eq!(loaded.frame_count(), 2);
    assert_eq!(loaded.root_positions[1], Vec3::X);
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn malformed_files_fail_with_context() {
    assert!(matches!(
        bvh::parse("HIERARCHY\nROOT Hips\n{\n OFFSET 0 0\n}", ParseOptions::default()),
        Err(MotionError::Parse { line: 5, .. })
    ));
    assert!(matches!(
        bvh::parse("MOTION\nFrames: 0", ParseOptions::default()),
        Err(MotionError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        bvh::parse_file("/nonexistent/clip.bvh", ParseOptions::default()),
        Err(MotionError::Io(_))
    ));
}
