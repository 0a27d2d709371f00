use approx::assert_abs_diff_eq;
use bevy_math::{Mat3, Vec3};
use bvh_to_features::rotation::yaw_of;
use bvh_to_features::{
    ChannelBlock, DecodeMode, FeatureCodec, FeatureConfig, Joint, MotionClip, RootLinear, RootRotation,
    RotationRepr, Skeleton, rig,
};
use ndarray::{Array2, s};

fn chain() -> Skeleton {
    let mut skeleton = Skeleton::new();
    skeleton.add_joint(Joint::new("root", None, Vec3::ZERO)).unwrap();
    skeleton.add_joint(Joint::new("child", Some(0), Vec3::Y)).unwrap();
    skeleton.add_joint(Joint::new("grandchild", Some(1), Vec3::Y)).unwrap();
    skeleton
}

fn walker() -> Skeleton {
    let mut skeleton = Skeleton::new();
    skeleton.add_joint(Joint::new("hips", None, Vec3::ZERO)).unwrap();
    skeleton.add_joint(Joint::new("spine", Some(0), Vec3::new(0.0, 12.0, 0.0))).unwrap();
    skeleton.add_joint(Joint::new("head", Some(1), Vec3::new(0.0, 20.0, 2.0))).unwrap();
    skeleton.add_joint(Joint::new("thigh", Some(0), Vec3::new(9.0, -5.0, 0.0))).unwrap();
    skeleton.add_joint(Joint::new("shin", Some(3), Vec3::new(0.0, -42.0, 0.0))).unwrap();
    skeleton.add_joint(Joint::new("foot", Some(4), Vec3::new(0.0, -40.0, 3.0))).unwrap();
    skeleton
}

/// A curved walk: the root advances, turns and bobs while the limbs swing.
fn curved_walk(frames: usize) -> MotionClip {
    let mut heading = 0.7f32;
    let mut position = Vec3::new(25.0, 92.0, -40.0);
    let mut roots = Vec::new();
    let mut rotations = Vec::new();
    for t in 0..frames {
        let phase = t as f32 * 0.35;
        heading += 0.04;
        position += Mat3::from_rotation_y(heading) * Vec3::new(0.0, 0.0, 2.5);
        position.y = 92.0 + phase.sin();
        roots.push(position);
        rotations.push(vec![
            Mat3::from_rotation_y(heading) * Mat3::from_rotation_x(0.05 * phase.cos()),
            Mat3::from_rotation_z(0.1 * phase.sin()),
            Mat3::from_rotation_x(-0.2),
            Mat3::from_rotation_x(0.6 * phase.sin()),
            Mat3::from_rotation_x(0.3 + 0.3 * phase.cos()),
            Mat3::from_rotation_y(0.1),
        ]);
    }
    MotionClip::new(walker(), roots, rotations, 30.0).unwrap()
}

fn block(features: &Array2<f32>, codec: &FeatureCodec, block: ChannelBlock) -> Array2<f32> {
    let range = codec.layout.block(block).unwrap();
    features.slice(s![.., range]).to_owned()
}

fn assert_close(a: &Array2<f32>, b: &Array2<f32>, epsilon: f32) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = epsilon);
    }
}

#[test]
fn identity_chain_decodes_exactly_in_angle_mode() {
    let frames = 4;
    let clip = MotionClip::new(
        chain(),
        vec![Vec3::ZERO; frames],
        vec![vec![Mat3::IDENTITY; 3]; frames],
        30.0,
    )
    .unwrap();
    let expected = [Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 2.0, 0.0)];
    for pose in clip.positions().unwrap() {
        assert_eq!(pose, expected);
    }

    let codec = FeatureCodec::new(&chain(), FeatureConfig::default());
    let features = codec.encode(&clip).unwrap();
    let decoded = codec.decode(&features, DecodeMode::Angle).unwrap();
    for pose in decoded {
        for (p, e) in pose.iter().zip(&expected) {
            assert!(p.abs_diff_eq(*e, 1e-6), "{p} != {e}");
        }
    }
}

#[test]
fn decoded_clip_reproduces_the_position_channel() {
    let codec = FeatureCodec::new(&walker(), FeatureConfig::default());
    let features = codec.encode(&curved_walk(40)).unwrap();
    let clip = codec.decode_clip(&features, 30.0).unwrap();
    let again = codec.encode(&clip).unwrap();

    assert_close(
        &block(&again, &codec, ChannelBlock::Position),
        &block(&features, &codec, ChannelBlock::Position),
        1e-4,
    );
    assert_close(
        &block(&again, &codec, ChannelBlock::Rotation),
        &block(&features, &codec, ChannelBlock::Rotation),
        1e-4,
    );
    for t in 0..features.nrows() {
        assert_abs_diff_eq!(again[[t, codec.layout.heading.start]], features[[t, codec.layout.heading.start]], epsilon = 1e-4);
        assert_abs_diff_eq!(again[[t, codec.layout.height]], features[[t, codec.layout.height]], epsilon = 1e-4);
    }
}

#[test]
fn all_representations_survive_decoding() {
    for repr in [RotationRepr::SixD, RotationRepr::ExpMap, RotationRepr::AxisAngle, RotationRepr::Quaternion] {
        let config = FeatureConfig {
            rotation_repr: repr,
            root_rotation: RootRotation::Full,
            root_linear: RootLinear::Spatial,
            channels: vec![ChannelBlock::Position, ChannelBlock::Rotation, ChannelBlock::Offset],
            ..FeatureConfig::default()
        };
        let codec = FeatureCodec::new(&walker(), config);
        let features = codec.encode(&curved_walk(12)).unwrap();
        let by_position = codec.decode(&features, DecodeMode::Position).unwrap();
        let by_angle = codec.decode(&features, DecodeMode::Angle).unwrap();
        for (a, b) in by_position.iter().flatten().zip(by_angle.iter().flatten()) {
            assert!(a.abs_diff_eq(*b, 1e-3), "{repr:?}: {a} != {b}");
        }
    }
}

#[test]
fn first_frame_heading_is_removed_and_renormalizing_is_a_no_op() {
    let lafan = rig("LAFAN1").unwrap();
    let codec = FeatureCodec::new(&walker(), FeatureConfig::for_rig(lafan));
    let features = codec.encode(&curved_walk(10)).unwrap();

    let cols = codec.layout.joint_columns(ChannelBlock::Rotation, 0).unwrap();
    let root = RotationRepr::SixD
        .decode(features.slice(s![0, cols]).as_slice().unwrap())
        .unwrap();
    // The calibrated heading of a normalized root is zero.
    let calibrated = yaw_of(&root) + lafan.heading_offset_deg.to_radians();
    assert_abs_diff_eq!(calibrated.sin(), 0.0, epsilon = 1e-5);
    assert_abs_diff_eq!(calibrated.cos(), 1.0, epsilon = 1e-5);

    let clip = codec.decode_clip(&features, 30.0).unwrap();
    let rescaled = clip.scaled(1.0 / lafan.unit.scale());
    let again = codec.encode(&rescaled).unwrap();
    assert_close(
        &block(&again, &codec, ChannelBlock::Position),
        &block(&features, &codec, ChannelBlock::Position),
        1e-4,
    );
}

#[test]
fn straight_walk_trajectory_matches_the_source() {
    let frames = 20;
    let roots: Vec<Vec3> = (0..frames).map(|t| Vec3::new(0.0, 90.0, 3.0 * t as f32)).collect();
    let rotations = vec![vec![Mat3::IDENTITY; 6]; frames];
    let clip = MotionClip::new(walker(), roots.clone(), rotations, 30.0).unwrap();

    let codec = FeatureCodec::new(&walker(), FeatureConfig::default());
    let features = codec.encode(&clip).unwrap();
    let path = codec.trajectory(&features).unwrap();
    for (state, root) in path.iter().zip(&roots) {
        assert_abs_diff_eq!(state.heading, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(state.position.z, root.z, epsilon = 1e-4);
    }

    let world = codec.decode(&features, DecodeMode::Velocity).unwrap();
    let source = clip.positions().unwrap();
    let floor = source[0].iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    for (decoded, original) in world.iter().zip(&source) {
        for (d, o) in decoded.iter().zip(original) {
            assert!(d.abs_diff_eq(*o - Vec3::new(0.0, floor, 0.0), 1e-3), "{d} != {o}");
        }
    }
}
