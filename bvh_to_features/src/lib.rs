//! BVH motion ingestion: parsing, forward kinematics and conversion to
//! heading-normalized feature frames for sequence models, and back.

pub mod bvh;
pub mod config;
pub mod corpus;
pub mod decode;
pub mod error;
pub mod features;
pub mod kinematics;
pub mod layout;
pub mod motion;
pub mod normalize;
pub mod rig;
pub mod rotation;
pub mod skeleton;
pub mod trajectory;

pub use bvh::{ParseOptions, parse, parse_file, write_clip, write_file};
pub use config::{CorpusConfig, FeatureConfig, RootLinear, RootRotation, Unit};
pub use corpus::{CorpusBundle, IngestReport, build_corpus};
pub use decode::{DecodeMode, IkSolver, PoseSource};
pub use error::{MotionError, Result};
pub use features::FeatureCodec;
pub use kinematics::{FkInput, GlobalPose, forward_kinematics};
pub use layout::{ChannelBlock, FeatureLayout};
pub use motion::MotionClip;
pub use normalize::{NormalizationMode, NormalizationStats};
pub use rig::{RigInfo, rig};
pub use rotation::{EulerOrder, RotationRepr};
pub use skeleton::{Joint, Skeleton};
pub use trajectory::{RootState, TrajectoryIntegrator};
