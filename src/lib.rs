//! Training and evaluation data pipeline for 6D object pose estimation on
//! the YCB-Video dataset.
//!
//! This crate provides utilities for:
//! - Loading real annotated frames from the filesystem layout
//! - Composing synthetic scenes through a pluggable renderer
//! - Photometric augmentation and trainer tensor conversion
//! - Pose-error evaluation (ADD, ADD-S, VOCap)

// Module declarations
pub mod blob;
pub mod cache;
pub mod dataset;
pub mod eval;
pub mod geometry;
pub mod real;
pub mod registry;
pub mod renderer;
pub mod sampler;
pub mod synth;
pub mod types;

// Re-export public API
pub use dataset::{YcbVideoDataset, DEFAULT_INTRINSICS};
pub use eval::{
    add_error, adds_error, rotation_error_deg, translation_error, vocap, EvalRecord, EvalSummary,
    PoseEvaluator, MAX_DISTANCE,
};
pub use geometry::{flip_pose_horizontal, intrinsic_matrix, project_box, project_points, Pose};
pub use registry::{
    canonical_class_id, load_extents, pack_color, ClassRegistry, ObjectPoints, CLASSES_ALL,
    CLASS_COLORS_ALL, NUM_CLASSES_ALL, PIXEL_MEANS_BGR, SYMMETRY_ALL,
};
pub use renderer::{Light, RenderBuffer, SceneRenderer};
pub use sampler::{DatasetPoseStreams, PoseStream, UniformPoseGrid};
pub use types::*;
