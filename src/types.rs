//! Core types, error definitions, and configuration for ycb_dataset.

use crate::geometry::Pose;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("parse error at {path}: {msg}")]
    Parse { path: PathBuf, msg: String },
    #[error("required path does not exist: {path}")]
    MissingPath { path: PathBuf },
    #[error("cache error at {path}: {msg}")]
    Cache { path: PathBuf, msg: String },
    #[error("renderer error: {0}")]
    Render(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Train,
    Test,
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Train or test mode. Photometric augmentation and example shuffling are
    /// train-only.
    pub mode: Mode,
    /// Selected class ids into the full registry. Index 0 must be the
    /// background class (id 0).
    pub classes: Vec<usize>,
    /// Interleave synthetic examples between real ones.
    pub synthesize: bool,
    /// Synthetic-to-real interleave ratio: indices with
    /// `i % (syn_ratio + 1) != 0` are synthesized.
    pub syn_ratio: usize,
    /// Sample a random subset of target classes per scene. When false, every
    /// selected non-background class appears in every scene.
    pub sample_object: bool,
    /// Minimum target objects per synthetic scene.
    pub syn_min_object: usize,
    /// Maximum target objects per synthetic scene.
    pub syn_max_object: usize,
    /// Draw target rotations from the dataset-derived pose streams rather than
    /// the uniform Euler grid.
    pub sample_pose_from_dataset: bool,
    /// Gaussian rotation jitter for dataset-derived draws, degrees.
    pub syn_std_rotation_deg: f32,
    /// Angular step of the uniform Euler grid, degrees.
    pub uniform_pose_interval_deg: usize,
    /// Planar placement bound: x and y are sampled in [-bound, bound] meters.
    pub syn_bound: f32,
    /// Near depth bound for sampled translations, meters.
    pub syn_tnear: f32,
    /// Far depth bound for sampled translations, meters.
    pub syn_tfar: f32,
    /// Synthetic render width in pixels.
    pub syn_width: u32,
    /// Synthetic render height in pixels.
    pub syn_height: u32,
    /// Probability of applying the chromatic jitter (train mode only).
    pub chromatic_prob: f32,
    /// Probability of injecting pixel noise (train mode only).
    pub noise_prob: f32,
    /// Candidate rescale factors for real examples; one is drawn per example.
    pub scales_base: Vec<f32>,
    /// Real images are zero-padded to a multiple of this stride.
    pub stride: u32,
    /// Caps the logical epoch length at `max_iters_per_epoch * ims_per_batch`.
    pub max_iters_per_epoch: Option<usize>,
    /// Batch size used only for the epoch-length cap above.
    pub ims_per_batch: usize,
    /// Root directory of background color images for compositing.
    pub background_dir: Option<PathBuf>,
    /// Score the depth-refined prediction variant during evaluation.
    pub pose_refine: bool,
    /// Seed for reproducible sampling; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Train,
            classes: (0..crate::registry::NUM_CLASSES_ALL).collect(),
            synthesize: true,
            syn_ratio: 1,
            sample_object: true,
            syn_min_object: 3,
            syn_max_object: 8,
            sample_pose_from_dataset: true,
            syn_std_rotation_deg: 15.0,
            uniform_pose_interval_deg: 30,
            syn_bound: 0.4,
            syn_tnear: 0.5,
            syn_tfar: 2.0,
            syn_width: 640,
            syn_height: 480,
            chromatic_prob: 0.9,
            noise_prob: 0.9,
            scales_base: vec![1.0],
            stride: 16,
            max_iters_per_epoch: None,
            ims_per_batch: 1,
            background_dir: None,
            pose_refine: false,
            seed: None,
        }
    }
}

/// One labeled example as handed to the trainer.
///
/// `boxes`, `labels`, `occlusion`, and `masks` are parallel: always the same
/// length and the same ordering. A zero-instance example (all four empty) is
/// valid output, not an error.
#[derive(Debug, Clone)]
pub struct DatasetExample {
    /// CHW, BGR channel order, per-channel pixel mean subtracted
    /// (`255 * (v/255 - mean/255)`).
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// Axis-aligned `[x1, y1, x2, y2]` in pixels, clipped to image bounds.
    pub boxes: Vec<[f32; 4]>,
    /// Slot indices into the selected class subset.
    pub labels: Vec<usize>,
    /// 0 = fully visible, 1 = fully occluded. Zero-filled on the real path.
    pub occlusion: Vec<f32>,
    /// Per-instance binary masks, `height * width` bytes of 0/1 each.
    pub masks: Vec<Vec<u8>>,
}

/// Per-frame ground-truth metadata record (the `-meta` sidecar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Global class ids present in the frame, one per annotated instance.
    pub cls_indexes: Vec<usize>,
    /// Per-instance 3x4 rotation+translation, row-major rows.
    pub poses: Vec<[[f32; 4]; 3]>,
    pub intrinsic_matrix: [[f32; 3]; 3],
}

/// One entry of the ground-truth record list (roidb).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub color: PathBuf,
    pub label: PathBuf,
    pub meta: PathBuf,
    pub video_id: String,
    pub frame_id: String,
    pub flipped: bool,
}

/// A network prediction for one detected instance, as consumed by the
/// pose-error evaluator.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Global class id.
    pub cls_index: usize,
    pub pose: Pose,
    /// Depth-refined variant, when the pipeline produced one.
    pub pose_refined: Option<Pose>,
}
