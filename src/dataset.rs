//! Dataset orchestrator: owns the ground-truth record list, the sampler
//! state, and the renderer, and hands out real and synthetic examples in the
//! configured interleave.

use crate::cache::{self, class_signature};
use crate::geometry::{euler_sxyz_from_quat, intrinsic_matrix, Pose};
use crate::real::{load_meta, load_real_example};
use crate::registry::{load_extents, ClassRegistry, ObjectPoints, NUM_CLASSES_ALL};
use crate::renderer::SceneRenderer;
use crate::sampler::{DatasetPoseStreams, UniformPoseGrid};
use crate::synth::{SceneComposer, ZFAR, ZNEAR};
use crate::types::{
    DatasetConfig, DatasetError, DatasetExample, DatasetResult, FrameRecord, Mode,
};
use glam::Mat3;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};

/// Default camera intrinsics (fx, fy, px, py) of the capture rig, used for
/// synthetic rendering; real frames carry their own in the metadata sidecar.
pub const DEFAULT_INTRINSICS: [f32; 4] = [1066.778, 1067.487, 312.9869, 241.3109];

/// Image sets whose name starts with this prefix are subsampled to every
/// tenth frame; consecutive video frames are nearly redundant.
const TRAIN_SUBSAMPLE: usize = 10;

/// The full data pipeline for one image set.
///
/// Indexing is stateful: synthetic slots re-render a fresh scene each call,
/// real slots advance an internal cursor over a (train-mode shuffled)
/// permutation of the record list.
pub struct YcbVideoDataset<R: SceneRenderer> {
    cfg: DatasetConfig,
    registry: ClassRegistry,
    points: ObjectPoints,
    intrinsics: Mat3,
    backgrounds: Vec<PathBuf>,
    roidb: Vec<FrameRecord>,
    perm: Vec<usize>,
    cur: usize,
    dataset_poses: Option<DatasetPoseStreams>,
    uniform_poses: UniformPoseGrid,
    renderer: R,
    rng: StdRng,
    size: usize,
}

impl<R: SceneRenderer> YcbVideoDataset<R> {
    /// Open the dataset rooted at `root` for the named image set (e.g.
    /// `train`, `keyframe`). Expects `<root>/<image_set>.txt`,
    /// `<root>/data/`, `<root>/models/`, and `<root>/extents.txt`.
    pub fn new(
        root: &Path,
        image_set: &str,
        cfg: DatasetConfig,
        mut renderer: R,
    ) -> DatasetResult<Self> {
        let data_path = root.join("data");
        for required in [root, &data_path] {
            if !required.exists() {
                return Err(DatasetError::MissingPath {
                    path: required.to_path_buf(),
                });
            }
        }
        let cache_dir = root.join("cache");

        let extents = load_extents(root)?;
        let registry = ClassRegistry::new(&cfg.classes, extents)?;
        let points = ObjectPoints::load(root, &registry)?;
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let sig = class_signature(registry.selected());
        let roidb_path = cache_dir.join(format!("ycb_video_{image_set}{sig}_gt_roidb.bin"));
        let roidb = match cache::load::<Vec<FrameRecord>>(&roidb_path) {
            Some(db) => db,
            None => {
                let db = build_roidb(root, &data_path, image_set, &cfg, &registry)?;
                cache::save(&roidb_path, &db)?;
                db
            }
        };
        info!("{} ground-truth records for set {image_set}", roidb.len());

        let dataset_poses = if cfg.sample_pose_from_dataset {
            let poses_path = cache_dir.join(format!("ycb_video_{image_set}{sig}_poses.bin"));
            let per_class = match cache::load::<Vec<Vec<[f32; 6]>>>(&poses_path) {
                Some(rows) => rows,
                None => {
                    let rows = harvest_pose_rows(root, &data_path, image_set, &registry)?;
                    cache::save(&poses_path, &rows)?;
                    rows
                }
            };
            for (i, rows) in per_class.iter().enumerate() {
                info!("{}: {} pose rows", registry.name(i + 1), rows.len());
            }
            Some(DatasetPoseStreams::new(per_class))
        } else {
            None
        };

        let backgrounds = match &cfg.background_dir {
            Some(dir) => {
                let mut files = Vec::new();
                collect_files(dir, &mut files)?;
                files.sort();
                info!("{} background images under {}", files.len(), dir.display());
                files
            }
            None => Vec::new(),
        };

        let uniform_poses =
            UniformPoseGrid::new(cfg.uniform_pose_interval_deg, NUM_CLASSES_ALL - 1, &mut rng);

        let (meshes, textures) = registry.model_paths(root);
        renderer.load_objects(&meshes, &textures, &registry.render_colors())?;
        let [fx, fy, px, py] = DEFAULT_INTRINSICS;
        renderer.set_camera_projection(cfg.syn_width, cfg.syn_height, fx, fy, px, py, ZNEAR, ZFAR);

        let mut size = if cfg.synthesize {
            roidb.len() * (cfg.syn_ratio + 1)
        } else {
            roidb.len()
        };
        if let Some(max_iters) = cfg.max_iters_per_epoch {
            size = size.min(max_iters * cfg.ims_per_batch);
        }

        let mut perm: Vec<usize> = (0..roidb.len()).collect();
        if cfg.mode == Mode::Train {
            perm.shuffle(&mut rng);
        }

        Ok(Self {
            cfg,
            registry,
            points,
            intrinsics: intrinsic_matrix(fx, fy, px, py),
            backgrounds,
            roidb,
            perm,
            cur: 0,
            dataset_poses,
            uniform_poses,
            renderer,
            rng,
            size,
        })
    }

    /// Logical epoch length: real records plus interleaved synthetic slots,
    /// capped by the iteration budget.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn points(&self) -> &ObjectPoints {
        &self.points
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.roidb
    }

    /// Produce the example for one epoch index. With synthesis enabled,
    /// indices where `index % (syn_ratio + 1) != 0` are synthesized; the rest
    /// consume the real-record cursor in permutation order.
    pub fn get_example(&mut self, index: usize) -> DatasetResult<DatasetExample> {
        if self.cfg.synthesize && index % (self.cfg.syn_ratio + 1) != 0 {
            let mut composer = SceneComposer {
                cfg: &self.cfg,
                registry: &self.registry,
                points: &self.points,
                backgrounds: &self.backgrounds,
                intrinsics: self.intrinsics,
                dataset_poses: self.dataset_poses.as_mut(),
                uniform_poses: &mut self.uniform_poses,
            };
            return composer.compose(&mut self.renderer, &mut self.rng);
        }

        if self.roidb.is_empty() {
            return Err(DatasetError::Other(
                "no ground-truth records in this image set".into(),
            ));
        }
        if self.cur >= self.perm.len() {
            if self.cfg.mode == Mode::Train {
                self.perm.shuffle(&mut self.rng);
            }
            self.cur = 0;
        }
        let record = &self.roidb[self.perm[self.cur]];
        self.cur += 1;
        load_real_example(record, &self.cfg, &self.registry, &self.points, &mut self.rng)
    }
}

/// Parse the image-set index and build the ground-truth record list, keeping
/// only frames annotated with at least one selected class. Train-style sets
/// keep every tenth frame; train mode appends a horizontally flipped
/// duplicate of each kept record.
fn build_roidb(
    root: &Path,
    data_path: &Path,
    image_set: &str,
    cfg: &DatasetConfig,
    registry: &ClassRegistry,
) -> DatasetResult<Vec<FrameRecord>> {
    let index_path = root.join(format!("{image_set}.txt"));
    let text = fs::read_to_string(&index_path).map_err(|e| DatasetError::Io {
        path: index_path.clone(),
        source: e,
    })?;

    let mut frames: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((video, frame)) = line.split_once('/') else {
            return Err(DatasetError::Parse {
                path: index_path,
                msg: format!("bad index line: {line:?}"),
            });
        };
        frames.push((video.to_string(), frame.to_string()));
    }

    // Filter to frames annotated with a selected class first; the train-set
    // subsampling walks the filtered list, so a narrow class subset does not
    // shift which frames survive.
    let mut counts = vec![0usize; registry.num_classes()];
    let mut kept: Vec<(String, String)> = Vec::new();
    for (video, frame) in frames {
        let meta_path = data_path.join(&video).join(format!("{frame}-meta.json"));
        let meta = load_meta(&meta_path)?;
        let mut selected = false;
        for &cls in &meta.cls_indexes {
            if let Some(slot) = registry.slot_of(cls) {
                counts[slot] += 1;
                selected = true;
            }
        }
        if selected {
            kept.push((video, frame));
        }
    }
    if image_set.starts_with("train") {
        kept = kept.into_iter().step_by(TRAIN_SUBSAMPLE).collect();
    }

    let mut roidb = Vec::new();
    for (video, frame) in kept {
        let dir = data_path.join(&video);
        let record = FrameRecord {
            color: dir.join(format!("{frame}-color.png")),
            label: dir.join(format!("{frame}-label.png")),
            meta: dir.join(format!("{frame}-meta.json")),
            video_id: video.clone(),
            frame_id: frame.clone(),
            flipped: false,
        };
        if cfg.mode == Mode::Train {
            let mut flipped = record.clone();
            flipped.flipped = true;
            roidb.push(record);
            roidb.push(flipped);
        } else {
            roidb.push(record);
        }
    }
    for slot in 1..registry.num_classes() {
        info!("{}: {} annotated frames", registry.name(slot), counts[slot]);
    }
    if roidb.is_empty() {
        warn!("image set {image_set} has no frames with selected classes");
    }
    Ok(roidb)
}

/// Sweep the image-set metadata and collect one Euler+translation row per
/// annotated instance of each selected class, feeding the dataset-derived
/// pose streams.
fn harvest_pose_rows(
    root: &Path,
    data_path: &Path,
    image_set: &str,
    registry: &ClassRegistry,
) -> DatasetResult<Vec<Vec<[f32; 6]>>> {
    // Prefer the combined train+val index when present so pose coverage does
    // not depend on which split is being loaded.
    let sweep_set = if root.join("trainval.txt").exists() {
        "trainval"
    } else {
        image_set
    };
    let index_path = root.join(format!("{sweep_set}.txt"));
    let text = fs::read_to_string(&index_path).map_err(|e| DatasetError::Io {
        path: index_path.clone(),
        source: e,
    })?;

    let mut per_class: Vec<Vec<[f32; 6]>> = vec![Vec::new(); registry.num_classes() - 1];
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((video, frame)) = line.split_once('/') else {
            continue;
        };
        let meta_path = data_path.join(video).join(format!("{frame}-meta.json"));
        let meta = load_meta(&meta_path)?;
        for (j, &cls) in meta.cls_indexes.iter().enumerate() {
            let Some(slot) = registry.slot_of(cls) else {
                continue;
            };
            if slot == 0 {
                continue;
            }
            let pose = Pose::from_rt_rows(&meta.poses[j]);
            let (ai, aj, ak) = euler_sxyz_from_quat(pose.rotation);
            let t = pose.translation;
            per_class[slot - 1].push([ai, aj, ak, t.x, t.y, t.z]);
        }
    }
    Ok(per_class)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> DatasetResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| DatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
