//! Integration tests for the end-to-end data pipeline.
//!
//! These tests verify that the major workflows work correctly together:
//! 1. Image-set parsing → ground-truth records → real example loading
//! 2. Synthetic scene composition through a stub renderer, including the
//!    occlusion filter
//! 3. Detection scoring through the pose evaluator

use glam::{Quat, Vec3};
use image::{GrayImage, Rgb, RgbImage};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use ycb_dataset::{
    renderer::{Light, RenderBuffer},
    ClassRegistry, DatasetConfig, DatasetResult, Detection, FrameMeta, Mode, ObjectPoints, Pose,
    PoseEvaluator, SceneRenderer, YcbVideoDataset, CLASSES_ALL, NUM_CLASSES_ALL,
};

/// Stub rasterizer drawing one flat-colored rectangle per instance. Rectangle
/// placement depends only on the renderer class index, so the isolated
/// re-render of an instance lands on the same pixels as the composite pass.
struct RectRenderer {
    colors: Vec<[f32; 3]>,
    poses: Vec<[f32; 7]>,
    /// When set, every instance is drawn over one shared rectangle in call
    /// order, so later instances fully cover earlier ones.
    stacked: bool,
    renders: Rc<Cell<usize>>,
}

impl RectRenderer {
    fn new(stacked: bool) -> Self {
        Self {
            colors: Vec::new(),
            poses: Vec::new(),
            stacked,
            renders: Rc::new(Cell::new(0)),
        }
    }

    /// Shared render-call counter, cloneable before the renderer moves into
    /// the dataset.
    fn render_calls(&self) -> Rc<Cell<usize>> {
        self.renders.clone()
    }

    fn rect(&self, rid: usize, width: u32, height: u32) -> (u32, u32, u32, u32) {
        if self.stacked {
            return (0, 0, width / 2, height);
        }
        let x = (rid as u32 % 8) * (width / 8);
        let y = (rid as u32 / 8) * (height / 3);
        (x, y, width / 10, height / 5)
    }
}

impl SceneRenderer for RectRenderer {
    fn load_objects(
        &mut self,
        _meshes: &[PathBuf],
        _textures: &[PathBuf],
        colors: &[[f32; 3]],
    ) -> DatasetResult<()> {
        self.colors = colors.to_vec();
        Ok(())
    }

    fn set_camera_projection(
        &mut self,
        _width: u32,
        _height: u32,
        _fx: f32,
        _fy: f32,
        _px: f32,
        _py: f32,
        _znear: f32,
        _zfar: f32,
    ) {
    }

    fn set_poses(&mut self, poses: &[[f32; 7]]) {
        self.poses = poses.to_vec();
    }

    fn set_light(&mut self, _light: Light) {}

    fn render(
        &mut self,
        class_indexes: &[usize],
        color: &mut RenderBuffer,
        seg: &mut RenderBuffer,
    ) -> DatasetResult<()> {
        self.renders.set(self.renders.get() + 1);
        assert_eq!(self.poses.len(), class_indexes.len());
        color.data.fill(0.0);
        seg.data.fill(0.0);
        for &rid in class_indexes {
            let c = self.colors[rid];
            let (x0, y0, w, h) = self.rect(rid, seg.width, seg.height);
            for y in y0..(y0 + h).min(seg.height) {
                for x in x0..(x0 + w).min(seg.width) {
                    color.set_pixel(x, y, [0.5, 0.5, 0.5, 1.0]);
                    seg.set_pixel(x, y, [c[0], c[1], c[2], 1.0]);
                }
            }
        }
        Ok(())
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Eight corners of a small cube, the model point cloud every fixture class
/// shares.
fn cube_corners(half: f32) -> Vec<[f32; 3]> {
    let mut out = Vec::new();
    for sx in [-1.0f32, 1.0] {
        for sy in [-1.0f32, 1.0] {
            for sz in [-1.0f32, 1.0] {
                out.push([sx * half, sy * half, sz * half]);
            }
        }
    }
    out
}

fn write_meta(path: &Path, cls_indexes: &[usize]) -> anyhow::Result<()> {
    let poses: Vec<[[f32; 4]; 3]> = cls_indexes
        .iter()
        .map(|_| {
            [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 1.0],
            ]
        })
        .collect();
    let meta = FrameMeta {
        cls_indexes: cls_indexes.to_vec(),
        poses,
        intrinsic_matrix: [[500.0, 0.0, 320.0], [0.0, 500.0, 240.0], [0.0, 0.0, 1.0]],
    };
    fs::write(path, serde_json::to_vec(&meta)?)?;
    Ok(())
}

/// Build a minimal dataset tree: extents, model points, one video with one
/// annotated frame per entry of `frame_classes`, and an image-set index.
fn create_fixture_frames(
    root: &Path,
    image_set: &str,
    frame_classes: &[usize],
) -> anyhow::Result<()> {
    let mut extents = String::new();
    for _ in 1..NUM_CLASSES_ALL {
        extents.push_str("0.1 0.1 0.1\n");
    }
    fs::write(root.join("extents.txt"), extents)?;

    let points: String = cube_corners(0.05)
        .iter()
        .map(|p| format!("{} {} {}\n", p[0], p[1], p[2]))
        .collect();
    for name in &CLASSES_ALL[1..] {
        let dir = root.join("models").join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("points.xyz"), &points)?;
    }

    let video_dir = root.join("data").join("0000");
    fs::create_dir_all(&video_dir)?;
    let mut index = String::new();
    for (i, &cls) in frame_classes.iter().enumerate() {
        let frame = format!("{:06}", i + 1);
        let color = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));
        color.save(video_dir.join(format!("{frame}-color.png")))?;
        let label = GrayImage::from_pixel(640, 480, image::Luma([cls as u8]));
        label.save(video_dir.join(format!("{frame}-label.png")))?;
        write_meta(&video_dir.join(format!("{frame}-meta.json")), &[cls])?;
        index.push_str(&format!("0000/{frame}\n"));
    }
    fs::write(root.join(format!("{image_set}.txt")), index)?;
    Ok(())
}

/// Fixture where every frame is annotated with class 1.
fn create_fixture(root: &Path, image_set: &str, frame_count: usize) -> anyhow::Result<()> {
    create_fixture_frames(root, image_set, &vec![1; frame_count])
}

fn base_config() -> DatasetConfig {
    DatasetConfig {
        mode: Mode::Test,
        classes: vec![0, 1],
        synthesize: false,
        sample_pose_from_dataset: false,
        syn_bound: 0.05,
        syn_tnear: 0.8,
        syn_tfar: 1.2,
        chromatic_prob: 0.0,
        noise_prob: 0.0,
        seed: Some(7),
        ..DatasetConfig::default()
    }
}

#[test]
fn real_only_pipeline_loads_annotated_frames() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    create_fixture(dir.path(), "val", 2)?;

    let renderer = RectRenderer::new(false);
    let renders = renderer.render_calls();
    let mut ds = YcbVideoDataset::new(dir.path(), "val", base_config(), renderer)?;
    assert_eq!(ds.len(), 2);

    let example = ds.get_example(0)?;
    assert_eq!(example.width, 640);
    assert_eq!(example.height, 480);
    assert_eq!(example.image_chw.len(), 3 * 640 * 480);
    assert_eq!(example.labels, vec![1]);
    assert_eq!(example.occlusion, vec![0.0]);
    assert_eq!(example.boxes.len(), example.masks.len());

    // K = 500/500/320/240, cube half-extent 0.05 centered at depth 1: the
    // near corners (depth 0.95) project the extremes, 500*0.05/0.95 = 26.32
    // px around the principal point.
    let b = example.boxes[0];
    assert!((b[0] - 293.68).abs() < 0.1 && (b[2] - 346.32).abs() < 0.1, "{b:?}");
    assert!((b[1] - 213.68).abs() < 0.1 && (b[3] - 266.32).abs() < 0.1, "{b:?}");

    // The label image is solid class 1, so the mask fills the box interior.
    let mask = &example.masks[0];
    assert_eq!(mask[(240 * 640 + 320) as usize], 1);
    assert_eq!(mask[0], 0);

    // With synthesis disabled the composer is never invoked: every index
    // resolves through the real-record path without touching the renderer.
    let _ = ds.get_example(1)?;
    assert_eq!(renders.get(), 0);
    Ok(())
}

#[test]
fn train_mode_appends_flipped_duplicates() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    create_fixture(dir.path(), "val", 2)?;

    let mut cfg = base_config();
    cfg.mode = Mode::Train;
    let mut ds = YcbVideoDataset::new(dir.path(), "val", cfg, RectRenderer::new(false))?;
    assert_eq!(ds.records().len(), 4);
    assert_eq!(ds.records().iter().filter(|r| r.flipped).count(), 2);

    // Flipped records load through the mirrored-pose path and still produce
    // one instance of the selected class.
    for i in 0..ds.len() {
        let example = ds.get_example(i)?;
        assert_eq!(example.labels, vec![1]);
    }
    Ok(())
}

#[test]
fn train_style_sets_subsample_every_tenth_frame() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    create_fixture(dir.path(), "train", 11)?;

    let ds = YcbVideoDataset::new(dir.path(), "train", base_config(), RectRenderer::new(false))?;
    // Frames 0 and 10 survive the subsampling.
    assert_eq!(ds.records().len(), 2);
    Ok(())
}

#[test]
fn subsampling_walks_the_class_filtered_frame_list() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // Frames 1-5 carry only an unselected class; frames 6-25 carry class 1.
    let mut frame_classes = vec![2usize; 5];
    frame_classes.extend(std::iter::repeat(1).take(20));
    create_fixture_frames(dir.path(), "train", &frame_classes)?;

    let ds = YcbVideoDataset::new(dir.path(), "train", base_config(), RectRenderer::new(false))?;
    // The filter runs first, so every tenth frame of the 20 class-1 frames
    // survives, not every tenth raw index line.
    let frame_ids: Vec<&str> = ds.records().iter().map(|r| r.frame_id.as_str()).collect();
    assert_eq!(frame_ids, vec!["000006", "000016"]);
    Ok(())
}

#[test]
fn synthetic_slots_interleave_with_real_records() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    create_fixture(dir.path(), "val", 2)?;

    let mut cfg = base_config();
    cfg.synthesize = true;
    cfg.syn_ratio = 3;
    cfg.sample_pose_from_dataset = true;
    let renderer = RectRenderer::new(false);
    let renders = renderer.render_calls();
    let mut ds = YcbVideoDataset::new(dir.path(), "val", cfg, renderer)?;
    assert_eq!(ds.len(), 2 * 4);

    // Index 0 is real, 1..=3 are synthesized.
    let real = ds.get_example(0)?;
    assert_eq!(real.labels, vec![1]);
    assert_eq!(renders.get(), 0);

    for index in 1..4 {
        let syn = ds.get_example(index)?;
        assert_eq!(syn.image_chw.len(), 3 * 640 * 480);
        // Only class 1 is selected, so every surviving instance maps to
        // slot 1 and the stub scene has no overlap.
        assert_eq!(syn.labels, vec![1]);
        assert_eq!(syn.occlusion, vec![0.0]);
        assert_eq!(syn.boxes.len(), syn.masks.len());
        assert!(syn.masks[0].iter().any(|&v| v == 1));
    }
    // Each synthetic slot drives the renderer (composite plus the isolated
    // occlusion pass).
    assert!(renders.get() >= 3);
    Ok(())
}

#[test]
fn fully_occluded_targets_are_dropped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    create_fixture(dir.path(), "val", 1)?;

    let mut cfg = base_config();
    cfg.synthesize = true;
    cfg.syn_ratio = 1;
    // Stacked mode: the target renders first and every distractor paints
    // over the same rectangle, hiding it completely.
    let mut ds = YcbVideoDataset::new(dir.path(), "val", cfg, RectRenderer::new(true))?;
    let example = ds.get_example(1)?;
    assert!(example.boxes.is_empty());
    assert!(example.labels.is_empty());
    assert!(example.occlusion.is_empty());
    assert!(example.masks.is_empty());
    // A zero-instance example still carries a full image tensor.
    assert_eq!(example.image_chw.len(), 3 * 640 * 480);
    Ok(())
}

#[test]
fn epoch_length_caps_to_iteration_budget() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    create_fixture(dir.path(), "val", 2)?;

    let mut cfg = base_config();
    cfg.synthesize = true;
    cfg.syn_ratio = 1;
    cfg.max_iters_per_epoch = Some(3);
    let ds = YcbVideoDataset::new(dir.path(), "val", cfg, RectRenderer::new(false))?;
    assert_eq!(ds.len(), 3);
    Ok(())
}

#[test]
fn evaluator_scores_perfect_and_missed_detections() -> anyhow::Result<()> {
    let registry = ClassRegistry::new(&[0, 1, 2], vec![[0.1, 0.1, 0.1]; NUM_CLASSES_ALL])?;
    let points = ObjectPoints::from_parts(
        vec![Vec::new(), cube_corners(0.05), cube_corners(0.05)],
        cube_corners(0.05),
    );

    let meta = FrameMeta {
        cls_indexes: vec![1, 2],
        poses: vec![
            [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 1.0],
            ];
            2
        ],
        intrinsic_matrix: [[500.0, 0.0, 320.0], [0.0, 500.0, 240.0], [0.0, 0.0, 1.0]],
    };
    // A perfect detection for class 1, nothing for class 2.
    let detections = vec![Detection {
        cls_index: 1,
        pose: Pose::new(Quat::IDENTITY, Vec3::new(0.0, 0.0, 1.0)),
        pose_refined: None,
    }];

    let mut evaluator = PoseEvaluator::new(&registry, &points, false);
    evaluator.add_frame(0, 0, &meta, &detections);
    assert_eq!(evaluator.records().len(), 2);

    let summary = evaluator.summarize();
    assert_eq!(summary.per_class.len(), 3);
    assert_eq!(summary.per_class[0].name, "all");
    // Class 1 is matched exactly; class 2 was never detected.
    assert!((summary.per_class[1].add - 1.0).abs() < 1e-4);
    assert!((summary.per_class[1].adds - 1.0).abs() < 1e-4);
    assert_eq!(summary.per_class[2].missed, 1);
    assert_eq!(summary.per_class[2].add, 0.0);

    let report = summary.report();
    assert!(report.contains("002_master_chef_can"));
    Ok(())
}
