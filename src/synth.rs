//! Synthetic scene composition: object/pose sampling, rendering, background
//! compositing, occlusion filtering, and label emission.

use crate::blob::{image_tensor_chw, maybe_chromatic, maybe_noise};
use crate::geometry::{project_box, Pose};
use crate::registry::{pack_color, ClassRegistry, ObjectPoints};
use crate::renderer::{Light, RenderBuffer, SceneRenderer};
use crate::sampler::{DatasetPoseStreams, UniformPoseGrid};
use crate::types::{DatasetConfig, DatasetExample, DatasetResult, Mode};
use glam::{Mat3, Vec3};
use image::imageops::FilterType;
use image::RgbImage;
use log::warn;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};

pub(crate) const ZNEAR: f32 = 0.01;
pub(crate) const ZFAR: f32 = 6.0;

/// Instances hidden beyond this occlusion ratio are dropped entirely.
const MAX_OCCLUSION: f32 = 0.9;

/// Distractor cap per scene.
const MAX_DISTRACTORS: usize = 5;

/// Composes one synthetic example. Borrows the per-dataset mutable sampler
/// state; the orchestrator owns it and serializes access.
pub(crate) struct SceneComposer<'a> {
    pub cfg: &'a DatasetConfig,
    pub registry: &'a ClassRegistry,
    pub points: &'a ObjectPoints,
    pub backgrounds: &'a [PathBuf],
    pub intrinsics: Mat3,
    pub dataset_poses: Option<&'a mut DatasetPoseStreams>,
    pub uniform_poses: &'a mut UniformPoseGrid,
}

impl SceneComposer<'_> {
    pub fn compose(
        &mut self,
        renderer: &mut dyn SceneRenderer,
        rng: &mut StdRng,
    ) -> DatasetResult<DatasetExample> {
        let width = self.cfg.syn_width;
        let height = self.cfg.syn_height;
        let num_selected = self.registry.num_classes();

        // Target class subset: a random permutation prefix, no duplicates.
        let target_slots: Vec<usize> = if self.cfg.sample_object {
            let maxnum = (num_selected - 1).min(self.cfg.syn_max_object).max(1);
            let minnum = self.cfg.syn_min_object.clamp(1, maxnum);
            let num = rng.random_range(minnum..=maxnum);
            let mut perm: Vec<usize> = (1..num_selected).collect();
            perm.shuffle(rng);
            perm.truncate(num);
            perm
        } else {
            (1..num_selected).collect()
        };
        let num_target = target_slots.len();

        // Renderer class indices (global id - 1): targets then distractors.
        let mut renderer_ids: Vec<usize> = target_slots
            .iter()
            .map(|&slot| self.registry.class_id(slot) - 1)
            .collect();
        let other = self.registry.other_classes();
        let num_other = MAX_DISTRACTORS.min(other.len());
        let mut perm: Vec<usize> = (0..other.len()).collect();
        perm.shuffle(rng);
        for &idx in perm.iter().take(num_other) {
            renderer_ids.push(other[idx] - 1);
        }

        // Pose per instance.
        let mut poses: Vec<Pose> = Vec::with_capacity(renderer_ids.len());
        for i in 0..renderer_ids.len() {
            let rid = renderer_ids[i];
            let from_dataset = self.cfg.sample_pose_from_dataset
                && i < num_target
                && self
                    .dataset_poses
                    .as_ref()
                    .is_some_and(|s| s.stream_len(target_slots[i]) > 0);
            let mut pose = None;
            if from_dataset {
                if let Some(streams) = self.dataset_poses.as_mut() {
                    pose = Some(streams.draw(target_slots[i], self.cfg.syn_std_rotation_deg, rng));
                }
            }
            let pose = match pose {
                Some(p) => p,
                None => {
                    let rotation = self.uniform_poses.draw_rotation(rid, rng);
                    let translation = self.sample_translation(i, num_target, rid, &poses, rng);
                    Pose::new(rotation, translation)
                }
            };
            poses.push(pose);
        }
        let qts: Vec<[f32; 7]> = poses.iter().map(Pose::to_qt).collect();

        // One point light per scene.
        let light = sample_light(rng);

        let (fx, fy) = (self.intrinsics.x_axis.x, self.intrinsics.y_axis.y);
        let (px, py) = (self.intrinsics.z_axis.x, self.intrinsics.z_axis.y);
        renderer.set_camera_projection(width, height, fx, fy, px, py, ZNEAR, ZFAR);
        renderer.set_poses(&qts);
        renderer.set_light(light);

        let mut color = RenderBuffer::new(width, height);
        let mut seg = RenderBuffer::new(width, height);
        renderer.render(&renderer_ids, &mut color, &mut seg)?;
        color.flip_vertical();
        seg.flip_vertical();

        // Packed instance ids of the full scene, for occlusion testing.
        let seg_input = seg.instance_ids();

        // Full-scene label decode: subset slots and all-class ids per pixel.
        let seg_rgb = seg.rgb8();
        let mut labels = vec![0usize; seg_rgb.len()];
        let mut labels_all = vec![0usize; seg_rgb.len()];
        for (i, rgb) in seg_rgb.iter().enumerate() {
            let cls = self.registry.class_of_packed(pack_color(*rgb));
            labels_all[i] = cls;
            if cls != 0 {
                if let Some(slot) = self.registry.slot_of(cls) {
                    labels[i] = slot;
                }
            }
        }

        // Paste the rendered scene over a sampled background: every pixel the
        // full scene (targets and distractors) left as background gets the
        // background color.
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let p = color.pixel(x, y);
            pixel.0 = [
                (p[0].clamp(0.0, 1.0) * 255.0) as u8,
                (p[1].clamp(0.0, 1.0) * 255.0) as u8,
                (p[2].clamp(0.0, 1.0) * 255.0) as u8,
            ];
        }
        let background = self.sample_background(width, height, rng);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            if labels_all[(y * width + x) as usize] == 0 {
                *pixel = *background.get_pixel(x, y);
            }
        }

        if self.cfg.mode == Mode::Train {
            maybe_chromatic(&mut img, self.cfg.chromatic_prob, rng);
            maybe_noise(&mut img, self.cfg.noise_prob, rng);
        }
        let image_chw = image_tensor_chw(&img);

        // Occlusion test per target: re-render each instance alone and count
        // how much of its silhouette survives in the composite.
        let mut boxes = Vec::new();
        let mut out_labels = Vec::new();
        let mut occlusion = Vec::new();
        let mut masks = Vec::new();
        let mut single_color = RenderBuffer::new(width, height);
        let mut single_seg = RenderBuffer::new(width, height);
        for i in 0..num_target {
            let slot = target_slots[i];
            renderer.set_poses(&qts[i..i + 1]);
            renderer.render(
                &renderer_ids[i..i + 1],
                &mut single_color,
                &mut single_seg,
            )?;
            single_seg.flip_vertical();
            let seg_target = single_seg.instance_ids();

            let mut area = 0usize;
            let mut non_occluded = 0usize;
            for (t, s) in seg_target.iter().zip(seg_input.iter()) {
                if *t > 0.0 {
                    area += 1;
                    if t == s {
                        non_occluded += 1;
                    }
                }
            }
            let ratio = if area > 0 {
                1.0 - non_occluded as f32 / area as f32
            } else {
                1.0
            };
            if ratio > MAX_OCCLUSION {
                continue;
            }

            boxes.push(project_box(
                &self.intrinsics,
                &poses[i],
                self.points.truncated(slot),
            ));
            out_labels.push(slot);
            occlusion.push(ratio);
            masks.push(labels.iter().map(|&l| (l == slot) as u8).collect());
        }

        let mut example = DatasetExample {
            image_chw,
            width,
            height,
            boxes,
            labels: out_labels,
            occlusion,
            masks,
        };
        clip_instances(&mut example);
        Ok(example)
    }

    /// Translation policy: the first object and all distractors get a uniform
    /// position within the planar bound and depth range; later targets are,
    /// half the time, dropped next to an already placed object at an offset
    /// derived from the mean model extent.
    fn sample_translation(
        &self,
        i: usize,
        num_target: usize,
        rid: usize,
        placed: &[Pose],
        rng: &mut StdRng,
    ) -> Vec3 {
        let bound = self.cfg.syn_bound;
        if i == 0 || i >= num_target || rng.random_range(0.0..1.0f32) > 0.5 {
            return Vec3::new(
                rng.random_range(-bound..bound),
                rng.random_range(-bound..bound),
                rng.random_range(self.cfg.syn_tnear..self.cfg.syn_tfar),
            );
        }

        let anchor = placed[rng.random_range(0..i)].translation;
        let e = self.registry.extent(rid + 1);
        let extent = (e[0] + e[1] + e[2]) / 3.0;

        let mut planar = [0.0f32; 2];
        for (axis, v) in planar.iter_mut().enumerate() {
            let sign = if rng.random_range(0..2) == 0 { -1.0 } else { 1.0 };
            let base = if axis == 0 { anchor.x } else { anchor.y };
            let mut coord = base + sign * extent * rng.random_range(1.0..1.5);
            if coord.abs() > bound {
                coord = base - sign * extent * rng.random_range(1.0..1.5);
            }
            if coord.abs() > bound {
                coord = rng.random_range(-bound..bound);
            }
            *v = coord;
        }

        let mut z = anchor.z - extent * rng.random_range(2.0..4.0);
        if z < self.cfg.syn_tnear {
            z = anchor.z + extent * rng.random_range(2.0..4.0);
        }
        Vec3::new(planar[0], planar[1], z)
    }

    /// Sample, crop, and resize a background image. The only locally
    /// recovered fault in composition: any failure substitutes solid black.
    fn sample_background(&self, width: u32, height: u32, rng: &mut StdRng) -> RgbImage {
        if self.backgrounds.is_empty() {
            return RgbImage::new(width, height);
        }
        let path = &self.backgrounds[rng.random_range(0..self.backgrounds.len())];
        match load_background(path, width, height, rng) {
            Some(img) => img,
            None => {
                warn!("bad background image {}", path.display());
                RgbImage::new(width, height)
            }
        }
    }
}

/// Random crop covering at least the central two-thirds, then resize.
fn load_background(path: &Path, width: u32, height: u32, rng: &mut StdRng) -> Option<RgbImage> {
    let img = image::open(path).ok()?.to_rgb8();
    let (bw, bh) = img.dimensions();
    if bw < 3 || bh < 3 {
        return None;
    }
    let x1 = rng.random_range(0..bw / 3);
    let y1 = rng.random_range(0..bh / 3);
    let x2 = rng.random_range(2 * bw / 3..bw);
    let y2 = rng.random_range(2 * bh / 3..bh);
    let crop = image::imageops::crop_imm(&img, x1, y1, x2 - x1, y2 - y1).to_image();
    Some(image::imageops::resize(
        &crop,
        width,
        height,
        FilterType::Triangle,
    ))
}

fn sample_light(rng: &mut StdRng) -> Light {
    use std::f32::consts::FRAC_PI_2;
    let theta = rng.random_range(-FRAC_PI_2..FRAC_PI_2);
    let phi = rng.random_range(0.0..FRAC_PI_2);
    let r = rng.random_range(0.25..3.0f32);
    let position = [
        r * theta.sin() * phi.sin(),
        r * phi.cos() + rng.random_range(-2.0..2.0),
        r * theta.cos() * phi.sin(),
    ];
    let intensity = rng.random_range(0.5..3.0f32);
    let color = [
        intensity * rng.random_range(0.5..1.5),
        intensity * rng.random_range(0.5..1.5),
        intensity * rng.random_range(0.5..1.5),
    ];
    Light { position, color }
}

/// Clip boxes to image bounds and drop instances whose clipped box is empty,
/// keeping `boxes`/`labels`/`occlusion`/`masks` parallel.
pub(crate) fn clip_instances(example: &mut DatasetExample) {
    let w = example.width as f32 - 1.0;
    let h = example.height as f32 - 1.0;
    let mut keep = Vec::with_capacity(example.boxes.len());
    for b in example.boxes.iter_mut() {
        b[0] = b[0].clamp(0.0, w);
        b[1] = b[1].clamp(0.0, h);
        b[2] = b[2].clamp(0.0, w);
        b[3] = b[3].clamp(0.0, h);
        keep.push(b[2] > b[0] && b[3] > b[1]);
    }
    let mut it = keep.iter();
    example.boxes.retain(|_| *it.next().unwrap_or(&false));
    let mut it = keep.iter();
    example.labels.retain(|_| *it.next().unwrap_or(&false));
    let mut it = keep.iter();
    example.occlusion.retain(|_| *it.next().unwrap_or(&false));
    let mut it = keep.iter();
    example.masks.retain(|_| *it.next().unwrap_or(&false));
}
