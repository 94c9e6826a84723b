//! Loading one cached ground-truth annotation record into the common example
//! shape: image tensor plus per-instance boxes, labels, and masks.

use crate::blob::{image_tensor_chw, maybe_chromatic, maybe_noise, pad_label_to_stride, pad_to_stride};
use crate::geometry::{flip_pose_horizontal, project_box, Pose};
use crate::registry::{canonical_class_id, ClassRegistry, ObjectPoints, LARGE_CLAMP};
use crate::synth::clip_instances;
use crate::types::{
    DatasetConfig, DatasetError, DatasetExample, DatasetResult, FrameMeta, FrameRecord, Mode,
};
use glam::{Mat3, Vec3};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;
use std::fs;
use std::path::Path;

pub(crate) fn load_meta(path: &Path) -> DatasetResult<FrameMeta> {
    let raw = fs::read(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let meta: FrameMeta = serde_json::from_slice(&raw).map_err(|e| DatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    if meta.cls_indexes.len() != meta.poses.len() {
        return Err(DatasetError::Parse {
            path: path.to_path_buf(),
            msg: format!(
                "{} class indexes but {} poses",
                meta.cls_indexes.len(),
                meta.poses.len()
            ),
        });
    }
    Ok(meta)
}

pub(crate) fn intrinsics_from_meta(meta: &FrameMeta) -> Mat3 {
    let m = &meta.intrinsic_matrix;
    Mat3::from_cols(
        Vec3::new(m[0][0], m[1][0], m[2][0]),
        Vec3::new(m[0][1], m[1][1], m[2][1]),
        Vec3::new(m[0][2], m[1][2], m[2][2]),
    )
}

/// Decode a color image, blanking any fully transparent pixels if an alpha
/// channel is present.
fn load_color(path: &Path) -> DatasetResult<RgbImage> {
    let img = image::open(path).map_err(|e| DatasetError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    match img {
        image::DynamicImage::ImageRgba8(rgba) => {
            let mut rgb = RgbImage::new(rgba.width(), rgba.height());
            for (x, y, p) in rgba.enumerate_pixels() {
                rgb.put_pixel(
                    x,
                    y,
                    if p[3] == 0 {
                        image::Rgb([0, 0, 0])
                    } else {
                        image::Rgb([p[0], p[1], p[2]])
                    },
                );
            }
            Ok(rgb)
        }
        other => Ok(other.to_rgb8()),
    }
}

fn load_label(path: &Path) -> DatasetResult<GrayImage> {
    let img = image::open(path).map_err(|e| DatasetError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(img.to_luma8())
}

pub(crate) fn load_real_example(
    record: &FrameRecord,
    cfg: &DatasetConfig,
    registry: &ClassRegistry,
    points: &ObjectPoints,
    rng: &mut StdRng,
) -> DatasetResult<DatasetExample> {
    let meta = load_meta(&record.meta)?;
    let k = intrinsics_from_meta(&meta);

    // Image blob: pad to stride, rescale, flip, augment, normalize.
    let mut img = pad_to_stride(&load_color(&record.color)?, cfg.stride);
    let scale = if cfg.scales_base.is_empty() {
        1.0
    } else {
        cfg.scales_base[rng.random_range(0..cfg.scales_base.len())]
    };
    if scale != 1.0 {
        let (w, h) = img.dimensions();
        img = image::imageops::resize(
            &img,
            ((w as f32 * scale).round() as u32).max(1),
            ((h as f32 * scale).round() as u32).max(1),
            FilterType::Triangle,
        );
    }
    if record.flipped {
        image::imageops::flip_horizontal_in_place(&mut img);
    }
    if cfg.mode == Mode::Train {
        maybe_chromatic(&mut img, cfg.chromatic_prob, rng);
        maybe_noise(&mut img, cfg.noise_prob, rng);
    }
    let (width, height) = img.dimensions();
    let image_chw = image_tensor_chw(&img);

    // Label blob: same geometry, nearest-neighbor resampling.
    let mut label = pad_label_to_stride(&load_label(&record.label)?, cfg.stride);
    if record.flipped {
        image::imageops::flip_horizontal_in_place(&mut label);
    }
    if scale != 1.0 {
        label = image::imageops::resize(&label, width, height, FilterType::Nearest);
    }

    // Merge the clamp categories before mask extraction.
    for p in label.pixels_mut() {
        if p[0] as usize == LARGE_CLAMP {
            p[0] = canonical_class_id(LARGE_CLAMP) as u8;
        }
    }

    let mut boxes = Vec::new();
    let mut out_labels = Vec::new();
    let mut masks = Vec::new();
    for (j, &cls_raw) in meta.cls_indexes.iter().enumerate() {
        let was_clamp = cls_raw == LARGE_CLAMP;
        let cls = canonical_class_id(cls_raw);
        let Some(slot) = registry.slot_of(cls) else {
            continue;
        };
        let mut pose = Pose::from_rt_rows(&meta.poses[j]);
        if record.flipped {
            pose = flip_pose_horizontal(&pose, &k, width);
        }
        let b = project_box(&k, &pose, points.for_instance(slot, was_clamp));
        boxes.push(b);
        out_labels.push(slot);

        // Region-limited mask: pixels outside the projected box never count,
        // even when same-labeled.
        let x1 = (b[0].max(0.0) as u32).min(width.saturating_sub(1));
        let y1 = (b[1].max(0.0) as u32).min(height.saturating_sub(1));
        let x2 = (b[2].max(0.0) as u32).min(width.saturating_sub(1));
        let y2 = (b[3].max(0.0) as u32).min(height.saturating_sub(1));
        let mut mask = vec![0u8; (width * height) as usize];
        for y in y1..y2 {
            for x in x1..x2 {
                if label.get_pixel(x, y)[0] as usize == cls {
                    mask[(y * width + x) as usize] = 1;
                }
            }
        }
        masks.push(mask);
    }

    // Real annotations carry no occlusion ground truth.
    let occlusion = vec![0.0; boxes.len()];
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
