//! Pose-error metrics (ADD, ADD-S, rotation, translation) and the VOCap
//! average-precision-style integral used to score predicted poses against
//! ground truth across an evaluation set.

use crate::geometry::Pose;
use crate::registry::{ClassRegistry, ObjectPoints};
use crate::types::{DatasetResult, Detection, FrameMeta};
use glam::{Mat3, Vec3};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Distance/error cap in meters; values beyond it count as never recalled.
pub const MAX_DISTANCE: f32 = 0.1;

/// ADD: mean pairwise distance between identically indexed posed model
/// points. Meaningless for rotationally symmetric classes.
pub fn add_error(pred: &Pose, gt: &Pose, points: &[[f32; 3]]) -> f32 {
    if points.is_empty() {
        return f32::INFINITY;
    }
    let (rp, tp) = (pred.rotation_matrix(), pred.translation);
    let (rg, tg) = (gt.rotation_matrix(), gt.translation);
    let sum: f32 = points
        .iter()
        .map(|p| {
            let v = Vec3::from_array(*p);
            ((rp * v + tp) - (rg * v + tg)).length()
        })
        .sum();
    sum / points.len() as f32
}

/// ADD-S: mean nearest-neighbor distance between the posed point sets,
/// robust to symmetric ambiguity.
pub fn adds_error(pred: &Pose, gt: &Pose, points: &[[f32; 3]]) -> f32 {
    if points.is_empty() {
        return f32::INFINITY;
    }
    let (rp, tp) = (pred.rotation_matrix(), pred.translation);
    let (rg, tg) = (gt.rotation_matrix(), gt.translation);
    let pred_pts: Vec<Vec3> = points
        .iter()
        .map(|p| rp * Vec3::from_array(*p) + tp)
        .collect();
    let gt_pts: Vec<Vec3> = points
        .iter()
        .map(|p| rg * Vec3::from_array(*p) + tg)
        .collect();
    let sum: f32 = pred_pts
        .iter()
        .map(|a| {
            gt_pts
                .iter()
                .map(|b| (*a - *b).length_squared())
                .fold(f32::INFINITY, f32::min)
                .sqrt()
        })
        .sum();
    sum / points.len() as f32
}

/// Rotation error in degrees: angle of `R_pred * R_gt^T`.
pub fn rotation_error_deg(pred: &Mat3, gt: &Mat3) -> f32 {
    let rel = *pred * gt.transpose();
    let trace = rel.x_axis.x + rel.y_axis.y + rel.z_axis.z;
    let cos = ((trace - 1.0) / 2.0).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

pub fn translation_error(pred: &Vec3, gt: &Vec3) -> f32 {
    (*pred - *gt).length()
}

/// VOC-style average precision over a (recall, accuracy) curve.
///
/// Non-finite recall entries are excluded; (0, 0) and (cap, last accuracy)
/// anchor the curve; a running maximum keeps the accuracy monotone; the
/// integral sums accuracy over recall change points, scaled by 10 so a
/// 0.1 m cap normalizes to [0, 1].
pub fn vocap(rec: &[f32], prec: &[f32]) -> f32 {
    let pairs: Vec<(f32, f32)> = rec
        .iter()
        .zip(prec.iter())
        .filter(|(r, _)| r.is_finite())
        .map(|(r, p)| (*r, *p))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    let mut mrec = Vec::with_capacity(pairs.len() + 2);
    let mut mpre = Vec::with_capacity(pairs.len() + 2);
    mrec.push(0.0);
    mpre.push(0.0);
    for (r, p) in &pairs {
        mrec.push(*r);
        mpre.push(*p);
    }
    mrec.push(MAX_DISTANCE);
    mpre.push(pairs[pairs.len() - 1].1);
    for i in 1..mpre.len() {
        if mpre[i] < mpre[i - 1] {
            mpre[i] = mpre[i - 1];
        }
    }
    let mut ap = 0.0;
    for i in 1..mrec.len() {
        if mrec[i] != mrec[i - 1] {
            ap += (mrec[i] - mrec[i - 1]) * mpre[i];
        }
    }
    ap * 10.0
}

/// Sort a distance sample, derive its cumulative accuracy curve (distances
/// over the cap count as never recalled), and integrate.
pub fn ap_from_distances(distances: &[f32]) -> f32 {
    if distances.is_empty() {
        return 0.0;
    }
    let mut d: Vec<f32> = distances
        .iter()
        .map(|&v| if v > MAX_DISTANCE { f32::INFINITY } else { v })
        .collect();
    d.sort_by(f32::total_cmp);
    let n = d.len() as f32;
    let accuracy: Vec<f32> = (1..=d.len()).map(|i| i as f32 / n).collect();
    vocap(&d, &accuracy)
}

/// Number of scored prediction variants: raw and depth-refined.
pub const NUM_VARIANTS: usize = 2;

/// Per-ground-truth-instance evaluation record. Metrics are `+infinity` when
/// no matching detection exists for the class in the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    pub seq_id: u32,
    pub frame_id: u32,
    pub object_id: u32,
    pub cls_index: usize,
    pub distances_sys: [f32; NUM_VARIANTS],
    pub distances_non: [f32; NUM_VARIANTS],
    pub errors_rotation: [f32; NUM_VARIANTS],
    pub errors_translation: [f32; NUM_VARIANTS],
}

/// Accumulates evaluation records over a full pass, then summarizes.
pub struct PoseEvaluator<'a> {
    registry: &'a ClassRegistry,
    points: &'a ObjectPoints,
    refine: bool,
    records: Vec<EvalRecord>,
}

/// Per-class summary row; `name` is `"all"` for the pooled aggregate.
#[derive(Debug, Clone)]
pub struct ClassScores {
    pub name: String,
    pub objects: usize,
    pub add: f32,
    pub adds: f32,
    pub translation: f32,
    pub missed: usize,
}

#[derive(Debug, Clone)]
pub struct EvalSummary {
    /// Index 0 is the pooled "all" row, then selected-class order.
    pub per_class: Vec<ClassScores>,
}

impl EvalSummary {
    /// `classname: score` lines in reproducible per-class ordering.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("==================ADD======================\n");
        for row in &self.per_class {
            out.push_str(&format!("{}: {:.6}\n", row.name, row.add));
        }
        out.push_str("==================ADD-S====================\n");
        for row in &self.per_class {
            out.push_str(&format!("{}: {:.6}\n", row.name, row.adds));
        }
        out.push_str("================TRANSLATION================\n");
        for row in &self.per_class {
            out.push_str(&format!("{}: {:.6}\n", row.name, row.translation));
        }
        out
    }
}

impl<'a> PoseEvaluator<'a> {
    pub fn new(registry: &'a ClassRegistry, points: &'a ObjectPoints, refine: bool) -> Self {
        Self {
            registry,
            points,
            refine,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[EvalRecord] {
        &self.records
    }

    /// Score every annotated instance of one frame against the detections
    /// produced for that frame.
    pub fn add_frame(
        &mut self,
        seq_id: u32,
        frame_id: u32,
        meta: &FrameMeta,
        detections: &[Detection],
    ) {
        for (j, &cls_index) in meta.cls_indexes.iter().enumerate() {
            let gt = Pose::from_rt_rows(&meta.poses[j]);
            let mut record = EvalRecord {
                seq_id,
                frame_id,
                object_id: j as u32,
                cls_index,
                distances_sys: [f32::INFINITY; NUM_VARIANTS],
                distances_non: [f32::INFINITY; NUM_VARIANTS],
                errors_rotation: [f32::INFINITY; NUM_VARIANTS],
                errors_translation: [f32::INFINITY; NUM_VARIANTS],
            };
            let matched = detections.iter().find(|d| d.cls_index == cls_index);
            if let (Some(det), Some(slot)) = (matched, self.registry.slot_of(cls_index)) {
                let points = self.points.raw(slot);
                self.score_variant(&mut record, 0, &det.pose, &gt, points);
                if self.refine {
                    if let Some(refined) = &det.pose_refined {
                        self.score_variant(&mut record, 1, refined, &gt, points);
                    }
                }
            }
            self.records.push(record);
        }
    }

    fn score_variant(
        &self,
        record: &mut EvalRecord,
        variant: usize,
        pred: &Pose,
        gt: &Pose,
        points: &[[f32; 3]],
    ) {
        record.distances_sys[variant] = adds_error(pred, gt, points);
        record.distances_non[variant] = add_error(pred, gt, points);
        record.errors_rotation[variant] =
            rotation_error_deg(&pred.rotation_matrix(), &gt.rotation_matrix());
        record.errors_translation[variant] =
            translation_error(&pred.translation, &gt.translation);
    }

    /// Persist the accumulated records (pure memoization; safe to delete).
    pub fn save(&self, path: &Path) -> DatasetResult<()> {
        crate::cache::save(path, &self.records)
    }

    pub fn load(&mut self, path: &Path) -> bool {
        match crate::cache::load::<Vec<EvalRecord>>(path) {
            Some(records) => {
                self.records = records;
                true
            }
            None => false,
        }
    }

    /// Per-class and pooled scores over the raw prediction variant.
    pub fn summarize(&self) -> EvalSummary {
        let mut per_class = Vec::new();
        for slot in 0..self.registry.num_classes() {
            let cls = self.registry.class_id(slot);
            let rows: Vec<&EvalRecord> = if slot == 0 {
                self.records.iter().collect()
            } else {
                self.records
                    .iter()
                    .filter(|r| r.cls_index == cls)
                    .collect()
            };
            let name = if slot == 0 {
                "all".to_string()
            } else {
                self.registry.name(slot).to_string()
            };
            if rows.is_empty() {
                per_class.push(ClassScores {
                    name,
                    objects: 0,
                    add: 0.0,
                    adds: 0.0,
                    translation: 0.0,
                    missed: 0,
                });
                continue;
            }
            let sys: Vec<f32> = rows.iter().map(|r| r.distances_sys[0]).collect();
            let non: Vec<f32> = rows.iter().map(|r| r.distances_non[0]).collect();
            let trans: Vec<f32> = rows.iter().map(|r| r.errors_translation[0]).collect();
            let missed = sys.iter().filter(|v| !v.is_finite()).count();
            info!("{name}: {} objects, {missed} missed", rows.len());
            per_class.push(ClassScores {
                name,
                objects: rows.len(),
                add: ap_from_distances(&non),
                adds: ap_from_distances(&sys),
                translation: ap_from_distances(&trans),
                missed,
            });
        }
        EvalSummary { per_class }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::quat_from_euler_sxyz;
    use approx::assert_relative_eq;
    use glam::Quat;

    fn identity_pose() -> Pose {
        Pose::new(Quat::IDENTITY, Vec3::ZERO)
    }

    #[test]
    fn add_is_zero_for_identical_poses() {
        let points = [[0.1, 0.0, 0.0], [0.0, 0.2, 0.0], [0.0, 0.0, 0.3]];
        let p = identity_pose();
        assert_relative_eq!(add_error(&p, &p, &points), 0.0);
        assert_relative_eq!(adds_error(&p, &p, &points), 0.0);
    }

    #[test]
    fn adds_ignores_symmetric_rotation_while_add_does_not() {
        // A square in the xy plane is invariant under 90-degree z rotation.
        let points = [
            [0.1, 0.0, 0.0],
            [0.0, 0.1, 0.0],
            [-0.1, 0.0, 0.0],
            [0.0, -0.1, 0.0],
        ];
        let gt = identity_pose();
        let pred = Pose::new(quat_from_euler_sxyz(0.0, 0.0, std::f32::consts::FRAC_PI_2), Vec3::ZERO);
        assert!(add_error(&pred, &gt, &points) > 0.05);
        assert!(adds_error(&pred, &gt, &points) < 1e-5);
    }

    #[test]
    fn rotation_error_measures_relative_angle() {
        let r1 = Mat3::IDENTITY;
        let r2 = Mat3::from_quat(quat_from_euler_sxyz(0.0, 0.0, 0.5));
        assert_relative_eq!(rotation_error_deg(&r1, &r1), 0.0, epsilon = 1e-3);
        assert_relative_eq!(
            rotation_error_deg(&r2, &r1),
            0.5f32.to_degrees(),
            epsilon = 1e-2
        );
    }

    #[test]
    fn vocap_smoothed_curve_is_monotone() {
        let rec = [0.01f32, 0.02, 0.05, 0.08];
        let prec = [0.25f32, 0.5, 0.4, 1.0];
        let ap = vocap(&rec, &prec);
        assert!(ap > 0.0 && ap <= 1.0);
        // The running-maximum pass never lets accuracy decrease along the
        // error axis, so a dented curve scores at least as high as its dent.
        let dented = vocap(&rec, &[0.25, 0.5, 0.5, 1.0]);
        assert!(ap <= dented + 1e-6);
    }

    #[test]
    fn vocap_of_all_infinite_errors_is_zero() {
        let rec = [f32::INFINITY; 4];
        let prec = [0.25f32, 0.5, 0.75, 1.0];
        assert_eq!(vocap(&rec, &prec), 0.0);
        assert_eq!(ap_from_distances(&rec), 0.0);
    }

    #[test]
    fn perfect_predictions_score_full_ap() {
        let d = [0.0f32, 0.0, 0.0];
        assert_relative_eq!(ap_from_distances(&d), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn over_cap_distances_are_never_recalled() {
        let d = [0.5f32, 0.7, 0.9];
        assert_eq!(ap_from_distances(&d), 0.0);
    }
}
