//! Pose representation, rotation conversions, and point projection.

use glam::{EulerRot, Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// A rigid transform: unit quaternion rotation plus translation in meters.
///
/// Round-trips with the 3x4 matrix form via [`Pose::from_rt`] /
/// [`Pose::rotation_matrix`], and with Euler angles via the conversion
/// helpers below.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Pose {
    pub fn new(rotation: Quat, translation: Vec3) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    /// Build from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Mat3, translation: Vec3) -> Self {
        Self {
            rotation: Quat::from_mat3(&rotation).normalize(),
            translation,
        }
    }

    /// Build from a 3x4 row-major rotation+translation block.
    pub fn from_rt_rows(rt: &[[f32; 4]; 3]) -> Self {
        let rotation = Mat3::from_cols(
            Vec3::new(rt[0][0], rt[1][0], rt[2][0]),
            Vec3::new(rt[0][1], rt[1][1], rt[2][1]),
            Vec3::new(rt[0][2], rt[1][2], rt[2][2]),
        );
        let translation = Vec3::new(rt[0][3], rt[1][3], rt[2][3]);
        Self::from_rt(rotation, translation)
    }

    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_quat(self.rotation)
    }

    /// Renderer wire form: `[tx, ty, tz, qw, qx, qy, qz]`.
    pub fn to_qt(&self) -> [f32; 7] {
        let t = self.translation;
        let q = self.rotation;
        [t.x, t.y, t.z, q.w, q.x, q.y, q.z]
    }

    pub fn from_qt(qt: &[f32; 7]) -> Self {
        Self {
            rotation: Quat::from_xyzw(qt[4], qt[5], qt[6], qt[3]).normalize(),
            translation: Vec3::new(qt[0], qt[1], qt[2]),
        }
    }
}

/// Quaternion from static-frame x/y/z Euler angles (radians), the convention
/// the dataset-derived pose rows are stored in.
pub fn quat_from_euler_sxyz(ai: f32, aj: f32, ak: f32) -> Quat {
    Quat::from_euler(EulerRot::ZYX, ak, aj, ai)
}

/// Static-frame x/y/z Euler angles (radians) from a quaternion.
pub fn euler_sxyz_from_quat(q: Quat) -> (f32, f32, f32) {
    let (ak, aj, ai) = q.to_euler(EulerRot::ZYX);
    (ai, aj, ak)
}

/// Quaternion from static-frame y/x/z Euler angles (radians); the uniform
/// grid stores yaw about y, pitch about x, roll about z.
pub fn quat_from_euler_syxz(ai: f32, aj: f32, ak: f32) -> Quat {
    Quat::from_euler(EulerRot::ZXY, ak, aj, ai)
}

/// Camera intrinsic matrix from focal lengths and principal point.
pub fn intrinsic_matrix(fx: f32, fy: f32, px: f32, py: f32) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(fx, 0.0, 0.0),
        Vec3::new(0.0, fy, 0.0),
        Vec3::new(px, py, 1.0),
    )
}

/// Project 3D model points through `pose` and intrinsics `k` to pixel
/// coordinates: `x2d = K (R p + t)`, perspective-divided by depth.
///
/// PRECONDITION: the posed points have positive finite depth. Degenerate
/// poses are a caller error, not a recoverable condition.
pub fn project_points(k: &Mat3, pose: &Pose, points: &[[f32; 3]]) -> Vec<[f32; 2]> {
    let r = pose.rotation_matrix();
    let t = pose.translation;
    points
        .iter()
        .map(|p| {
            let cam = r * Vec3::from_array(*p) + t;
            let pix = *k * cam;
            [pix.x / pix.z, pix.y / pix.z]
        })
        .collect()
}

/// Axis-aligned bounding box `[x1, y1, x2, y2]` of the projected point set.
pub fn project_box(k: &Mat3, pose: &Pose, points: &[[f32; 3]]) -> [f32; 4] {
    let mut x1 = f32::INFINITY;
    let mut y1 = f32::INFINITY;
    let mut x2 = f32::NEG_INFINITY;
    let mut y2 = f32::NEG_INFINITY;
    for p in project_points(k, pose, points) {
        x1 = x1.min(p[0]);
        y1 = y1.min(p[1]);
        x2 = x2.max(p[0]);
        y2 = y2.max(p[1]);
    }
    [x1, y1, x2, y2]
}

/// Reflect a pose under horizontal image mirroring.
///
/// Conjugates the rotation by `S = diag(-1, 1, 1)` (a proper rotation) and
/// shifts the translation so the projected silhouette lands on the mirrored
/// pixels: `t'x = tz * (w - 2 px) / fx - tx`.
pub fn flip_pose_horizontal(pose: &Pose, k: &Mat3, width: u32) -> Pose {
    let fx = k.x_axis.x;
    let px = k.z_axis.x;
    let s = Mat3::from_diagonal(Vec3::new(-1.0, 1.0, 1.0));
    let r = s * pose.rotation_matrix() * s;
    let t = pose.translation;
    let tx = t.z * (width as f32 - 2.0 * px) / fx - t.x;
    Pose::from_rt(r, Vec3::new(tx, t.y, t.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn qt_round_trip() {
        let q = quat_from_euler_sxyz(0.3, -0.7, 1.1);
        let pose = Pose::new(q, Vec3::new(0.1, -0.2, 1.5));
        let back = Pose::from_qt(&pose.to_qt());
        assert_relative_eq!(pose.rotation.dot(back.rotation).abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(pose.translation.x, back.translation.x, epsilon = 1e-6);
    }

    #[test]
    fn rt_round_trip() {
        let q = quat_from_euler_sxyz(-1.2, 0.4, 0.9);
        let pose = Pose::new(q, Vec3::new(-0.3, 0.05, 0.8));
        let m = pose.rotation_matrix();
        let back = Pose::from_rt(m, pose.translation);
        assert_relative_eq!(pose.rotation.dot(back.rotation).abs(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn euler_round_trip() {
        let (ai, aj, ak) = (0.2f32, -0.5f32, 0.8f32);
        let q = quat_from_euler_sxyz(ai, aj, ak);
        let (bi, bj, bk) = euler_sxyz_from_quat(q);
        assert_relative_eq!(ai, bi, epsilon = 1e-4);
        assert_relative_eq!(aj, bj, epsilon = 1e-4);
        assert_relative_eq!(ak, bk, epsilon = 1e-4);
    }

    #[test]
    fn projected_box_matches_known_extent() {
        // Unit square of points at depth 2 in front of an identity pose.
        let points = [
            [-0.5, -0.5, 0.0],
            [0.5, -0.5, 0.0],
            [-0.5, 0.5, 0.0],
            [0.5, 0.5, 0.0],
        ];
        let k = intrinsic_matrix(100.0, 100.0, 320.0, 240.0);
        let pose = Pose::new(Quat::IDENTITY, Vec3::new(0.0, 0.0, 2.0));
        let b = project_box(&k, &pose, &points);
        // x = 100 * (+-0.5) / 2 + 320 = 320 +- 25; y likewise around 240.
        assert_relative_eq!(b[0], 295.0, epsilon = 1e-3);
        assert_relative_eq!(b[1], 215.0, epsilon = 1e-3);
        assert_relative_eq!(b[2], 345.0, epsilon = 1e-3);
        assert_relative_eq!(b[3], 265.0, epsilon = 1e-3);
    }

    #[test]
    fn flipped_pose_projects_to_mirrored_pixels() {
        let k = intrinsic_matrix(500.0, 500.0, 320.0, 240.0);
        let width = 640u32;
        let pose = Pose::new(Quat::IDENTITY, Vec3::new(0.1, 0.0, 1.0));
        let flipped = flip_pose_horizontal(&pose, &k, width);
        // The object center projects to the mirror of the original center.
        let orig = project_points(&k, &pose, &[[0.0, 0.0, 0.0]])[0];
        let flip = project_points(&k, &flipped, &[[0.0, 0.0, 0.0]])[0];
        assert_relative_eq!(flip[0], width as f32 - orig[0], epsilon = 1e-3);
        assert_relative_eq!(flip[1], orig[1], epsilon = 1e-3);
    }
}
