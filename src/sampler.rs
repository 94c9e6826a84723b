//! Per-class pose streams: shuffled, non-repeating draws with controllable
//! perturbation. Two independent stream families exist side by side — rows
//! harvested from dataset annotations, and a uniform Euler-angle grid.

use crate::geometry::{quat_from_euler_sxyz, quat_from_euler_syxz, Pose};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};

fn gauss(rng: &mut StdRng, std: f32) -> f32 {
    if std <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, std)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

/// An ordered pose sequence consumed with an advancing cursor; on exhaustion
/// it reshuffles uniformly at random and the cursor resets. Wraparound is the
/// designed reshuffle-and-repeat behavior, not an error.
#[derive(Debug, Clone)]
pub struct PoseStream {
    rows: Vec<[f32; 6]>,
    cursor: usize,
}

impl PoseStream {
    /// `rows` are Euler angles (radians, static-xyz) followed by translation.
    pub fn new(rows: Vec<[f32; 6]>) -> Self {
        Self { rows, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn draw(&mut self, rng: &mut StdRng) -> [f32; 6] {
        if self.cursor >= self.rows.len() {
            self.rows.shuffle(rng);
            self.cursor = 0;
        }
        let row = self.rows[self.cursor];
        self.cursor += 1;
        row
    }
}

/// One dataset-derived stream per non-background class of the subset.
#[derive(Debug, Clone)]
pub struct DatasetPoseStreams {
    streams: Vec<PoseStream>,
}

impl DatasetPoseStreams {
    /// `per_class[i]` holds the rows of subset slot `i + 1`.
    pub fn new(per_class: Vec<Vec<[f32; 6]>>) -> Self {
        Self {
            streams: per_class.into_iter().map(PoseStream::new).collect(),
        }
    }

    pub fn stream_len(&self, slot: usize) -> usize {
        self.streams[slot - 1].len()
    }

    /// Draw a full pose for subset slot `slot` (1-based, background excluded):
    /// Gaussian rotation jitter in degrees on each Euler angle, uniform
    /// +-0.1 m jitter on each translation component.
    pub fn draw(&mut self, slot: usize, std_rotation_deg: f32, rng: &mut StdRng) -> Pose {
        let row = self.streams[slot - 1].draw(rng);
        let std = std_rotation_deg.to_radians();
        let rotation = quat_from_euler_sxyz(
            row[0] + gauss(rng, std),
            row[1] + gauss(rng, std),
            row[2] + gauss(rng, std),
        );
        let translation = Vec3::new(
            row[3] + rng.random_range(-0.1..0.1),
            row[4] + rng.random_range(-0.1..0.1),
            row[5] + rng.random_range(-0.1..0.1),
        );
        Pose::new(rotation, translation)
    }
}

/// Gaussian jitter applied to each uniform-grid Euler angle, degrees.
const UNIFORM_JITTER_DEG: f32 = 15.0;

/// A fixed angular grid over yaw in [-180, 180), pitch in [-90, 90), roll in
/// [-180, 180), flattened and independently permuted per class.
#[derive(Debug, Clone)]
pub struct UniformPoseGrid {
    /// Grid rows in degrees: yaw, pitch, roll.
    eulers: Vec<[f32; 3]>,
    /// Per-class draw order into `eulers`; index is renderer class index
    /// (global id - 1).
    order: Vec<Vec<usize>>,
    cursors: Vec<usize>,
}

impl UniformPoseGrid {
    pub fn new(interval_deg: usize, num_classes: usize, rng: &mut StdRng) -> Self {
        let step = interval_deg.max(1) as isize;
        let mut eulers = Vec::new();
        let mut yaw = -180isize;
        while yaw < 180 {
            let mut pitch = -90isize;
            while pitch < 90 {
                let mut roll = -180isize;
                while roll < 180 {
                    eulers.push([yaw as f32, pitch as f32, roll as f32]);
                    roll += step;
                }
                pitch += step;
            }
            yaw += step;
        }
        let mut order = Vec::with_capacity(num_classes);
        for _ in 0..num_classes {
            let mut perm: Vec<usize> = (0..eulers.len()).collect();
            perm.shuffle(rng);
            order.push(perm);
        }
        Self {
            eulers,
            order,
            cursors: vec![0; num_classes],
        }
    }

    pub fn grid_len(&self) -> usize {
        self.eulers.len()
    }

    /// Draw a jittered rotation for renderer class index `cls`. Each Euler
    /// angle gets independent Gaussian jitter before conversion.
    pub fn draw_rotation(&mut self, cls: usize, rng: &mut StdRng) -> glam::Quat {
        if self.cursors[cls] >= self.order[cls].len() {
            self.order[cls] = (0..self.eulers.len()).collect();
            self.order[cls].shuffle(rng);
            self.cursors[cls] = 0;
        }
        let row = self.eulers[self.order[cls][self.cursors[cls]]];
        self.cursors[cls] += 1;
        let yaw = row[0] + gauss(rng, UNIFORM_JITTER_DEG);
        let pitch = row[1] + gauss(rng, UNIFORM_JITTER_DEG);
        let roll = row[2] + gauss(rng, UNIFORM_JITTER_DEG);
        quat_from_euler_syxz(yaw.to_radians(), pitch.to_radians(), roll.to_radians())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn exhausted_stream_reshuffles_without_repeating_values() {
        let rows: Vec<[f32; 6]> = (0..3)
            .map(|i| [i as f32, 0.0, 0.0, 0.0, 0.0, 1.0])
            .collect();
        let mut stream = PoseStream::new(rows.clone());
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = Vec::new();
        // N + 1 draws over a stream of length N: exactly one reshuffle, no
        // panic, and every drawn row comes from the original value set.
        for _ in 0..4 {
            seen.push(stream.draw(&mut rng));
        }
        for row in &seen {
            assert!(rows.contains(row));
        }
        // The first N draws cover the stream exactly once.
        let mut firsts: Vec<f32> = seen[..3].iter().map(|r| r[0]).collect();
        firsts.sort_by(f32::total_cmp);
        assert_eq!(firsts, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn uniform_grid_enumerates_full_angle_box() {
        let mut rng = StdRng::seed_from_u64(1);
        let grid = UniformPoseGrid::new(90, 2, &mut rng);
        // 4 yaw steps * 2 pitch steps * 4 roll steps
        assert_eq!(grid.grid_len(), 32);
    }

    #[test]
    fn grid_cursor_wraps_per_class() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut grid = UniformPoseGrid::new(180, 1, &mut rng);
        let n = grid.grid_len();
        for _ in 0..(2 * n + 1) {
            let q = grid.draw_rotation(0, &mut rng);
            assert!(q.is_normalized());
        }
    }
}
