//! Class registry: names, colors, symmetry flags, model extents, and the 3D
//! point samples used for box re-projection and the ADD/ADD-S metrics.

use crate::types::{DatasetError, DatasetResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const NUM_CLASSES_ALL: usize = 22;

/// Full class list; index 0 is always background and is never rendered,
/// sampled, or evaluated.
pub const CLASSES_ALL: [&str; NUM_CLASSES_ALL] = [
    "__background__",
    "002_master_chef_can",
    "003_cracker_box",
    "004_sugar_box",
    "005_tomato_soup_can",
    "006_mustard_bottle",
    "007_tuna_fish_can",
    "008_pudding_box",
    "009_gelatin_box",
    "010_potted_meat_can",
    "011_banana",
    "019_pitcher_base",
    "021_bleach_cleanser",
    "024_bowl",
    "025_mug",
    "035_power_drill",
    "036_wood_block",
    "037_scissors",
    "040_large_marker",
    "051_large_clamp",
    "052_extra_large_clamp",
    "061_foam_brick",
];

/// Fixed visualization colors; also the colors the renderer tags each class
/// with in its segmentation buffer.
pub const CLASS_COLORS_ALL: [[u8; 3]; NUM_CLASSES_ALL] = [
    [255, 255, 255],
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [128, 0, 0],
    [0, 128, 0],
    [0, 0, 128],
    [128, 128, 0],
    [128, 0, 128],
    [0, 128, 128],
    [64, 0, 0],
    [0, 64, 0],
    [0, 0, 64],
    [64, 64, 0],
    [64, 0, 64],
    [0, 64, 64],
    [192, 0, 0],
    [0, 192, 0],
    [0, 0, 192],
];

/// Rotational-symmetry flags. Symmetric classes invalidate ADD and are scored
/// with ADD-S.
pub const SYMMETRY_ALL: [bool; NUM_CLASSES_ALL] = [
    false, false, false, false, false, false, false, false, false, false, false, false, false,
    false, false, false, true, false, false, false, false, true,
];

/// Per-channel pixel means in BGR order; subtracted from output tensors.
pub const PIXEL_MEANS_BGR: [f32; 3] = [102.9801, 115.9465, 122.7717];

/// The two visually near-identical clamp classes merged at label-processing
/// time. An explicit remap, not a general rule.
pub const LARGE_CLAMP: usize = 19;
pub const EXTRA_LARGE_CLAMP: usize = 20;

/// Canonical class id after the clamp merge.
pub fn canonical_class_id(cls: usize) -> usize {
    if cls == LARGE_CLAMP {
        EXTRA_LARGE_CLAMP
    } else {
        cls
    }
}

/// Pack an RGB color into the base-256 triple used by the rendered
/// segmentation buffer: `r + 256*g + 65536*b`.
pub fn pack_color(rgb: [u8; 3]) -> u32 {
    rgb[0] as u32 + 256 * rgb[1] as u32 + 65536 * rgb[2] as u32
}

/// Ordered class subset plus the per-class static data the pipeline needs.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    /// Global class ids of the selected subset; `selected[0] == 0`.
    selected: Vec<usize>,
    /// Per-global-class model extents (max w/h/d in meters); row 0 is zeros.
    extents_all: Vec<[f32; 3]>,
    /// Distractor candidates: global ids outside the subset, with the clamp
    /// partner of any selected clamp excluded.
    other: Vec<usize>,
    /// Packed segmentation color to global class id.
    packed_to_class: HashMap<u32, usize>,
}

impl ClassRegistry {
    pub fn new(classes: &[usize], extents_all: Vec<[f32; 3]>) -> DatasetResult<Self> {
        if classes.first() != Some(&0) {
            return Err(DatasetError::Other(
                "class subset must start with background (id 0)".into(),
            ));
        }
        if classes.iter().any(|&c| c >= NUM_CLASSES_ALL) {
            return Err(DatasetError::Other(format!(
                "class id out of range (max {})",
                NUM_CLASSES_ALL - 1
            )));
        }
        if extents_all.len() != NUM_CLASSES_ALL {
            return Err(DatasetError::Other(format!(
                "expected {} extent rows, got {}",
                NUM_CLASSES_ALL,
                extents_all.len()
            )));
        }
        let mut other = Vec::new();
        for cls in 1..NUM_CLASSES_ALL {
            if classes.contains(&cls) {
                continue;
            }
            if cls == LARGE_CLAMP && classes.contains(&EXTRA_LARGE_CLAMP) {
                continue;
            }
            if cls == EXTRA_LARGE_CLAMP && classes.contains(&LARGE_CLAMP) {
                continue;
            }
            other.push(cls);
        }
        let packed_to_class = (1..NUM_CLASSES_ALL)
            .map(|cls| (pack_color(CLASS_COLORS_ALL[cls]), cls))
            .collect();
        Ok(Self {
            selected: classes.to_vec(),
            extents_all,
            other,
            packed_to_class,
        })
    }

    /// Number of selected classes, background included.
    pub fn num_classes(&self) -> usize {
        self.selected.len()
    }

    /// Global class ids of the subset.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Distractor candidate ids.
    pub fn other_classes(&self) -> &[usize] {
        &self.other
    }

    pub fn name(&self, slot: usize) -> &'static str {
        CLASSES_ALL[self.selected[slot]]
    }

    pub fn class_id(&self, slot: usize) -> usize {
        self.selected[slot]
    }

    /// Slot of a global class id within the subset, if selected.
    pub fn slot_of(&self, cls: usize) -> Option<usize> {
        self.selected.iter().position(|&c| c == cls)
    }

    pub fn symmetric(&self, slot: usize) -> bool {
        SYMMETRY_ALL[self.selected[slot]]
    }

    pub fn extent(&self, cls: usize) -> [f32; 3] {
        self.extents_all[cls]
    }

    /// Global class id for a packed segmentation color, 0 if background or
    /// unknown.
    pub fn class_of_packed(&self, packed: u32) -> usize {
        self.packed_to_class.get(&packed).copied().unwrap_or(0)
    }

    /// Renderer colors for all non-background classes, normalized to [0, 1].
    pub fn render_colors(&self) -> Vec<[f32; 3]> {
        CLASS_COLORS_ALL[1..]
            .iter()
            .map(|c| [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0])
            .collect()
    }

    /// Mesh and texture paths for all non-background classes, in renderer
    /// load order (renderer class index = global id - 1).
    pub fn model_paths(&self, root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let meshes = CLASSES_ALL[1..]
            .iter()
            .map(|name| root.join("models").join(name).join("textured_simple.obj"))
            .collect();
        let textures = CLASSES_ALL[1..]
            .iter()
            .map(|name| root.join("models").join(name).join("texture_map.png"))
            .collect();
        (meshes, textures)
    }
}

/// Load the per-class extents file: one `w h d` row per non-background class.
pub fn load_extents(root: &Path) -> DatasetResult<Vec<[f32; 3]>> {
    let path = root.join("extents.txt");
    let text = fs::read_to_string(&path).map_err(|e| DatasetError::Io {
        path: path.clone(),
        source: e,
    })?;
    let mut extents = vec![[0.0f32; 3]; NUM_CLASSES_ALL];
    let mut rows = 0usize;
    for (i, line) in text.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        if i + 1 >= NUM_CLASSES_ALL {
            return Err(DatasetError::Parse {
                path,
                msg: "too many extent rows".into(),
            });
        }
        extents[i + 1] = parse_vec3(line, &path)?;
        rows = i + 1;
    }
    if rows != NUM_CLASSES_ALL - 1 {
        return Err(DatasetError::Parse {
            path,
            msg: format!("expected {} extent rows, got {rows}", NUM_CLASSES_ALL - 1),
        });
    }
    Ok(extents)
}

fn parse_vec3(line: &str, path: &Path) -> DatasetResult<[f32; 3]> {
    let mut out = [0.0f32; 3];
    let mut parts = line.split_whitespace();
    for v in out.iter_mut() {
        *v = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DatasetError::Parse {
                path: path.to_path_buf(),
                msg: format!("bad 3-vector row: {line:?}"),
            })?;
    }
    Ok(out)
}

/// Per-class 3D surface point samples.
#[derive(Debug, Clone)]
pub struct ObjectPoints {
    /// Raw point sets per selected slot (slot 0 empty), full length.
    points: Vec<Vec<[f32; 3]>>,
    /// Point sets truncated to the minimum count across selected classes.
    points_all: Vec<Vec<[f32; 3]>>,
    /// Rescaled copy for network consumption; symmetric classes get a 4x
    /// larger factor to widen network sensitivity.
    point_blob: Vec<Vec<[f32; 3]>>,
    /// Large-clamp points (same truncation), for merged-clamp instances.
    points_clamp: Vec<[f32; 3]>,
}

impl ObjectPoints {
    pub fn load(root: &Path, registry: &ClassRegistry) -> DatasetResult<Self> {
        let n = registry.num_classes();
        let mut points: Vec<Vec<[f32; 3]>> = vec![Vec::new(); n];
        let mut min_count = usize::MAX;
        for slot in 1..n {
            let path = root
                .join("models")
                .join(registry.name(slot))
                .join("points.xyz");
            points[slot] = load_points_file(&path)?;
            min_count = min_count.min(points[slot].len());
        }

        let mut points_all: Vec<Vec<[f32; 3]>> = vec![Vec::new(); n];
        let mut point_blob: Vec<Vec<[f32; 3]>> = vec![Vec::new(); n];
        for slot in 1..n {
            points_all[slot] = points[slot][..min_count].to_vec();
            let extent = registry.extent(registry.class_id(slot));
            let max_extent = extent.iter().cloned().fold(0.0f32, f32::max);
            let mut weight = if max_extent > 0.0 {
                10.0 / max_extent
            } else {
                10.0
            };
            if weight < 10.0 {
                weight = 10.0;
            }
            if registry.symmetric(slot) {
                weight *= 4.0;
            }
            point_blob[slot] = points_all[slot]
                .iter()
                .map(|p| [p[0] * weight, p[1] * weight, p[2] * weight])
                .collect();
        }

        let clamp_path = root
            .join("models")
            .join(CLASSES_ALL[LARGE_CLAMP])
            .join("points.xyz");
        let mut points_clamp = load_points_file(&clamp_path)?;
        points_clamp.truncate(min_count);

        Ok(Self {
            points,
            points_all,
            point_blob,
            points_clamp,
        })
    }

    /// Construct directly from per-slot point sets (tests, in-memory use).
    pub fn from_parts(points: Vec<Vec<[f32; 3]>>, points_clamp: Vec<[f32; 3]>) -> Self {
        let min_count = points
            .iter()
            .skip(1)
            .map(Vec::len)
            .min()
            .unwrap_or(0);
        let points_all = points
            .iter()
            .map(|p| p.iter().take(min_count).cloned().collect())
            .collect();
        Self {
            points_all,
            point_blob: points.clone(),
            points,
            points_clamp,
        }
    }

    /// Full-resolution point set for a slot (used by the evaluator).
    pub fn raw(&self, slot: usize) -> &[[f32; 3]] {
        &self.points[slot]
    }

    /// Truncated equal-size point set for a slot.
    pub fn truncated(&self, slot: usize) -> &[[f32; 3]] {
        &self.points_all[slot]
    }

    pub fn blob(&self, slot: usize) -> &[[f32; 3]] {
        &self.point_blob[slot]
    }

    /// Points for box projection of one annotated instance. A large-clamp
    /// instance remapped to the merged category keeps its own geometry.
    pub fn for_instance(&self, slot: usize, was_large_clamp: bool) -> &[[f32; 3]] {
        if was_large_clamp {
            &self.points_clamp
        } else {
            &self.points_all[slot]
        }
    }
}

fn load_points_file(path: &Path) -> DatasetResult<Vec<[f32; 3]>> {
    let text = fs::read_to_string(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut out = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(parse_vec3(line, path)?);
    }
    if out.is_empty() {
        return Err(DatasetError::Parse {
            path: path.to_path_buf(),
            msg: "empty points file".into(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(classes: &[usize]) -> ClassRegistry {
        ClassRegistry::new(classes, vec![[0.1, 0.1, 0.1]; NUM_CLASSES_ALL]).unwrap()
    }

    #[test]
    fn background_must_lead_the_subset() {
        let err = ClassRegistry::new(&[1, 2], vec![[0.0; 3]; NUM_CLASSES_ALL]);
        assert!(err.is_err());
    }

    #[test]
    fn clamp_partner_excluded_from_distractors() {
        let registry = registry_with(&[0, EXTRA_LARGE_CLAMP]);
        assert!(!registry.other_classes().contains(&LARGE_CLAMP));
        assert!(!registry.other_classes().contains(&EXTRA_LARGE_CLAMP));
    }

    #[test]
    fn packed_colors_decode_to_class_ids() {
        let registry = registry_with(&[0, 1, 2]);
        for cls in 1..NUM_CLASSES_ALL {
            let packed = pack_color(CLASS_COLORS_ALL[cls]);
            assert_eq!(registry.class_of_packed(packed), cls);
        }
        assert_eq!(registry.class_of_packed(0), 0);
    }

    #[test]
    fn clamp_merge_is_an_explicit_remap() {
        assert_eq!(canonical_class_id(LARGE_CLAMP), EXTRA_LARGE_CLAMP);
        assert_eq!(canonical_class_id(3), 3);
    }
}
