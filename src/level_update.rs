use cgmath::{InnerSpace, Quaternion, Vector3};
use rayon::prelude::*;

use crate::error::{FractalError, Result};
use crate::matrix_operations::{axis_angle, rotate_around_up, IDENTITY_ROTATION, UP};
use crate::packing::PackedMatrix;
use crate::part::{parent_index, Part, BRANCH_LENGTH, CHILD_COUNT, SCALE_FACTOR};

/// Below this the sag axis is treated as zero and no sag is applied.
const SAG_AXIS_EPSILON: f32 = 1e-6;

/// Transform of the object owning the tree.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RootTransform {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: f32,
}

impl Default for RootTransform {
    fn default() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: IDENTITY_ROTATION,
            scale: 1.0,
        }
    }
}

/// `scale * 0.5^level`
pub fn level_scale(root_scale: f32, level: usize) -> f32 {
    (0..level).fold(root_scale, |scale, _| scale * SCALE_FACTOR)
}

/// Parent rotation tilted toward the ground. The tilt grows with how far the
/// branch's unsagged up axis (`parent_rotation * template * UP`) leans away
/// from world up; a branch already pointing straight up keeps
/// `parent_rotation` unchanged.
pub fn sagged_base_rotation(
    parent_rotation: Quaternion<f32>,
    template: Quaternion<f32>,
    max_sag_angle: f32,
) -> Quaternion<f32> {
    let up_axis = parent_rotation * (template * UP);
    let sag_axis = UP.cross(up_axis);
    let sag_magnitude = sag_axis.magnitude();
    if sag_magnitude > SAG_AXIS_EPSILON && max_sag_angle != 0.0 {
        axis_angle(sag_axis / sag_magnitude, max_sag_angle * sag_magnitude) * parent_rotation
    } else {
        parent_rotation
    }
}

/// `dt` must already be clamped to be non-negative.
pub fn update_root<M: PackedMatrix>(root: &mut Part, transform: &RootTransform, dt: f32) -> M {
    root.spin_angle += root.spin_velocity * dt;
    root.world_rotation =
        transform.rotation * (root.rotation * rotate_around_up(root.spin_angle));
    root.world_position = transform.position;
    M::pack(root.world_rotation, transform.scale, root.world_position)
}

/// Advances one part from its parent's already-updated world transform.
pub fn update_part<M: PackedMatrix>(parent: &Part, part: &mut Part, scale: f32, dt: f32) -> M {
    part.spin_angle += part.spin_velocity * dt;
    let base = sagged_base_rotation(parent.world_rotation, part.rotation, part.max_sag_angle);
    part.world_rotation = base * (part.rotation * rotate_around_up(part.spin_angle));
    part.world_position =
        parent.world_position + part.world_rotation * Vector3::new(0.0, BRANCH_LENGTH * scale, 0.0);
    M::pack(part.world_rotation, scale, part.world_position)
}

fn check_level<M>(parents: &[Part], parts: &[Part], matrices: &[M]) -> Result<()> {
    if parents.len() * CHILD_COUNT != parts.len() || parts.len() != matrices.len() {
        return Err(FractalError::LevelMismatch {
            parents: parents.len(),
            parts: parts.len(),
            matrices: matrices.len(),
        });
    }
    Ok(())
}

/// Updates a whole level in parallel, one sibling group per task. `parents`
/// is the fully updated previous level.
pub fn update_level<M: PackedMatrix>(
    parents: &[Part],
    parts: &mut [Part],
    matrices: &mut [M],
    scale: f32,
    dt: f32,
) -> Result<()> {
    check_level(parents, parts, matrices)?;
    parts
        .par_chunks_mut(CHILD_COUNT)
        .zip(matrices.par_chunks_mut(CHILD_COUNT))
        .zip(parents.par_iter())
        .for_each(|((siblings, slots), parent)| {
            for (part, matrix) in siblings.iter_mut().zip(slots.iter_mut()) {
                *matrix = update_part(parent, part, scale, dt);
            }
        });
    Ok(())
}

pub fn update_level_serial<M: PackedMatrix>(
    parents: &[Part],
    parts: &mut [Part],
    matrices: &mut [M],
    scale: f32,
    dt: f32,
) -> Result<()> {
    check_level(parents, parts, matrices)?;
    for (i, (part, matrix)) in parts.iter_mut().zip(matrices.iter_mut()).enumerate() {
        *matrix = update_part(&parents[parent_index(i)], part, scale, dt);
    }
    Ok(())
}

/// Runs the root pass and then every level in order. Level `L` only starts
/// once level `L - 1` is complete. Negative `dt` is treated as zero.
pub fn update_tree<M: PackedMatrix>(
    levels: &mut [Vec<Part>],
    matrices: &mut [Vec<M>],
    root: &RootTransform,
    dt: f32,
) -> Result<()> {
    if levels.len() != matrices.len() {
        return Err(FractalError::DepthMismatch {
            levels: levels.len(),
            buffers: matrices.len(),
        });
    }
    let dt = dt.max(0.0);
    let (Some(root_level), Some(root_matrices)) = (levels.first_mut(), matrices.first_mut()) else {
        return Ok(());
    };
    let (parts, buffers) = (root_level.len(), root_matrices.len());
    let ([root_part], [root_matrix]) = (root_level.as_mut_slice(), root_matrices.as_mut_slice())
    else {
        return Err(FractalError::LevelMismatch {
            parents: 0,
            parts,
            matrices: buffers,
        });
    };
    *root_matrix = update_root(root_part, root, dt);

    let mut scale = root.scale;
    for level_index in 1..levels.len() {
        scale *= SCALE_FACTOR;
        let (done, rest) = levels.split_at_mut(level_index);
        update_level(
            &done[level_index - 1],
            &mut rest[0],
            &mut matrices[level_index],
            scale,
            dt,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Rotation3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::config::{DegreeRange, MotionRanges};
    use crate::hierarchy::Tree;
    use crate::packing::{Affine3x4, Affine4x4};
    use crate::part::{canonical_slots, SlotParams};

    fn slot_up() -> SlotParams {
        canonical_slots()[0]
    }

    fn tree(depth: usize, seed: u64) -> Tree {
        let mut rng = StdRng::seed_from_u64(seed);
        Tree::build(depth, &canonical_slots(), &MotionRanges::default(), &mut rng).unwrap()
    }

    fn matrices<M: PackedMatrix>(tree: &Tree) -> Vec<Vec<M>> {
        (0..tree.depth())
            .map(|l| vec![M::zeroed(); tree.level(l).unwrap().len()])
            .collect()
    }

    fn tilted_root() -> RootTransform {
        RootTransform {
            position: Vector3::new(2.0, -1.0, 0.5),
            rotation: Quaternion::from_angle_x(Deg(25.0)) * Quaternion::from_angle_y(Deg(40.0)),
            scale: 1.5,
        }
    }

    #[test]
    fn test_sag_short_circuits_on_vertical_branch() {
        let parent = IDENTITY_ROTATION;
        let base = sagged_base_rotation(parent, IDENTITY_ROTATION, 0.4);
        assert_eq!(base, parent);
        assert!(!base.s.is_nan() && !base.v.x.is_nan());

        let parent = Quaternion::from_angle_y(Deg(70.0));
        assert_eq!(sagged_base_rotation(parent, IDENTITY_ROTATION, 0.4), parent);
    }

    #[test]
    fn test_zero_max_sag_keeps_parent() {
        let parent = Quaternion::from_angle_z(Deg(30.0));
        let template = Quaternion::from_angle_z(Deg(-90.0));
        assert_eq!(sagged_base_rotation(parent, template, 0.0), parent);
    }

    #[test]
    fn test_horizontal_branch_sags_full_angle_downward() {
        let max_sag = 20f32.to_radians();
        let template = Quaternion::from_angle_z(Deg(-90.0));
        let direction = template * UP;
        let base = sagged_base_rotation(IDENTITY_ROTATION, template, max_sag);
        let bent = base * direction;
        let angle = bent.angle(direction).0;
        assert!((angle - max_sag).abs() < 1e-5, "angle {angle}");
        assert!(bent.y < 0.0);
    }

    #[test]
    fn test_sag_scales_with_lean() {
        let max_sag = 20f32.to_radians();
        let lean = 30f32.to_radians();
        let template = Quaternion::from_angle_z(Deg(-30.0));
        let direction = template * UP;
        assert!((direction - Vector3::new(lean.sin(), lean.cos(), 0.0)).magnitude() < 1e-6);
        let base = sagged_base_rotation(IDENTITY_ROTATION, template, max_sag);
        let angle = (base * direction).angle(direction).0;
        assert!((angle - max_sag * lean.sin()).abs() < 1e-5, "angle {angle}");
    }

    #[test]
    fn test_sag_follows_template_over_direction() {
        let max_sag = 20f32.to_radians();
        let slot = SlotParams {
            direction: UP,
            rotation: Quaternion::from_angle_z(Deg(-90.0)),
        };
        let parent = Part::new(&slot_up(), 0.0, 0.0);
        let mut part = Part::new(&slot, 0.0, max_sag);
        update_part::<Affine3x4>(&parent, &mut part, 1.0, 0.0);

        let branch_up = part.world_rotation * UP;
        assert!((branch_up.y + max_sag.sin()).abs() < 1e-5, "branch up {branch_up:?}");
        assert!((branch_up.x - max_sag.cos()).abs() < 1e-5, "branch up {branch_up:?}");
    }

    #[test]
    fn test_level_scale_halves() {
        assert_eq!(level_scale(1.0, 0), 1.0);
        assert_eq!(level_scale(3.0, 1), 1.5);
        assert_eq!(level_scale(3.0, 4), 3.0 * 0.5f32.powi(4));
    }

    #[test]
    fn test_child_offset_length_and_direction() {
        let mut tree = tree(4, 11);
        let mut mats = matrices::<Affine3x4>(&tree);
        let root = tilted_root();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.3).unwrap();

        for level in 1..4 {
            let scale = level_scale(root.scale, level);
            let parents = tree.level(level - 1).unwrap();
            for (i, part) in tree.level(level).unwrap().iter().enumerate() {
                let parent = &parents[parent_index(i)];
                let offset = part.world_position - parent.world_position;
                let expected = part.world_rotation * UP * (BRANCH_LENGTH * scale);
                assert!((offset.magnitude() - BRANCH_LENGTH * scale).abs() < 1e-5);
                assert!((offset - expected).magnitude() < 1e-5);
            }
        }
    }

    #[test]
    fn test_matrix_scale_per_level() {
        let mut tree = tree(3, 2);
        let mut mats = matrices::<Affine4x4>(&tree);
        let root = tilted_root();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.1).unwrap();
        for (level, level_mats) in mats.iter().enumerate() {
            let scale = level_scale(root.scale, level);
            for (m, part) in level_mats.iter().zip(tree.level(level).unwrap()) {
                let column = m.linear().x;
                assert!((column.magnitude() - scale).abs() < 1e-5);
                assert_eq!(m.translation(), part.world_position);
            }
        }
    }

    #[test]
    fn test_reverse_order_is_bit_identical() {
        let mut tree = tree(3, 5);
        let mut mats = matrices::<Affine3x4>(&tree);
        update_tree(tree.levels_mut().unwrap(), &mut mats, &tilted_root(), 0.2).unwrap();

        let parents = tree.level(1).unwrap().to_vec();
        let start = tree.level(2).unwrap().to_vec();
        let scale = level_scale(tilted_root().scale, 2);

        let mut forward = start.clone();
        let mut forward_mats = vec![Affine3x4::default(); forward.len()];
        update_level(&parents, &mut forward, &mut forward_mats, scale, 0.05).unwrap();

        let mut reverse = start.clone();
        let mut reverse_mats = vec![Affine3x4::default(); reverse.len()];
        for i in (0..reverse.len()).rev() {
            reverse_mats[i] = update_part(&parents[parent_index(i)], &mut reverse[i], scale, 0.05);
        }

        let mut serial = start;
        let mut serial_mats = vec![Affine3x4::default(); serial.len()];
        update_level_serial(&parents, &mut serial, &mut serial_mats, scale, 0.05).unwrap();

        assert_eq!(forward, reverse);
        assert_eq!(forward_mats, reverse_mats);
        assert_eq!(forward, serial);
        assert_eq!(forward_mats, serial_mats);
    }

    #[test]
    fn test_zero_dt_is_idempotent() {
        let mut tree = tree(4, 9);
        let mut mats = matrices::<Affine3x4>(&tree);
        let root = tilted_root();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.5).unwrap();

        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.0).unwrap();
        let first_parts = tree.clone();
        let first_mats = mats.clone();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.0).unwrap();

        assert_eq!(mats, first_mats);
        for level in 0..4 {
            assert_eq!(tree.level(level).unwrap(), first_parts.level(level).unwrap());
        }
    }

    #[test]
    fn test_negative_dt_does_not_rewind_spin() {
        let mut tree = tree(2, 4);
        let mut mats = matrices::<Affine3x4>(&tree);
        update_tree(tree.levels_mut().unwrap(), &mut mats, &RootTransform::default(), 1.0).unwrap();
        let before: Vec<f32> = tree.level(1).unwrap().iter().map(|p| p.spin_angle).collect();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &RootTransform::default(), -1.0).unwrap();
        let after: Vec<f32> = tree.level(1).unwrap().iter().map(|p| p.spin_angle).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_spin_accumulates_velocity() {
        let mut tree = tree(2, 8);
        let mut mats = matrices::<Affine3x4>(&tree);
        for _ in 0..4 {
            update_tree(tree.levels_mut().unwrap(), &mut mats, &RootTransform::default(), 0.25).unwrap();
        }
        for part in tree.level(1).unwrap() {
            assert!((part.spin_angle - part.spin_velocity).abs() < 1e-5);
        }
    }

    #[test]
    fn test_single_level_runs_root_only() {
        let mut tree = tree(1, 0);
        let mut mats = matrices::<Affine3x4>(&tree);
        let root = tilted_root();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.1).unwrap();
        assert_eq!(mats.len(), 1);
        assert_eq!(tree.root().unwrap().world_position, root.position);
        assert_eq!(mats[0][0].translation(), root.position);
    }

    #[test]
    fn test_simple_variant_follows_slot_directions() {
        let motion = MotionRanges {
            max_sag_angle: DegreeRange::fixed(0.0),
            spin_speed: DegreeRange::fixed(22.5),
            reverse_spin_chance: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let mut tree = Tree::build(2, &canonical_slots(), &motion, &mut rng).unwrap();
        let mut mats = matrices::<Affine3x4>(&tree);
        let root = tilted_root();
        update_tree(tree.levels_mut().unwrap(), &mut mats, &root, 0.7).unwrap();

        let parent = *tree.root().unwrap();
        for (i, part) in tree.level(1).unwrap().iter().enumerate() {
            let expected = parent.world_position
                + parent.world_rotation * canonical_slots()[i].direction * (BRANCH_LENGTH * 0.75);
            assert!((part.world_position - expected).magnitude() < 1e-5);
        }
    }

    #[test]
    fn test_mismatched_buffers_are_rejected() {
        let mut tree = tree(3, 1);
        let mut mats = matrices::<Affine3x4>(&tree);
        mats[2].pop();
        let result = update_tree(tree.levels_mut().unwrap(), &mut mats, &RootTransform::default(), 0.1);
        assert!(matches!(
            result,
            Err(FractalError::LevelMismatch { parents: 5, parts: 25, matrices: 24 })
        ));

        let mut mats = matrices::<Affine3x4>(&tree);
        mats.pop();
        let result = update_tree(tree.levels_mut().unwrap(), &mut mats, &RootTransform::default(), 0.1);
        assert!(matches!(result, Err(FractalError::DepthMismatch { levels: 3, buffers: 2 })));

        let parents = tree.level(0).unwrap().to_vec();
        let mut parts = tree.level(1).unwrap().to_vec();
        let mut short = vec![Affine3x4::default(); 4];
        assert!(update_level(&parents, &mut parts, &mut short, 0.5, 0.1).is_err());
        assert!(update_level_serial(&parents, &mut parts, &mut short, 0.5, 0.1).is_err());
    }
}
