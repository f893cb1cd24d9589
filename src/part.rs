use cgmath::{Deg, Quaternion, Rotation3, Vector3};
use rand::Rng;

use crate::config::MotionRanges;
use crate::matrix_operations::{IDENTITY_ROTATION, UP};

pub const CHILD_COUNT: usize = 5;

/// Branch length in local branch space before level scaling.
pub const BRANCH_LENGTH: f32 = 1.5;

/// Each generation is half the size of its parent.
pub const SCALE_FACTOR: f32 = 0.5;

/// Fixed direction and orientation template of one child slot. The template
/// maps the canonical up axis onto `direction`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlotParams {
    pub direction: Vector3<f32>,
    pub rotation: Quaternion<f32>,
}

/// Up, right, left, forward, back.
pub fn canonical_slots() -> [SlotParams; CHILD_COUNT] {
    [
        SlotParams {
            direction: UP,
            rotation: IDENTITY_ROTATION,
        },
        SlotParams {
            direction: Vector3::new(1.0, 0.0, 0.0),
            rotation: Quaternion::from_angle_z(Deg(-90.0)),
        },
        SlotParams {
            direction: Vector3::new(-1.0, 0.0, 0.0),
            rotation: Quaternion::from_angle_z(Deg(90.0)),
        },
        SlotParams {
            direction: Vector3::new(0.0, 0.0, 1.0),
            rotation: Quaternion::from_angle_x(Deg(90.0)),
        },
        SlotParams {
            direction: Vector3::new(0.0, 0.0, -1.0),
            rotation: Quaternion::from_angle_x(Deg(-90.0)),
        },
    ]
}

#[inline]
pub const fn parent_index(index: usize) -> usize {
    index / CHILD_COUNT
}

#[inline]
pub const fn child_slot(index: usize) -> usize {
    index % CHILD_COUNT
}

/// `5^level`, or `None` if it does not fit in `usize`.
pub fn level_len(level: usize) -> Option<usize> {
    u32::try_from(level)
        .ok()
        .and_then(|exp| CHILD_COUNT.checked_pow(exp))
}

/// `(5^depth - 1) / 4`
pub fn total_part_count(depth: usize) -> Option<usize> {
    level_len(depth).map(|n| (n - 1) / (CHILD_COUNT - 1))
}

/// One node of the tree. `direction`, `rotation`, `spin_velocity` and
/// `max_sag_angle` are fixed at creation; the world transform is rederived
/// every frame from the parent and the accumulated `spin_angle`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Part {
    pub direction: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub world_position: Vector3<f32>,
    pub world_rotation: Quaternion<f32>,
    pub spin_angle: f32,
    /// Radians per second.
    pub spin_velocity: f32,
    /// Radians.
    pub max_sag_angle: f32,
}

impl Part {
    pub fn new(slot: &SlotParams, spin_velocity: f32, max_sag_angle: f32) -> Self {
        Self {
            direction: slot.direction,
            rotation: slot.rotation,
            world_position: Vector3::new(0.0, 0.0, 0.0),
            world_rotation: IDENTITY_ROTATION,
            spin_angle: 0.0,
            spin_velocity,
            max_sag_angle,
        }
    }

    pub fn random<R: Rng + ?Sized>(slot: &SlotParams, motion: &MotionRanges, rng: &mut R) -> Self {
        let sign = if rng.gen::<f32>() < motion.reverse_spin_chance {
            -1.0
        } else {
            1.0
        };
        let spin_velocity = sign * motion.spin_speed.lerp_radians(rng.gen());
        let max_sag_angle = motion.max_sag_angle.lerp_radians(rng.gen());
        Self::new(slot, spin_velocity, max_sag_angle)
    }
}
