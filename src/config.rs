use crate::error::{FractalError, Result};

pub const MAX_DEPTH: usize = 8;
pub const DEFAULT_DEPTH: usize = 4;

/// Spin speed of the simple variant, 0.125π rad/s.
pub const SIMPLE_SPIN_DEGREES_PER_SECOND: f32 = 22.5;

/// Linear RGBA.
pub type Color = [f32; 4];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u32);

/// Color ramp over `[0, 1]`, linearly interpolated between keys and clamped
/// to the end keys outside them.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    keys: Vec<(f32, Color)>,
}

impl Gradient {
    pub fn new(mut keys: Vec<(f32, Color)>) -> Self {
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { keys }
    }

    pub fn two(start: Color, end: Color) -> Self {
        Self::new(vec![(0.0, start), (1.0, end)])
    }

    pub fn solid(color: Color) -> Self {
        Self::new(vec![(0.0, color)])
    }

    pub fn keys(&self) -> &[(f32, Color)] {
        &self.keys
    }

    pub fn evaluate(&self, t: f32) -> Color {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }
        for pair in self.keys.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let span = t1 - t0;
                let f = if span > 0.0 { (t - t0) / span } else { 1.0 };
                return lerp_color(c0, c1, f);
            }
        }
        last.1
    }
}

pub fn lerp_color(a: Color, b: Color, t: f32) -> Color {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DegreeRange {
    pub min: f32,
    pub max: f32,
}

impl DegreeRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub const fn fixed(value: f32) -> Self {
        Self { min: value, max: value }
    }

    /// Radians at `t` in `[0, 1]` between `min` and `max`.
    pub fn lerp_radians(&self, t: f32) -> f32 {
        (self.min + (self.max - self.min) * t).to_radians()
    }

    fn validate(&self, name: &'static str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(FractalError::InvalidRange {
                name,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FractalConfig {
    pub depth: usize,
    pub branch_mesh: MeshHandle,
    pub leaf_mesh: MeshHandle,
    pub material: MaterialHandle,
    pub gradient_a: Gradient,
    pub gradient_b: Gradient,
    pub leaf_color_a: Color,
    pub leaf_color_b: Color,
    pub max_sag_angle: DegreeRange,
    pub spin_speed: DegreeRange,
    pub reverse_spin_chance: f32,
}

impl Default for FractalConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            branch_mesh: MeshHandle(0),
            leaf_mesh: MeshHandle(1),
            material: MaterialHandle(0),
            gradient_a: Gradient::two([0.36, 0.25, 0.14, 1.0], [0.55, 0.78, 0.24, 1.0]),
            gradient_b: Gradient::two([0.28, 0.18, 0.10, 1.0], [0.33, 0.62, 0.18, 1.0]),
            leaf_color_a: [0.38, 0.82, 0.21, 1.0],
            leaf_color_b: [0.11, 0.52, 0.07, 1.0],
            max_sag_angle: DegreeRange::new(15.0, 25.0),
            spin_speed: DegreeRange::new(20.0, 25.0),
            reverse_spin_chance: 0.25,
        }
    }
}

impl FractalConfig {
    /// No sag, every part spinning at the same constant rate.
    pub fn simple(depth: usize) -> Self {
        Self {
            depth,
            max_sag_angle: DegreeRange::fixed(0.0),
            spin_speed: DegreeRange::fixed(SIMPLE_SPIN_DEGREES_PER_SECOND),
            reverse_spin_chance: 0.0,
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(FractalError::InvalidDepth {
                depth: self.depth,
                max: MAX_DEPTH,
            });
        }
        self.max_sag_angle.validate("max sag angle")?;
        self.spin_speed.validate("spin speed")?;
        if !(0.0..=1.0).contains(&self.reverse_spin_chance) {
            return Err(FractalError::InvalidProbability {
                name: "reverse spin chance",
                value: self.reverse_spin_chance,
            });
        }
        Ok(())
    }

    /// True when moving from `self` to `other` requires rebuilding every level.
    /// Mesh and material handles are read at draw time and can change in place.
    pub fn structurally_differs(&self, other: &Self) -> bool {
        self.depth != other.depth
            || self.gradient_a != other.gradient_a
            || self.gradient_b != other.gradient_b
            || self.leaf_color_a != other.leaf_color_a
            || self.leaf_color_b != other.leaf_color_b
            || self.max_sag_angle != other.max_sag_angle
            || self.spin_speed != other.spin_speed
            || self.reverse_spin_chance != other.reverse_spin_chance
    }

    pub fn motion(&self) -> MotionRanges {
        MotionRanges {
            max_sag_angle: self.max_sag_angle,
            spin_speed: self.spin_speed,
            reverse_spin_chance: self.reverse_spin_chance,
        }
    }
}

/// Ranges the per-part random motion values are drawn from at build time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MotionRanges {
    pub max_sag_angle: DegreeRange,
    pub spin_speed: DegreeRange,
    pub reverse_spin_chance: f32,
}

impl Default for MotionRanges {
    fn default() -> Self {
        FractalConfig::default().motion()
    }
}
