use cgmath::{Matrix3, Quaternion, Rad, Rotation3, Vector3};

pub const UP: Vector3<f32> = Vector3 { x: 0.0, y: 1.0, z: 0.0 };

pub const IDENTITY_ROTATION: Quaternion<f32> = Quaternion {
    s: 1.0,
    v: Vector3 { x: 0.0, y: 0.0, z: 0.0 },
};

pub fn rotate_around_up(angle: f32) -> Quaternion<f32> {
    Quaternion::from_angle_y(Rad(angle))
}

/// `axis` must already be normalized.
pub fn axis_angle(axis: Vector3<f32>, angle: f32) -> Quaternion<f32> {
    Quaternion::from_axis_angle(axis, Rad(angle))
}

pub fn scaled_rotation(rotation: Quaternion<f32>, scale: f32) -> Matrix3<f32> {
    Matrix3::from(rotation) * scale
}

/// Row-major 3x4: `[r0 r1 r2 t]` per row. cgmath stores columns, so row `i`
/// gathers element `i` of every column.
pub fn affine_rows_3x4(linear: Matrix3<f32>, translation: Vector3<f32>) -> [[f32; 4]; 3] {
    [
        [linear.x.x, linear.y.x, linear.z.x, translation.x],
        [linear.x.y, linear.y.y, linear.z.y, translation.y],
        [linear.x.z, linear.y.z, linear.z.z, translation.z],
    ]
}

pub fn trs_rows_4x4(linear: Matrix3<f32>, translation: Vector3<f32>) -> [[f32; 4]; 4] {
    let [r0, r1, r2] = affine_rows_3x4(linear, translation);
    [r0, r1, r2, [0.0, 0.0, 0.0, 1.0]]
}

pub fn transform_point_rows(rows: &[[f32; 4]], point: Vector3<f32>) -> Vector3<f32> {
    let row = |r: &[f32; 4]| r[0] * point.x + r[1] * point.y + r[2] * point.z + r[3];
    Vector3::new(row(&rows[0]), row(&rows[1]), row(&rows[2]))
}

pub fn linear_from_rows(rows: &[[f32; 4]]) -> Matrix3<f32> {
    Matrix3::new(
        rows[0][0], rows[1][0], rows[2][0],
        rows[0][1], rows[1][1], rows[2][1],
        rows[0][2], rows[1][2], rows[2][2],
    )
}
