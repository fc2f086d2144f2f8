//! Conversion between the engine's 4x4 column-major matrices and the
//! 3x4 row-major affine transforms stored in instance records.

use strata_graphics::Transform;

/// Drop the projective row of an affine matrix and lay it out row-major.
pub fn encode(matrix: &glam::Mat4) -> Transform {
    let col_matrix = mint::ColumnMatrix3x4 {
        x: matrix.x_axis.truncate().into(),
        y: matrix.y_axis.truncate().into(),
        z: matrix.z_axis.truncate().into(),
        w: matrix.w_axis.truncate().into(),
    };
    mint::RowMatrix3x4::from(col_matrix)
}

/// Restore the full matrix, with `(0, 0, 0, 1)` as the bottom row.
pub fn decode(transform: &Transform) -> glam::Mat4 {
    glam::Mat4 {
        x_axis: transform.x.into(),
        y_axis: transform.y.into(),
        z_axis: transform.z.into(),
        w_axis: glam::Vec4::W,
    }
    .transpose()
}

/// Left-multiply a stored transform by `delta`.
pub fn compose(delta: &glam::Mat4, transform: &Transform) -> Transform {
    encode(&(*delta * decode(transform)))
}
