//! Column-major 4x4 matrices, laid out the way WGSL `mat4x4<f32>` expects.

/// A column-major 4x4 matrix.
pub type Mat4 = [f32; 16];

/// The identity matrix.
pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Element at `row`, `col`.
#[must_use]
pub const fn at(m: &Mat4, row: usize, col: usize) -> f32 {
    m[col * 4 + row]
}

/// `a * b`.
#[must_use]
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| at(a, row, k) * at(b, k, col)).sum();
        }
    }
    out
}

/// `m * v`.
#[must_use]
pub fn transform(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = (0..4).map(|k| at(m, row, k) * v[k]).sum();
    }
    out
}

/// Scale along x, y and z.
#[must_use]
pub const fn scale(x: f32, y: f32, z: f32) -> Mat4 {
    [
        x, 0.0, 0.0, 0.0, //
        0.0, y, 0.0, 0.0, //
        0.0, 0.0, z, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Translate by x, y and z.
#[must_use]
pub const fn translate(x: f32, y: f32, z: f32) -> Mat4 {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        x, y, z, 1.0,
    ]
}

/// Inverse of `m`, or `None` if it is singular.
#[must_use]
pub fn inverse(m: &Mat4) -> Option<Mat4> {
    // Gauss-Jordan on [m | I], row-major working copy.
    let mut a = [[0.0f64; 8]; 4];
    for (row, line) in a.iter_mut().enumerate() {
        for col in 0..4 {
            line[col] = f64::from(at(m, row, col));
        }
        line[4 + row] = 1.0;
    }

    for col in 0..4 {
        let pivot = (col..4).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);

        let p = a[col][col];
        for value in &mut a[col] {
            *value /= p;
        }
        for row in 0..4 {
            if row != col {
                let factor = a[row][col];
                if factor != 0.0 {
                    let pivot_row = a[col];
                    for (value, pivot_value) in a[row].iter_mut().zip(pivot_row) {
                        *value -= factor * pivot_value;
                    }
                }
            }
        }
    }

    let mut out = [0.0; 16];
    for (row, line) in a.iter().enumerate() {
        for col in 0..4 {
            #[allow(clippy::cast_possible_truncation)]
            let value = line[4 + col] as f32;
            out[col * 4 + row] = value;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &Mat4, b: &Mat4) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn translation_moves_points() {
        let m = translate(1.0, 2.0, 0.0);
        assert_eq!(transform(&m, [0.0, 0.0, 0.0, 1.0]), [1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn multiply_applies_right_operand_first() {
        let m = multiply(&translate(1.0, 0.0, 0.0), &scale(2.0, 2.0, 1.0));
        assert_eq!(transform(&m, [1.0, 1.0, 0.0, 1.0]), [3.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn inverse_undoes_transform() {
        let m = multiply(&translate(0.5, -0.25, 0.0), &scale(2.0, 4.0, 1.0));
        let inv = inverse(&m).unwrap();
        assert_close(&multiply(&m, &inv), &IDENTITY);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        assert!(inverse(&scale(0.0, 1.0, 1.0)).is_none());
    }
}
