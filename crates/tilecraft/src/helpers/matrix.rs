use cgmath::{Matrix4, SquareMatrix};

/// Builds a matrix from 16 values given row by row.
pub fn matrix_from_row_major(rows: &[f64; 16]) -> Matrix4<f64> {
    // cgmath's constructor takes columns
    Matrix4::new(
        rows[0], rows[4], rows[8], rows[12], // col 0
        rows[1], rows[5], rows[9], rows[13], // col 1
        rows[2], rows[6], rows[10], rows[14], // col 2
        rows[3], rows[7], rows[11], rows[15], // col 3
    )
}

/// Flattens a matrix column by column, the order tileset `transform` arrays use.
pub fn matrix_to_column_major(mat: &Matrix4<f64>) -> [f64; 16] {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = mat[col][row];
        }
    }
    out
}

pub fn is_identity(mat: &Matrix4<f64>) -> bool {
    let id = Matrix4::<f64>::identity();
    (0..4).all(|c| (0..4).all(|r| (mat[c][r] - id[c][r]).abs() < 1e-12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_translation_lands_in_last_column() {
        let rows = [
            1.0, 0.0, 0.0, 10.0, //
            0.0, 1.0, 0.0, 20.0, //
            0.0, 0.0, 1.0, 30.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let m = matrix_from_row_major(&rows);
        assert_eq!(m.w.x, 10.0);
        assert_eq!(m.w.y, 20.0);
        assert_eq!(m.w.z, 30.0);

        let cols = matrix_to_column_major(&m);
        assert_eq!(&cols[12..15], &[10.0, 20.0, 30.0]);
        assert!(!is_identity(&m));
        assert!(is_identity(&Matrix4::identity()));
    }
}
