/// Dense linear algebra used by the envelope network: Gauss-Jordan inversion and
/// matrix-vector products over nalgebra storage.
use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
#[error("Singular matrix: no non-zero pivot found in column {column} of a {size}x{size} matrix")]
pub struct SingularMatrixError {
    column: usize,
    size: usize,
}

/// Invert a square matrix in place using Gauss-Jordan elimination.
///
/// For each pivot column the row holding the entry of largest magnitude (at or below the
/// diagonal) is swapped into the pivot position. If that best candidate is exactly zero the
/// matrix is singular and an error is returned; the matrix contents are unspecified in that case.
pub(crate) fn invert(matrix: &mut DMatrix<f64>) -> Result<(), SingularMatrixError> {
    let n = matrix.nrows();
    assert_eq!(n, matrix.ncols(), "only square matrices can be inverted");

    let mut inverse: DMatrix<f64> = DMatrix::identity(n, n);

    for col in 0..n {
        let (pivot_row, pivot_magnitude) = (col..n)
            .map(|row| (row, matrix[(row, col)].abs()))
            .fold((col, -1.0), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });

        if pivot_magnitude == 0.0 {
            return Err(SingularMatrixError { column: col, size: n });
        }

        if pivot_row != col {
            matrix.swap_rows(pivot_row, col);
            inverse.swap_rows(pivot_row, col);
        }

        let pivot = matrix[(col, col)];
        for j in 0..n {
            matrix[(col, j)] /= pivot;
            inverse[(col, j)] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = matrix[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                matrix[(row, j)] -= factor * matrix[(col, j)];
                inverse[(row, j)] -= factor * inverse[(col, j)];
            }
        }
    }

    matrix.copy_from(&inverse);

    Ok(())
}

/// Plain dense product of a matrix with a vector.
pub(crate) fn multiply_vector(matrix: &DMatrix<f64>, vector: &[f64]) -> Vec<f64> {
    assert_eq!(
        matrix.ncols(),
        vector.len(),
        "matrix column count must match vector length"
    );

    (0..matrix.nrows())
        .map(|row| {
            vector
                .iter()
                .enumerate()
                .map(|(col, value)| matrix[(row, col)] * value)
                .sum::<f64>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn well_conditioned() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            4,
            4,
            &[
                4.0, -1.0, 0.0, 0.5, //
                -1.0, 5.0, -2.0, 0.0, //
                0.0, -2.0, 6.0, -1.5, //
                0.3, 0.0, -1.5, 3.0,
            ],
        )
    }

    #[rstest]
    fn should_invert_to_identity_product(well_conditioned: DMatrix<f64>) {
        let mut inverse = well_conditioned.clone();
        invert(&mut inverse).unwrap();

        let product = &well_conditioned * &inverse;
        let identity: DMatrix<f64> = DMatrix::identity(4, 4);
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(product[(i, j)], identity[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[rstest]
    fn should_recover_original_when_inverted_twice(well_conditioned: DMatrix<f64>) {
        let mut twice = well_conditioned.clone();
        invert(&mut twice).unwrap();
        invert(&mut twice).unwrap();

        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(twice[(i, j)], well_conditioned[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[rstest]
    fn should_pivot_when_leading_entry_is_zero() {
        let mut matrix = DMatrix::from_row_slice(2, 2, &[0.0, 2.0, 4.0, 1.0]);
        invert(&mut matrix).unwrap();

        assert_relative_eq!(matrix[(0, 0)], -0.125);
        assert_relative_eq!(matrix[(0, 1)], 0.25);
        assert_relative_eq!(matrix[(1, 0)], 0.5);
        assert_relative_eq!(matrix[(1, 1)], 0.0);
    }

    #[rstest]
    fn should_fail_on_zero_pivot_column() {
        let mut matrix = DMatrix::from_row_slice(
            3,
            3,
            &[
                1.0, 0.0, 2.0, //
                3.0, 0.0, 1.0, //
                2.0, 0.0, 5.0,
            ],
        );

        assert_eq!(
            invert(&mut matrix),
            Err(SingularMatrixError { column: 1, size: 3 })
        );
    }

    #[rstest]
    fn should_multiply_matrix_by_vector() {
        let matrix = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, -1.0, 0.5, 0.0]);

        assert_eq!(multiply_vector(&matrix, &[1.0, 1.0, 2.0]), vec![9.0, -0.5]);
    }
}
