//! Dense linear algebra kernels.
//!
//! Pivoted LU with separate factor/solve steps so one factorization can be
//! reused across many right-hand sides, in both the original and the
//! transposed system. Matrices are stored as `Vec<Vec<F>>` rows.

use crate::float::Float;

/// Compute the L2 norm of a vector.
pub fn norm<F: Float>(v: &[F]) -> F {
    let mut s = F::zero();
    for &x in v {
        s = s + x * x;
    }
    s.sqrt()
}

/// Compute the dot product of two vectors.
pub fn dot<F: Float>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    let mut s = F::zero();
    for i in 0..a.len() {
        s = s + a[i] * b[i];
    }
    s
}

/// Result of LU factorization with partial pivoting.
///
/// Stores the combined L/U factors in a single matrix (L below the diagonal
/// with an implicit unit diagonal, U on and above it) plus the row
/// permutation.
pub struct LuFactors<F> {
    lu: Vec<Vec<F>>,
    /// `perm[i]` is the original row index of factored row `i`.
    perm: Vec<usize>,
    n: usize,
}

impl<F> LuFactors<F> {
    pub fn dim(&self) -> usize {
        self.n
    }
}

/// Factorize an `n x n` matrix via LU decomposition with partial pivoting.
///
/// Returns `None` if the matrix is singular (zero or near-zero pivot).
// Explicit indexing is clearer for pivoted LU: row/col indices drive pivot
// search and elimination
#[allow(clippy::needless_range_loop)]
pub fn lu_factor<F: Float>(a: &[Vec<F>]) -> Option<LuFactors<F>> {
    let n = a.len();
    debug_assert!(a.iter().all(|row| row.len() == n));

    let mut lu: Vec<Vec<F>> = a.to_vec();
    let mut perm: Vec<usize> = (0..n).collect();

    let eps = F::from(1e-13).unwrap_or_else(F::epsilon);

    for col in 0..n {
        let mut max_val = lu[col][col].abs();
        let mut max_row = col;
        for row in (col + 1)..n {
            let v = lu[row][col].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }

        if max_val < eps {
            return None; // Singular
        }

        if max_row != col {
            lu.swap(col, max_row);
            perm.swap(col, max_row);
        }

        let pivot = lu[col][col];

        for row in (col + 1)..n {
            let factor = lu[row][col] / pivot;
            lu[row][col] = factor;
            for j in (col + 1)..n {
                let val = lu[col][j];
                lu[row][j] = lu[row][j] - factor * val;
            }
        }
    }

    Some(LuFactors { lu, perm, n })
}

/// Solve `A * x = b` using a pre-computed factorization.
#[allow(clippy::needless_range_loop)]
pub fn lu_back_solve<F: Float>(factors: &LuFactors<F>, b: &[F]) -> Vec<F> {
    let n = factors.n;
    debug_assert_eq!(b.len(), n);

    // Permute b, then L y = Pb (unit diagonal), then U x = y
    let mut y = vec![F::zero(); n];
    for i in 0..n {
        y[i] = b[factors.perm[i]];
    }

    for i in 1..n {
        for j in 0..i {
            let l_ij = factors.lu[i][j];
            let y_j = y[j];
            y[i] = y[i] - l_ij * y_j;
        }
    }

    let mut x = vec![F::zero(); n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum = sum - factors.lu[i][j] * x[j];
        }
        x[i] = sum / factors.lu[i][i];
    }

    x
}

/// Solve `A^T * x = b` using the factorization of `A`.
///
/// With `P A = L U` the transposed system factors as
/// `A^T x = b  <=>  U^T y = b,  L^T w = y,  x = P^T w`,
/// so the same factors serve both directions.
#[allow(clippy::needless_range_loop)]
pub fn lu_back_solve_transpose<F: Float>(factors: &LuFactors<F>, b: &[F]) -> Vec<F> {
    let n = factors.n;
    debug_assert_eq!(b.len(), n);

    // U^T y = b: U^T is lower triangular with diagonal u_ii
    let mut y = vec![F::zero(); n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum = sum - factors.lu[j][i] * y[j];
        }
        y[i] = sum / factors.lu[i][i];
    }

    // L^T w = y: L^T is upper triangular with unit diagonal
    let mut w = vec![F::zero(); n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum = sum - factors.lu[j][i] * w[j];
        }
        w[i] = sum;
    }

    // Undo the row permutation of A
    let mut x = vec![F::zero(); n];
    for i in 0..n {
        x[factors.perm[i]] = w[i];
    }

    x
}

/// Solve `A * x = b` via LU factorization with partial pivoting.
///
/// Returns `None` if the matrix is singular.
pub fn lu_solve<F: Float>(a: &[Vec<F>], b: &[F]) -> Option<Vec<F>> {
    let factors = lu_factor(a)?;
    Some(lu_back_solve(&factors, b))
}

/// Dense matrix-vector product `y = A x`.
pub fn matvec<F: Float>(a: &[Vec<F>], x: &[F], y: &mut [F]) {
    debug_assert_eq!(a.len(), y.len());
    for (i, row) in a.iter().enumerate() {
        debug_assert_eq!(row.len(), x.len());
        let mut sum = F::zero();
        for j in 0..x.len() {
            sum = sum + row[j] * x[j];
        }
        y[i] = sum;
    }
}

/// Dense transposed matrix-vector product `y = A^T x`.
pub fn matvec_transpose<F: Float>(a: &[Vec<F>], x: &[F], y: &mut [F]) {
    debug_assert_eq!(a.len(), x.len());
    for v in y.iter_mut() {
        *v = F::zero();
    }
    for (i, row) in a.iter().enumerate() {
        let xi = x[i];
        for j in 0..y.len() {
            y[j] = y[j] + row[j] * xi;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solve_2x2() {
        // [2 1] [x0]   [5]
        // [1 3] [x1] = [7]
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let b = vec![5.0, 7.0];
        let x = lu_solve(&a, &b).unwrap();
        assert!((x[0] - 1.6).abs() < 1e-12);
        assert!((x[1] - 1.8).abs() < 1e-12);
    }

    #[test]
    fn lu_solve_singular() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let b = vec![3.0, 6.0];
        assert!(lu_solve(&a, &b).is_none());
    }

    #[test]
    fn lu_solve_needs_pivoting() {
        let a = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let b = vec![3.0, 7.0];
        let x = lu_solve(&a, &b).unwrap();
        assert!((x[0] - 7.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn factor_reused_across_rhs() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let factors = lu_factor(&a).unwrap();
        for b in [vec![5.0, 7.0], vec![1.0, 0.0], vec![0.0, 1.0]] {
            let x = lu_back_solve(&factors, &b);
            let x_ref = lu_solve(&a, &b).unwrap();
            for i in 0..2 {
                assert!((x[i] - x_ref[i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn transpose_solve_matches_explicit_transpose() {
        let a = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 0.0],
        ];
        let at = vec![
            vec![1.0, 4.0, 7.0],
            vec![2.0, 5.0, 8.0],
            vec![3.0, 6.0, 0.0],
        ];
        let b = vec![14.0, 32.0, 23.0];

        let factors = lu_factor(&a).unwrap();
        let x = lu_back_solve_transpose(&factors, &b);
        let x_ref = lu_solve(&at, &b).unwrap();
        for i in 0..3 {
            assert!(
                (x[i] - x_ref[i]).abs() < 1e-10,
                "x[{}] = {}, expected {}",
                i,
                x[i],
                x_ref[i]
            );
        }
    }

    #[test]
    fn matvec_and_transpose() {
        let a = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let x = vec![1.0, -1.0];
        let mut y = vec![0.0; 3];
        matvec(&a, &x, &mut y);
        assert_eq!(y, vec![-1.0, -1.0, -1.0]);

        let z = vec![1.0, 1.0, 1.0];
        let mut w = vec![0.0; 2];
        matvec_transpose(&a, &z, &mut w);
        assert_eq!(w, vec![9.0, 12.0]);
    }
}
