//! Direct linear solve via LU factorization.
//!
//! The factorization is cached and keyed by the Jacobian's linearization
//! version: solving many right-hand sides against one linearization (the
//! common case for total derivatives) factors once. A rank-deficient matrix
//! is a hard [`SolveError::SingularMatrix`]; no pseudo-inverse fallback.
//!
//! With the `sparse` feature, systems at or above a size crossover are
//! factored with faer's sparse LU from the triplet form instead.

use crate::error::SolveError;
use crate::jacobian::AssembledJacobian;
use crate::linalg::{lu_back_solve, lu_back_solve_transpose, lu_factor, LuFactors};
use crate::solvers::linear::SolveMode;

#[cfg(feature = "sparse")]
const SPARSE_CROSSOVER: usize = 64;

/// Cached factorization of one group's Jacobian.
#[derive(Default)]
pub(crate) struct DirectCache {
    version: Option<u64>,
    dense: Option<LuFactors<f64>>,
    #[cfg(feature = "sparse")]
    sparse: Option<faer::sparse::linalg::solvers::Lu<usize, f64>>,
}

impl DirectCache {
    fn invalidate(&mut self) {
        self.version = None;
        self.dense = None;
        #[cfg(feature = "sparse")]
        {
            self.sparse = None;
        }
    }
}

pub(crate) fn solve_direct(
    jac: &AssembledJacobian,
    rhs: &[f64],
    mode: SolveMode,
    cache: &mut DirectCache,
    system: &str,
) -> Result<Vec<f64>, SolveError> {
    if cache.version != Some(jac.version) {
        cache.invalidate();
        factor(jac, cache, system)?;
        cache.version = Some(jac.version);
    }

    #[cfg(feature = "sparse")]
    if let Some(lu) = &cache.sparse {
        return Ok(sparse_solve(lu, rhs, mode));
    }

    let factors = cache.dense.as_ref().expect("factorization cached");
    Ok(match mode {
        SolveMode::Forward => lu_back_solve(factors, rhs),
        SolveMode::Reverse => lu_back_solve_transpose(factors, rhs),
    })
}

fn factor(jac: &AssembledJacobian, cache: &mut DirectCache, system: &str) -> Result<(), SolveError> {
    #[cfg(feature = "sparse")]
    if jac.n >= SPARSE_CROSSOVER {
        cache.sparse = Some(sparse_factor(jac).ok_or_else(|| SolveError::SingularMatrix {
            system: system.to_string(),
        })?);
        return Ok(());
    }

    cache.dense = Some(lu_factor(&jac.dr_dz).ok_or_else(|| SolveError::SingularMatrix {
        system: system.to_string(),
    })?);
    Ok(())
}

/// Build the sparse matrix from non-zero triplets and factor it.
///
/// Uses `catch_unwind` because faer's sparse LU panics on singular matrices
/// rather than returning an error.
#[cfg(feature = "sparse")]
fn sparse_factor(jac: &AssembledJacobian) -> Option<faer::sparse::linalg::solvers::Lu<usize, f64>> {
    use faer::sparse::SparseColMat;

    let n = jac.n;
    let mut triplets = Vec::new();
    for (i, row) in jac.dr_dz.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if v != 0.0 {
                triplets.push((i, j, v));
            }
        }
    }
    let mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets).ok()?;
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| mat.sp_lu().ok()))
        .ok()
        .flatten()
}

#[cfg(feature = "sparse")]
fn sparse_solve(
    lu: &faer::sparse::linalg::solvers::Lu<usize, f64>,
    rhs: &[f64],
    mode: SolveMode,
) -> Vec<f64> {
    use faer::linalg::solvers::SpSolver;
    use faer::Col;

    let b = Col::<f64>::from_fn(rhs.len(), |i| rhs[i]);
    let sol = match mode {
        SolveMode::Forward => lu.solve(&b),
        SolveMode::Reverse => lu.solve_transpose(&b),
    };
    (0..rhs.len()).map(|i| sol[i]).collect()
}
