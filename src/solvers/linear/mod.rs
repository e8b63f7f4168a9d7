//! Linear solve backends.
//!
//! Every backend solves `J x = b` (forward) or `J^T x = b` (reverse) against
//! an assembled Jacobian. The direct backend caches its factorization keyed
//! by the Jacobian's linearization version, so repeated solves at the same
//! state (the seed loop of a total-derivative computation, or the many
//! right-hand sides of a reverse sweep) factor exactly once.

pub(crate) mod direct;
pub(crate) mod gauss_seidel;
pub(crate) mod gmres;

use crate::error::SolveError;
use crate::jacobian::AssembledJacobian;
use crate::solvers::LinearSolver;

pub(crate) use direct::DirectCache;
pub(crate) use gauss_seidel::BlockCache;

/// Direction of a linear solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMode {
    /// Solve `J x = b`.
    Forward,
    /// Solve `J^T x = b`.
    Reverse,
}

/// Per-group backend caches.
#[derive(Default)]
pub(crate) struct LinearCache {
    pub direct: DirectCache,
    pub blocks: BlockCache,
}

/// Solve one right-hand side with the configured backend.
///
/// `block_ranges` partitions the local unknowns by direct child, used by
/// the block Gauss-Seidel backend.
pub(crate) fn solve_linear(
    solver: &LinearSolver,
    jac: &AssembledJacobian,
    rhs: &[f64],
    mode: SolveMode,
    cache: &mut LinearCache,
    block_ranges: &[(usize, usize)],
    system: &str,
) -> Result<Vec<f64>, SolveError> {
    debug_assert_eq!(rhs.len(), jac.n);
    match solver {
        LinearSolver::Direct => direct::solve_direct(jac, rhs, mode, &mut cache.direct, system),
        LinearSolver::Gmres(opts) => gmres::solve_gmres(jac, rhs, mode, opts, system),
        LinearSolver::GaussSeidel(opts) => gauss_seidel::solve_block_gs(
            jac,
            rhs,
            mode,
            opts,
            block_ranges,
            &mut cache.blocks,
            system,
        ),
    }
}
