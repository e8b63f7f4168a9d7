//! Linear block Gauss-Seidel.
//!
//! Mirrors the nonlinear Gauss-Seidel sweep at the linear level: each
//! child's diagonal block is solved directly while off-diagonal coupling
//! uses the latest committed values. Forward mode sweeps children in
//! execution order; reverse mode sweeps the transposed system in reverse
//! order. Converges when the coupling is sufficiently block-diagonally
//! dominant; the iteration bound and tolerances follow the shared option
//! shape.

use crate::error::SolveError;
use crate::jacobian::AssembledJacobian;
use crate::linalg::{lu_back_solve, lu_back_solve_transpose, lu_factor, norm, LuFactors};
use crate::solvers::linear::SolveMode;
use crate::solvers::LinearGsOptions;

/// Cached diagonal-block factorizations, keyed by linearization version.
#[derive(Default)]
pub(crate) struct BlockCache {
    version: Option<u64>,
    factors: Vec<LuFactors<f64>>,
}

pub(crate) fn solve_block_gs(
    jac: &AssembledJacobian,
    rhs: &[f64],
    mode: SolveMode,
    opts: &LinearGsOptions,
    blocks: &[(usize, usize)],
    cache: &mut BlockCache,
    system: &str,
) -> Result<Vec<f64>, SolveError> {
    let n = jac.n;
    debug_assert_eq!(rhs.len(), n);
    debug_assert_eq!(blocks.iter().map(|&(_, len)| len).sum::<usize>(), n);

    if cache.version != Some(jac.version) {
        cache.factors.clear();
        for &(start, len) in blocks {
            let mut diag = vec![vec![0.0; len]; len];
            for r in 0..len {
                for c in 0..len {
                    diag[r][c] = jac.dr_dz[start + r][start + c];
                }
            }
            let factors = lu_factor(&diag).ok_or_else(|| SolveError::SingularMatrix {
                system: system.to_string(),
            })?;
            cache.factors.push(factors);
        }
        cache.version = Some(jac.version);
    }

    let mut x = vec![0.0; n];
    let mut resid = vec![0.0; n];

    let residual_norm = |x: &[f64], resid: &mut [f64]| {
        match mode {
            SolveMode::Forward => crate::linalg::matvec(&jac.dr_dz, x, resid),
            SolveMode::Reverse => crate::linalg::matvec_transpose(&jac.dr_dz, x, resid),
        }
        for (r, b) in resid.iter_mut().zip(rhs.iter()) {
            *r -= b;
        }
        norm(resid)
    };

    let norm0 = norm(rhs);
    if norm0 <= opts.solver.atol {
        return Ok(x);
    }

    let mut res = norm0;
    for _ in 0..opts.solver.max_iter {
        // One sweep: forward order for J, reverse order for J^T
        let order: Box<dyn Iterator<Item = usize>> = match mode {
            SolveMode::Forward => Box::new(0..blocks.len()),
            SolveMode::Reverse => Box::new((0..blocks.len()).rev()),
        };

        for b in order {
            let (start, len) = blocks[b];
            // rhs_b minus off-diagonal coupling at latest committed values
            let mut local = vec![0.0; len];
            for r in 0..len {
                let mut sum = rhs[start + r];
                match mode {
                    SolveMode::Forward => {
                        let row = &jac.dr_dz[start + r];
                        for (j, &xj) in x.iter().enumerate() {
                            if j < start || j >= start + len {
                                sum -= row[j] * xj;
                            }
                        }
                    }
                    SolveMode::Reverse => {
                        for (j, &xj) in x.iter().enumerate() {
                            if j < start || j >= start + len {
                                sum -= jac.dr_dz[j][start + r] * xj;
                            }
                        }
                    }
                }
                local[r] = sum;
            }

            let sol = match mode {
                SolveMode::Forward => lu_back_solve(&cache.factors[b], &local),
                SolveMode::Reverse => lu_back_solve_transpose(&cache.factors[b], &local),
            };
            x[start..start + len].copy_from_slice(&sol);
        }

        res = residual_norm(&x, &mut resid);
        if res <= opts.solver.atol || res <= opts.solver.rtol * norm0 {
            return Ok(x);
        }
        if !res.is_finite() {
            break;
        }
    }

    if opts.solver.err_on_non_converge {
        return Err(SolveError::Convergence {
            system: system.to_string(),
            iterations: opts.solver.max_iter,
            residual_norm: res,
        });
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jac(dr_dz: Vec<Vec<f64>>, version: u64) -> AssembledJacobian {
        let n = dr_dz.len();
        AssembledJacobian {
            n,
            p: 0,
            dr_dz,
            dr_dx: vec![vec![]; n],
            local_of_state: (0..n).map(Some).collect(),
            version,
        }
    }

    fn opts() -> LinearGsOptions {
        LinearGsOptions::default()
    }

    #[test]
    fn block_diagonally_dominant_converges() {
        // Two 1x1 blocks with weak coupling
        let j = jac(vec![vec![1.0, -0.2], vec![-0.3, 1.0]], 1);
        let mut cache = BlockCache::default();
        let x = solve_block_gs(
            &j,
            &[1.0, 2.0],
            SolveMode::Forward,
            &opts(),
            &[(0, 1), (1, 1)],
            &mut cache,
            "g",
        )
        .unwrap();

        // Direct solution of the 2x2 for reference
        let x_ref = crate::linalg::lu_solve(&j.dr_dz, &[1.0, 2.0]).unwrap();
        assert!((x[0] - x_ref[0]).abs() < 1e-9);
        assert!((x[1] - x_ref[1]).abs() < 1e-9);
    }

    #[test]
    fn reverse_mode_solves_transpose() {
        let j = jac(vec![vec![1.0, -0.2], vec![-0.3, 1.0]], 2);
        let mut cache = BlockCache::default();
        let x = solve_block_gs(
            &j,
            &[1.0, 2.0],
            SolveMode::Reverse,
            &opts(),
            &[(0, 1), (1, 1)],
            &mut cache,
            "g",
        )
        .unwrap();

        let at = vec![vec![1.0, -0.3], vec![-0.2, 1.0]];
        let x_ref = crate::linalg::lu_solve(&at, &[1.0, 2.0]).unwrap();
        assert!((x[0] - x_ref[0]).abs() < 1e-9);
        assert!((x[1] - x_ref[1]).abs() < 1e-9);
    }

    #[test]
    fn multi_entry_blocks() {
        // One 2x2 block and one 1x1 block
        let j = jac(
            vec![
                vec![2.0, 1.0, -0.1],
                vec![1.0, 3.0, 0.0],
                vec![-0.2, 0.0, 1.5],
            ],
            3,
        );
        let mut cache = BlockCache::default();
        let rhs = [1.0, -1.0, 0.5];
        let x = solve_block_gs(
            &j,
            &rhs,
            SolveMode::Forward,
            &opts(),
            &[(0, 2), (2, 1)],
            &mut cache,
            "g",
        )
        .unwrap();

        let x_ref = crate::linalg::lu_solve(&j.dr_dz, &rhs).unwrap();
        for i in 0..3 {
            assert!((x[i] - x_ref[i]).abs() < 1e-8, "x[{i}] = {} vs {}", x[i], x_ref[i]);
        }
    }

    #[test]
    fn non_convergence_raises_when_fatal() {
        // Coupling far from diagonal dominance diverges
        let j = jac(vec![vec![1.0, 3.0], vec![3.0, 1.0]], 4);
        let mut cache = BlockCache::default();
        let mut o = opts();
        o.solver.max_iter = 10;
        let err = solve_block_gs(
            &j,
            &[1.0, 1.0],
            SolveMode::Forward,
            &o,
            &[(0, 1), (1, 1)],
            &mut cache,
            "grp",
        );
        assert!(matches!(err, Err(SolveError::Convergence { system, .. }) if system == "grp"));
    }
}
