//! Restarted GMRES over a matrix-free linear operator.
//!
//! Builds an Arnoldi basis with modified Gram-Schmidt and solves the
//! least-squares problem incrementally with Givens rotations. Only
//! Jacobian-vector (or transposed) products are required, so the backend
//! works when an explicit factorization is too large to form.

use crate::error::SolveError;
use crate::jacobian::LinearOperator;
use crate::linalg::norm;
use crate::solvers::linear::SolveMode;
use crate::solvers::GmresOptions;

/// Solve `A x = b` (or `A^T x = b` in reverse mode) by restarted GMRES.
pub(crate) fn solve_gmres(
    op: &dyn LinearOperator,
    rhs: &[f64],
    mode: SolveMode,
    opts: &GmresOptions,
    system: &str,
) -> Result<Vec<f64>, SolveError> {
    let n = op.dim();
    debug_assert_eq!(rhs.len(), n);
    if n == 0 {
        return Ok(Vec::new());
    }

    let apply = |x: &[f64], y: &mut [f64]| match mode {
        SolveMode::Forward => op.apply(x, y),
        SolveMode::Reverse => op.apply_transpose(x, y),
    };

    let restart = opts.restart.max(1).min(n);
    let mut x = vec![0.0; n];
    let mut ax = vec![0.0; n];

    // Residual at the zero initial guess fixes the relative criterion
    let norm0 = norm(rhs);
    if norm0 <= opts.solver.atol {
        return Ok(x);
    }
    let tol = opts.solver.atol.max(opts.solver.rtol * norm0);

    let mut total_iters = 0usize;
    let mut res_norm = norm0;

    'outer: while total_iters < opts.solver.max_iter {
        apply(&x, &mut ax);
        let r: Vec<f64> = rhs.iter().zip(ax.iter()).map(|(b, a)| b - a).collect();
        let beta = norm(&r);
        res_norm = beta;
        if beta <= tol {
            break;
        }

        // Arnoldi basis and Hessenberg column storage
        let mut v: Vec<Vec<f64>> = Vec::with_capacity(restart + 1);
        v.push(r.iter().map(|ri| ri / beta).collect());
        let mut h: Vec<Vec<f64>> = Vec::with_capacity(restart); // h[j] has j+2 entries
        let mut cs = Vec::with_capacity(restart);
        let mut sn = Vec::with_capacity(restart);
        let mut g = vec![0.0; restart + 1];
        g[0] = beta;

        let mut k = 0usize;
        while k < restart && total_iters < opts.solver.max_iter {
            let mut w = vec![0.0; n];
            apply(&v[k], &mut w);

            // Modified Gram-Schmidt
            let mut hk = vec![0.0; k + 2];
            for (i, vi) in v.iter().enumerate() {
                let mut dot = 0.0;
                for (wv, vv) in w.iter().zip(vi.iter()) {
                    dot += wv * vv;
                }
                hk[i] = dot;
                for (wv, vv) in w.iter_mut().zip(vi.iter()) {
                    *wv -= dot * vv;
                }
            }
            let wnorm = norm(&w);
            hk[k + 1] = wnorm;

            // Apply accumulated rotations to the new column
            for i in 0..k {
                let temp = cs[i] * hk[i] + sn[i] * hk[i + 1];
                hk[i + 1] = -sn[i] * hk[i] + cs[i] * hk[i + 1];
                hk[i] = temp;
            }

            // New rotation annihilating hk[k+1]
            let denom = (hk[k] * hk[k] + hk[k + 1] * hk[k + 1]).sqrt();
            let (c, s) = if denom == 0.0 { (1.0, 0.0) } else { (hk[k] / denom, hk[k + 1] / denom) };
            cs.push(c);
            sn.push(s);
            hk[k] = c * hk[k] + s * hk[k + 1];
            hk[k + 1] = 0.0;
            g[k + 1] = -s * g[k];
            g[k] *= c;

            h.push(hk);
            total_iters += 1;
            res_norm = g[k + 1].abs();

            let happy_breakdown = wnorm <= f64::EPSILON * beta;
            if !happy_breakdown {
                v.push(w.iter().map(|wv| wv / wnorm).collect());
            }

            k += 1;
            if res_norm <= tol || happy_breakdown {
                break;
            }
        }

        // Back-substitute y from the triangularized Hessenberg system and
        // update x over the basis built so far
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            y[i] = sum / h[i][i];
        }
        for j in 0..k {
            for (xi, vi) in x.iter_mut().zip(v[j].iter()) {
                *xi += y[j] * vi;
            }
        }

        if res_norm <= tol {
            break 'outer;
        }
    }

    if res_norm > tol {
        // Recompute the true residual; restarts track it incrementally
        apply(&x, &mut ax);
        let r: Vec<f64> = rhs.iter().zip(ax.iter()).map(|(b, a)| b - a).collect();
        res_norm = norm(&r);
    }

    if res_norm > tol {
        if opts.solver.err_on_non_converge {
            return Err(SolveError::Convergence {
                system: system.to_string(),
                iterations: total_iters,
                residual_norm: res_norm,
            });
        }
        // Best-available iterate; the caller sees the flagged report upstream
    }
    Ok(x)
}
