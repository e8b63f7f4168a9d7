//! Nonlinear block Gauss-Seidel.
//!
//! Sweeps the coupled children in execution order, each child solving
//! itself against the latest committed upstream values. The fixed-point
//! residual is the output change produced by one full sweep; its L2 norm
//! (reduced collectively) drives the shared convergence criteria. Optional
//! Aitken relaxation scales the sweep update to accelerate slowly
//! contracting couplings.

use crate::error::SolveError;
use crate::linalg::dot;
use crate::solvers::nonlinear::{solve_system, unit_state_rows, SolveCtx};
use crate::solvers::{GaussSeidelOptions, SolveReport, Termination};

pub(crate) fn solve_unit(
    ctx: &mut SolveCtx,
    group_idx: usize,
    members: &[usize],
    opts: &GaussSeidelOptions,
) -> Result<SolveReport, SolveError> {
    let model = ctx.model;
    let rows = unit_state_rows(model, members);
    let group_path = model.diag_path(group_idx);

    let mut y_old = vec![0.0; rows.len()];
    let mut delta = vec![0.0; rows.len()];
    let mut delta_prev = vec![0.0; rows.len()];
    let mut theta = 1.0;

    let mut norm0 = 0.0;
    let mut res_norm = f64::INFINITY;

    for iteration in 1..=opts.solver.max_iter {
        for (dst, &row) in y_old.iter_mut().zip(rows.iter()) {
            *dst = ctx.vectors.state[row];
        }

        for &member in members {
            solve_system(ctx, member)?;
        }

        for (k, &row) in rows.iter().enumerate() {
            delta[k] = ctx.vectors.state[row] - y_old[k];
        }

        if opts.use_aitken {
            if iteration > 1 {
                let mut diff = vec![0.0; delta.len()];
                for k in 0..delta.len() {
                    diff[k] = delta[k] - delta_prev[k];
                }
                let denom = dot(&diff, &diff);
                if denom > 0.0 {
                    theta *= 1.0 - dot(&diff, &delta) / denom;
                }
                theta = theta.clamp(opts.aitken_min_factor, opts.aitken_max_factor);
            }
            if theta != 1.0 {
                let state = ctx.vectors.state_mut(0..ctx.model.state_len);
                for (k, &row) in rows.iter().enumerate() {
                    state[row] = y_old[k] + theta * delta[k];
                    delta[k] = theta * delta[k];
                }
            }
        }

        let mut sum_sq = [dot(&delta, &delta)];
        ctx.comm.allreduce_sum(&mut sum_sq);
        res_norm = sum_sq[0].sqrt();

        if iteration == 1 {
            norm0 = res_norm;
        }
        if !res_norm.is_finite() {
            break;
        }
        if res_norm <= opts.solver.atol {
            return Ok(SolveReport {
                converged: true,
                iterations: iteration,
                residual_norm: res_norm,
                termination: Termination::Absolute,
            });
        }
        if res_norm <= opts.solver.rtol * norm0 {
            return Ok(SolveReport {
                converged: true,
                iterations: iteration,
                residual_norm: res_norm,
                termination: Termination::Relative,
            });
        }

        std::mem::swap(&mut delta_prev, &mut delta);
    }

    if opts.solver.err_on_non_converge {
        return Err(SolveError::Convergence {
            system: group_path,
            iterations: opts.solver.max_iter,
            residual_norm: res_norm,
        });
    }
    // Best-available state stays in place for the caller to inspect
    Ok(SolveReport {
        converged: false,
        iterations: opts.solver.max_iter,
        residual_norm: res_norm,
        termination: Termination::MaxIterations,
    })
}
