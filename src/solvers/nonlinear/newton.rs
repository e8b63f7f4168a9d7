//! Newton's method over a coupled unit.
//!
//! Linearizes every leaf in the unit's subtree, assembles the unit
//! Jacobian, solves `J · Δ = -R` with the group's linear solver, and
//! applies a backtracking line search that halves the step until the
//! residual norm decreases or the halving bound is exhausted (the last
//! trial step is then accepted and the outer iteration continues).
//! Declared variable bounds clip every trial state.

use crate::error::SolveError;
use crate::jacobian::{assemble, linearize_component};
use crate::solvers::linear::{solve_linear, SolveMode};
use crate::solvers::nonlinear::{compute_residuals, SolveCtx};
use crate::solvers::{NewtonOptions, SolveReport, Termination};

pub(crate) fn solve_unit(
    ctx: &mut SolveCtx,
    group_idx: usize,
    members: &[usize],
    opts: &NewtonOptions,
) -> Result<SolveReport, SolveError> {
    let model = ctx.model;
    let group_path = model.diag_path(group_idx);
    let linear = model.group(group_idx).linear.clone();

    // Leaves of the unit in execution order; their state rows are the
    // unknowns. Block ranges per direct member drive the LNBGS backend.
    let mut comps = Vec::new();
    let mut blocks = Vec::new();
    let mut local_len = 0usize;
    for &m in members {
        let start = local_len;
        for c in model.subtree_components(m) {
            comps.push(c);
            local_len += model.comp(c).output_len;
        }
        blocks.push((start, local_len - start));
    }
    let global_rows: Vec<usize> = comps
        .iter()
        .flat_map(|&c| {
            let slot = model.comp(c);
            slot.state_offset..slot.state_offset + slot.output_len
        })
        .collect();

    let mut res_norm = compute_residuals(ctx, &comps)?;
    let norm0 = res_norm;
    let mut y_trial = vec![0.0; local_len];
    let mut y_save = vec![0.0; local_len];

    for iteration in 0..=opts.solver.max_iter {
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
        if iteration == opts.solver.max_iter || !res_norm.is_finite() {
            break;
        }

        // Linearize every leaf at the current state, then assemble
        for &c in comps.iter() {
            let store = ctx.partials[c].as_mut().expect("leaf has a partials store");
            linearize_component(model, ctx.vectors, c, store)?;
        }
        let version = ctx.vectors.version();
        let jac = assemble(model, ctx.partials, &comps, false, version);

        let rhs: Vec<f64> = global_rows
            .iter()
            .map(|&row| -ctx.vectors.residuals[row])
            .collect();

        let cache = ctx.caches.entry(group_idx).or_default();
        let delta = solve_linear(&linear, &jac, &rhs, SolveMode::Forward, cache, &blocks, &group_path)?;

        for (dst, &row) in y_save.iter_mut().zip(global_rows.iter()) {
            *dst = ctx.vectors.state[row];
        }

        // Backtracking: halve until the residual norm decreases
        let mut alpha = 1.0;
        for halving in 0..=opts.max_linesearch {
            for k in 0..local_len {
                let row = global_rows[k];
                y_trial[k] =
                    (y_save[k] + alpha * delta[k]).clamp(model.lower[row], model.upper[row]);
            }
            {
                let state = ctx.vectors.state_mut(0..model.state_len);
                for (k, &row) in global_rows.iter().enumerate() {
                    state[row] = y_trial[k];
                }
            }
            let trial_norm = compute_residuals(ctx, &comps)?;
            if trial_norm < res_norm || halving == opts.max_linesearch {
                res_norm = trial_norm;
                break;
            }
            alpha *= 0.5;
        }
    }

    if opts.solver.err_on_non_converge {
        return Err(SolveError::Convergence {
            system: group_path,
            iterations: opts.solver.max_iter,
            residual_norm: res_norm,
        });
    }
    Ok(SolveReport {
        converged: false,
        iterations: opts.solver.max_iter,
        residual_norm: res_norm,
        termination: Termination::MaxIterations,
    })
}
