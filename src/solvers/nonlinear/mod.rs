//! Nonlinear solve driver.
//!
//! A group's execution order is a sequence of units: acyclic explicit units
//! are evaluated in a single ordered pass (exactly once, no residual loop),
//! while coupled or implicit units are handed to the group's configured
//! iterative solver. Recursion follows the hierarchy: a child group solves
//! itself with its own solvers.

pub(crate) mod gauss_seidel;
pub(crate) mod newton;

use std::collections::BTreeMap;

use crate::comm::Communicator;
use crate::component::{Values, ValuesMut};
use crate::error::SolveError;
use crate::jacobian::{gather_inputs, ComponentPartials};
use crate::solvers::linear::LinearCache;
use crate::solvers::{NonlinearSolver, SolveReport};
use crate::system::{Leaf, Model, SystemNode};
use crate::vector::Vectors;

/// Mutable solve-time state threaded through the recursion.
pub(crate) struct SolveCtx<'a> {
    pub model: &'a Model,
    pub vectors: &'a mut Vectors,
    pub partials: &'a mut [Option<ComponentPartials>],
    pub caches: &'a mut BTreeMap<usize, LinearCache>,
    pub comm: &'a dyn Communicator,
}

/// Solve a group to self-consistency.
pub(crate) fn solve_group(ctx: &mut SolveCtx, group_idx: usize) -> Result<SolveReport, SolveError> {
    let model = ctx.model;
    let mut report = SolveReport::single_pass();

    for unit_idx in 0..model.group(group_idx).exec_units.len() {
        let unit = &model.group(group_idx).exec_units[unit_idx];
        if !unit.needs_iteration() {
            for &member in &unit.members {
                let r = solve_system(ctx, member)?;
                report.absorb(&r);
            }
            continue;
        }

        let r = match &model.group(group_idx).nonlinear {
            NonlinearSolver::GaussSeidel(opts) => {
                gauss_seidel::solve_unit(ctx, group_idx, &unit.members, opts)?
            }
            NonlinearSolver::Newton(opts) => {
                newton::solve_unit(ctx, group_idx, &unit.members, opts)?
            }
            NonlinearSolver::SinglePass => {
                unreachable!("setup rejects coupled units under a single-pass solver")
            }
        };
        report.absorb(&r);
    }

    Ok(report)
}

/// Solve one child: recurse into groups, evaluate explicit leaves.
pub(crate) fn solve_system(ctx: &mut SolveCtx, sys: usize) -> Result<SolveReport, SolveError> {
    match &ctx.model.systems[sys] {
        SystemNode::Group(_) => solve_group(ctx, sys),
        SystemNode::Component(_) => {
            evaluate_component(ctx, sys)?;
            Ok(SolveReport::single_pass())
        }
    }
}

/// Run an explicit leaf's compute, writing its outputs into the state
/// vector.
pub(crate) fn evaluate_component(ctx: &mut SolveCtx, comp: usize) -> Result<(), SolveError> {
    let SolveCtx { model, vectors, .. } = ctx;
    let slot = model.comp(comp);
    let mut buf = Vec::new();
    gather_inputs(model, vectors, comp, &mut buf);

    match &slot.leaf {
        Leaf::Explicit(c) => {
            let inputs = Values::new(&slot.input_index, &buf);
            let out = vectors.state_mut(slot.state_offset..slot.state_offset + slot.output_len);
            let mut outputs = ValuesMut::new(&slot.output_index, out);
            c.compute(&inputs, &mut outputs)?;
        }
        Leaf::Implicit(_) => {
            unreachable!("setup routes implicit leaves to an iterating solver")
        }
    }
    Ok(())
}

/// Evaluate the residuals of the given leaves at the current state and
/// return their collective L2 norm.
///
/// Explicit leaves contribute `R = y - f(x)`; implicit leaves their own
/// residual routine. Residuals land in the shadow vector.
pub(crate) fn compute_residuals(ctx: &mut SolveCtx, comps: &[usize]) -> Result<f64, SolveError> {
    let SolveCtx {
        model,
        vectors,
        comm,
        ..
    } = ctx;
    let mut buf = Vec::new();
    let mut scratch = Vec::new();

    for &comp in comps {
        let slot = model.comp(comp);
        gather_inputs(model, vectors, comp, &mut buf);
        let start = slot.state_offset;
        let len = slot.output_len;

        match &slot.leaf {
            Leaf::Explicit(c) => {
                scratch.clear();
                scratch.extend_from_slice(&vectors.state[start..start + len]);
                let inputs = Values::new(&slot.input_index, &buf);
                let mut outputs = ValuesMut::new(&slot.output_index, &mut scratch);
                c.compute(&inputs, &mut outputs)?;
                for k in 0..len {
                    vectors.residuals[start + k] = vectors.state[start + k] - scratch[k];
                }
            }
            Leaf::Implicit(c) => {
                scratch.clear();
                scratch.resize(len, 0.0);
                let inputs = Values::new(&slot.input_index, &buf);
                let outputs = Values::new(&slot.output_index, &vectors.state[start..start + len]);
                let mut residuals = ValuesMut::new(&slot.output_index, &mut scratch);
                c.apply_nonlinear(&inputs, &outputs, &mut residuals)?;
                vectors.residuals[start..start + len].copy_from_slice(&scratch);
            }
        }
    }

    let mut sum_sq = 0.0;
    for &comp in comps {
        let slot = model.comp(comp);
        for k in 0..slot.output_len {
            let r = vectors.residuals[slot.state_offset + k];
            sum_sq += r * r;
        }
    }
    let mut reduced = [sum_sq];
    comm.allreduce_sum(&mut reduced);
    Ok(reduced[0].sqrt())
}

/// Global state indices covered by the subtrees of the given members, in
/// execution order.
pub(crate) fn unit_state_rows(model: &Model, members: &[usize]) -> Vec<usize> {
    let mut rows = Vec::new();
    for &m in members {
        for c in model.subtree_components(m) {
            let slot = model.comp(c);
            rows.extend(slot.state_offset..slot.state_offset + slot.output_len);
        }
    }
    rows
}
