//! Partial-derivative storage, linearization and Jacobian assembly.
//!
//! Each leaf owns a set of declared partial blocks filled either by the
//! component's own routine or by colored finite-difference / complex-step
//! approximation. A group-level Jacobian is the block union of its leaves'
//! partials plus the connection structure: explicit components enter in
//! residual form `R(y) = y - f(x)`, contributing an identity diagonal and
//! `-df/dx` off the diagonal; implicit components contribute their declared
//! residual partials directly.
//!
//! An assembled Jacobian is valid only for the state it was linearized at;
//! it carries the state version and every consumer checks it before use.

use num_complex::Complex64;

use crate::approx_partials::{complex_step_jacobian, fd_jacobian, DerivMethod};
use crate::coloring::{column_coloring, SparsityPattern};
use crate::component::{Partials, Values, ValuesMut, WrtSlot};
use crate::error::{ComponentError, SolveError};
use crate::linalg::{matvec, matvec_transpose};
use crate::system::{Col, Leaf, Model};
use crate::vector::Vectors;

/// Copy a component's input values out of the state/parameter vectors into
/// its local input buffer.
pub(crate) fn gather_inputs(model: &Model, vectors: &Vectors, comp: usize, buf: &mut Vec<f64>) {
    let slot = model.comp(comp);
    buf.resize(slot.input_len, 0.0);
    for (k, &var) in slot.inputs.iter().enumerate() {
        let (_, off, len) = slot.input_index[k];
        match model.input_col(var) {
            Col::State(s) => buf[off..off + len].copy_from_slice(&vectors.state[s..s + len]),
            Col::Param(p) => buf[off..off + len].copy_from_slice(&vectors.params[p..p + len]),
        }
    }
}

/// One approximation sweep shared by all blocks of a component that use the
/// same scheme: union sparsity pattern over the component's perturbation
/// space, its coloring, and the scatter map back into block values.
pub(crate) struct ApproxGroup {
    method: DerivMethod,
    pattern: SparsityPattern,
    colors: Vec<u32>,
    num_colors: u32,
    /// For each member block: its index and, per stored value, the pattern
    /// entry it reads from.
    scatter: Vec<(usize, Vec<usize>)>,
}

/// Partial storage for one leaf.
pub(crate) struct ComponentPartials {
    /// Parallel to the slot's resolved partial declarations.
    pub values: Vec<Vec<f64>>,
    approx: Vec<ApproxGroup>,
}

impl ComponentPartials {
    /// Build storage and approximation plans for a leaf. Coloring is
    /// computed here, once, and reused for every linearization.
    pub(crate) fn new(model: &Model, comp: usize) -> Self {
        let slot = model.comp(comp);
        let values: Vec<Vec<f64>> =
            slot.partials.iter().map(|p| vec![0.0; p.value_len()]).collect();

        let pert_len = match slot.leaf {
            Leaf::Explicit(_) => slot.input_len,
            Leaf::Implicit(_) => slot.input_len + slot.output_len,
        };

        // Group approximated blocks by identical scheme
        let mut by_scheme: Vec<(DerivMethod, Vec<usize>)> = Vec::new();
        for (k, p) in slot.partials.iter().enumerate() {
            if p.method == DerivMethod::Analytic {
                continue;
            }
            match by_scheme.iter_mut().find(|(m, _)| *m == p.method) {
                Some((_, blocks)) => blocks.push(k),
                None => by_scheme.push((p.method, vec![k])),
            }
        }

        let approx = by_scheme
            .into_iter()
            .map(|(method, blocks)| {
                let mut entries: Vec<(u32, u32)> = Vec::new();
                for &k in &blocks {
                    let p = &slot.partials[k];
                    for (r, c) in block_entries(p) {
                        entries.push((
                            (p.of_offset + r) as u32,
                            (p.wrt_offset + c) as u32,
                        ));
                    }
                }
                let pattern = SparsityPattern::from_entries(slot.output_len, pert_len, entries);
                let (colors, num_colors) = column_coloring(&pattern);

                let find_entry = |r: u32, c: u32| -> usize {
                    pattern
                        .rows
                        .iter()
                        .zip(pattern.cols.iter())
                        .position(|(&pr, &pc)| pr == r && pc == c)
                        .expect("block entry present in union pattern")
                };

                let scatter = blocks
                    .iter()
                    .map(|&k| {
                        let p = &slot.partials[k];
                        let map = block_entries(p)
                            .map(|(r, c)| {
                                find_entry(
                                    (p.of_offset + r) as u32,
                                    (p.wrt_offset + c) as u32,
                                )
                            })
                            .collect();
                        (k, map)
                    })
                    .collect();

                ApproxGroup {
                    method,
                    pattern,
                    colors,
                    num_colors,
                    scatter,
                }
            })
            .collect();

        ComponentPartials { values, approx }
    }
}

/// Within-block (row, col) positions in stored-value order.
fn block_entries(
    p: &crate::component::ResolvedPartial,
) -> Box<dyn Iterator<Item = (usize, usize)> + '_> {
    match &p.sparsity {
        None => {
            let wrt_len = p.wrt_len;
            Box::new((0..p.of_len).flat_map(move |r| (0..wrt_len).map(move |c| (r, c))))
        }
        Some((rows, cols)) => Box::new(
            rows.iter()
                .zip(cols.iter())
                .map(|(&r, &c)| (r as usize, c as usize)),
        ),
    }
}

/// Recompute a leaf's partial blocks at the current state.
pub(crate) fn linearize_component(
    model: &Model,
    vectors: &Vectors,
    comp: usize,
    store: &mut ComponentPartials,
) -> Result<(), SolveError> {
    let slot = model.comp(comp);
    let mut input_buf = Vec::new();
    gather_inputs(model, vectors, comp, &mut input_buf);
    let state = &vectors.state[slot.state_offset..slot.state_offset + slot.output_len];

    // Analytic blocks first
    let has_analytic = slot
        .partials
        .iter()
        .any(|p| p.method == DerivMethod::Analytic);
    if has_analytic {
        let mut writer = Partials {
            decls: &slot.partials,
            values: &mut store.values,
        };
        let inputs = Values::new(&slot.input_index, &input_buf);
        match &slot.leaf {
            Leaf::Explicit(c) => c.compute_partials(&inputs, &mut writer)?,
            Leaf::Implicit(c) => {
                let outputs = Values::new(&slot.output_index, state);
                c.linearize(&inputs, &outputs, &mut writer)?
            }
        }
    }

    // Approximated blocks, one colored sweep per scheme
    let x0 = base_point(&input_buf, state, &slot.leaf);
    for group in &store.approx {
        let mut entry_values = vec![0.0; group.pattern.nnz()];
        match group.method {
            DerivMethod::Analytic => unreachable!("analytic blocks are not approximated"),
            DerivMethod::Fd { form, step } => {
                let mut y0 = vec![0.0; slot.output_len];
                eval_real(model, comp, &x0, state, &mut y0)?;
                fd_jacobian(
                    |x, y| eval_real(model, comp, x, state, y),
                    &x0,
                    &y0,
                    form,
                    step,
                    &group.pattern,
                    &group.colors,
                    group.num_colors,
                    &mut entry_values,
                )?;
            }
            DerivMethod::ComplexStep { step } => {
                complex_step_jacobian(
                    |x, y| eval_complex(model, comp, x, y),
                    &x0,
                    step,
                    &group.pattern,
                    &group.colors,
                    group.num_colors,
                    &mut entry_values,
                )?;
            }
        }

        for (block, map) in &group.scatter {
            for (v, &k) in store.values[*block].iter_mut().zip(map.iter()) {
                *v = entry_values[k];
            }
        }
    }

    Ok(())
}

/// The perturbable base point: inputs, then own outputs for implicit leaves.
fn base_point(inputs: &[f64], state: &[f64], leaf: &Leaf) -> Vec<f64> {
    match leaf {
        Leaf::Explicit(_) => inputs.to_vec(),
        Leaf::Implicit(_) => {
            let mut x = Vec::with_capacity(inputs.len() + state.len());
            x.extend_from_slice(inputs);
            x.extend_from_slice(state);
            x
        }
    }
}

/// Evaluate a leaf at a perturbed point: outputs for explicit leaves,
/// residuals for implicit ones.
fn eval_real(
    model: &Model,
    comp: usize,
    x: &[f64],
    base_state: &[f64],
    y: &mut [f64],
) -> Result<(), ComponentError> {
    let slot = model.comp(comp);
    match &slot.leaf {
        Leaf::Explicit(c) => {
            // Unwritten outputs keep their base values so their rows differ
            // by exactly zero
            y.copy_from_slice(base_state);
            let inputs = Values::new(&slot.input_index, &x[..slot.input_len]);
            let mut outputs = ValuesMut::new(&slot.output_index, y);
            c.compute(&inputs, &mut outputs)
        }
        Leaf::Implicit(c) => {
            let inputs = Values::new(&slot.input_index, &x[..slot.input_len]);
            let outputs = Values::new(&slot.output_index, &x[slot.input_len..]);
            let mut residuals = ValuesMut::new(&slot.output_index, y);
            c.apply_nonlinear(&inputs, &outputs, &mut residuals)
        }
    }
}

fn eval_complex(
    model: &Model,
    comp: usize,
    x: &[Complex64],
    y: &mut [Complex64],
) -> Result<(), ComponentError> {
    let slot = model.comp(comp);
    for v in y.iter_mut() {
        *v = Complex64::new(0.0, 0.0);
    }
    match &slot.leaf {
        Leaf::Explicit(c) => {
            let inputs = Values::new(&slot.input_index, &x[..slot.input_len]);
            let mut outputs = ValuesMut::new(&slot.output_index, y);
            c.compute_complex(&inputs, &mut outputs)
        }
        Leaf::Implicit(c) => {
            let inputs = Values::new(&slot.input_index, &x[..slot.input_len]);
            let outputs = Values::new(&slot.output_index, &x[slot.input_len..]);
            let mut residuals = ValuesMut::new(&slot.output_index, y);
            c.apply_nonlinear_complex(&inputs, &outputs, &mut residuals)
        }
    }
}

/// Matrix-free view of a linear system.
pub trait LinearOperator {
    fn dim(&self) -> usize;
    /// `y = A x`
    fn apply(&self, x: &[f64], y: &mut [f64]);
    /// `y = A^T x`
    fn apply_transpose(&self, x: &[f64], y: &mut [f64]);
}

/// Dense assembled Jacobian of a subtree.
///
/// Rows/columns cover the subtree's state entries in execution order; the
/// parameter block covers the model's unconnected inputs when requested.
pub(crate) struct AssembledJacobian {
    pub n: usize,
    pub p: usize,
    /// `dR/dz`, n x n.
    pub dr_dz: Vec<Vec<f64>>,
    /// `dR/dx`, n x p.
    pub dr_dx: Vec<Vec<f64>>,
    /// Maps a global state index to a local row/column.
    pub local_of_state: Vec<Option<usize>>,
    /// State version this Jacobian was linearized at.
    pub version: u64,
}

impl AssembledJacobian {
    pub(crate) fn is_valid_for(&self, version: u64) -> bool {
        self.version == version
    }
}

impl LinearOperator for AssembledJacobian {
    fn dim(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        matvec(&self.dr_dz, x, y);
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        matvec_transpose(&self.dr_dz, x, y);
    }
}

/// Which column block a partial lands in.
#[derive(Clone, Copy)]
enum Target {
    State(usize),
    Param(usize),
    Fixed,
}

/// Assemble the Jacobian over the given leaves (in execution order) from
/// their current partial values.
///
/// `with_params` adds the `dR/dx` block over the model's parameter vector.
/// Partials with respect to inputs sourced outside the subtree are dropped:
/// those values are held fixed during a subtree solve.
pub(crate) fn assemble(
    model: &Model,
    stores: &[Option<ComponentPartials>],
    comps: &[usize],
    with_params: bool,
    version: u64,
) -> AssembledJacobian {
    let mut local_of_state = vec![None; model.state_len];
    let mut n = 0usize;
    for &c in comps {
        let slot = model.comp(c);
        for k in 0..slot.output_len {
            local_of_state[slot.state_offset + k] = Some(n + k);
        }
        n += slot.output_len;
    }
    let p = if with_params { model.param_len } else { 0 };

    let mut dr_dz = vec![vec![0.0; n]; n];
    let mut dr_dx = vec![vec![0.0; p]; n];

    for &c in comps {
        let slot = model.comp(c);
        if slot.output_len == 0 {
            continue;
        }
        let row_base = local_of_state[slot.state_offset].expect("component rows are local");
        let explicit = !slot.leaf.is_implicit();

        if explicit {
            for k in 0..slot.output_len {
                dr_dz[row_base + k][row_base + k] = 1.0;
            }
        }

        let sign = if explicit { -1.0 } else { 1.0 };
        let store = stores[c].as_ref().expect("leaf has a partials store");

        for (block, decl) in slot.partials.iter().enumerate() {
            let target = match decl.wrt_slot {
                WrtSlot::Input(i) => match model.input_col(slot.inputs[i]) {
                    Col::State(s) => match local_of_state[s] {
                        Some(local) => Target::State(local),
                        None => Target::Fixed,
                    },
                    Col::Param(p0) => {
                        if with_params {
                            Target::Param(p0)
                        } else {
                            Target::Fixed
                        }
                    }
                },
                WrtSlot::Output(o) => {
                    let (_, off, _) = slot.output_index[o];
                    Target::State(row_base + off)
                }
            };
            if matches!(target, Target::Fixed) {
                continue;
            }

            let values = &store.values[block];
            for (k, (r, cc)) in block_entries(decl).enumerate() {
                let row = row_base + decl.of_offset + r;
                match target {
                    Target::State(base) => dr_dz[row][base + cc] += sign * values[k],
                    Target::Param(base) => dr_dx[row][base + cc] += sign * values[k],
                    Target::Fixed => unreachable!(),
                }
            }
        }
    }

    AssembledJacobian {
        n,
        p,
        dr_dz,
        dr_dx,
        local_of_state,
        version,
    }
}
