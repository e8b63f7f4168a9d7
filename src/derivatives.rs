//! Total derivatives across the coupled hierarchy.
//!
//! With every output entry a state `z` and every unconnected input a
//! parameter `x`, the converged model satisfies `R(z, x) = 0` and the
//! totals follow from one global linear system:
//!
//! - forward, per seed column: `(dR/dz) · dz = -(dR/dx) · e_j`, reading the
//!   requested rows out of `dz`;
//! - reverse, per requested row: `(dR/dz)^T · λ = e_r`, then
//!   `d r / d x = -λ^T · (dR/dx)`.
//!
//! Cost scales with the number of seeds, so the mode is chosen by whichever
//! side has fewer entries (forward on ties); the numeric result is the same
//! either way, up to linear-solver tolerance. One factorization is shared
//! across all seeds of a request when the direct backend is active.

use std::collections::BTreeMap;

use crate::error::{ConfigurationError, Error};
use crate::jacobian::{assemble, linearize_component, ComponentPartials};
use crate::solvers::linear::{solve_linear, LinearCache, SolveMode};
use crate::system::{Col, Leaf, Model};
use crate::variable::VarRole;
use crate::vector::Vectors;

/// Direction of a total-derivative computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsMode {
    Forward,
    Reverse,
}

/// Total derivatives keyed by `(of_path, wrt_path)`.
///
/// Each entry is a row-major matrix with shape
/// `(len(of variable), len(wrt variable))`.
#[derive(Debug, Default)]
pub struct Totals {
    map: BTreeMap<(String, String), Vec<Vec<f64>>>,
}

impl Totals {
    /// The derivative matrix for one pair, if it was requested.
    pub fn get(&self, of: &str, wrt: &str) -> Option<&Vec<Vec<f64>>> {
        self.map.get(&(of.to_string(), wrt.to_string()))
    }

    /// Scalar derivative for a pair of length-1 variables.
    pub fn scalar(&self, of: &str, wrt: &str) -> f64 {
        self.get(of, wrt).expect("pair was requested")[0][0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &Vec<Vec<f64>>)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// How one `wrt` variable seeds the linear system.
enum Seed {
    /// Columns of `dR/dx` (an unconnected input).
    Param { offset: usize, len: usize },
    /// Unit columns on an independent source output's own residual rows.
    Source { offset: usize, len: usize },
}

struct WrtEntry {
    path: String,
    seed: Seed,
    len: usize,
}

struct OfEntry {
    path: String,
    /// Global state offset of the variable's rows.
    offset: usize,
    len: usize,
}

fn resolve_of(model: &Model, path: &str) -> Result<OfEntry, ConfigurationError> {
    let id = model.registry.lookup(path)?;
    let meta = model.registry.meta(id);
    if !meta.role.is_output() {
        return Err(ConfigurationError::NotAnOutput(path.to_string()));
    }
    let (offset, len) = model.state_range_of(id);
    Ok(OfEntry {
        path: path.to_string(),
        offset,
        len,
    })
}

fn resolve_wrt(model: &Model, path: &str) -> Result<WrtEntry, ConfigurationError> {
    let id = model.registry.lookup(path)?;
    let meta = model.registry.meta(id);
    match meta.role {
        VarRole::Input => match model.input_col(id) {
            Col::Param(offset) => Ok(WrtEntry {
                path: path.to_string(),
                seed: Seed::Param {
                    offset,
                    len: meta.len(),
                },
                len: meta.len(),
            }),
            Col::State(_) => Err(ConfigurationError::InvalidWrt(path.to_string())),
        },
        VarRole::Output => {
            // Independent source: an explicit leaf with no inputs holds its
            // outputs as free values
            let slot = model.comp(meta.owner);
            let is_source = matches!(slot.leaf, Leaf::Explicit(_)) && slot.inputs.is_empty();
            if !is_source {
                return Err(ConfigurationError::InvalidWrt(path.to_string()));
            }
            let (offset, len) = model.state_range_of(id);
            Ok(WrtEntry {
                path: path.to_string(),
                seed: Seed::Source { offset, len },
                len,
            })
        }
        VarRole::ImplicitOutput => Err(ConfigurationError::InvalidWrt(path.to_string())),
    }
}

/// Linearize every leaf, assemble the global system and solve for the
/// requested totals.
///
/// The caller guarantees the state is a converged solution.
pub(crate) fn compute_totals(
    model: &Model,
    vectors: &Vectors,
    partials: &mut [Option<ComponentPartials>],
    caches: &mut BTreeMap<usize, LinearCache>,
    of: &[&str],
    wrt: &[&str],
    mode: Option<TotalsMode>,
) -> Result<Totals, Error> {
    let ofs: Vec<OfEntry> = of
        .iter()
        .map(|p| resolve_of(model, p))
        .collect::<Result<_, _>>()?;
    let wrts: Vec<WrtEntry> = wrt
        .iter()
        .map(|p| resolve_wrt(model, p))
        .collect::<Result<_, _>>()?;

    let mut totals = Totals::default();
    if ofs.is_empty() || wrts.is_empty() {
        return Ok(totals);
    }

    // Linearize at the converged state and assemble with parameter columns
    for &c in &model.comp_order {
        let store = partials[c].as_mut().expect("leaf has a partials store");
        linearize_component(model, vectors, c, store)?;
    }
    let jac = assemble(model, partials, &model.comp_order, true, vectors.version());
    debug_assert_eq!(jac.p, model.param_len);
    debug_assert!(jac.is_valid_for(vectors.version()));

    let n_of: usize = ofs.iter().map(|o| o.len).sum();
    let n_wrt: usize = wrts.iter().map(|w| w.len).sum();
    let mode = mode.unwrap_or(if n_of < n_wrt {
        TotalsMode::Reverse
    } else {
        TotalsMode::Forward
    });

    // Per-leaf blocks for the iterative block backend; a dedicated cache
    // key keeps totals factorizations apart from the solvers' own
    let blocks: Vec<(usize, usize)> = model
        .comp_order
        .iter()
        .map(|&c| {
            let slot = model.comp(c);
            let local = jac.local_of_state[slot.state_offset].expect("leaf rows are assembled");
            (local, slot.output_len)
        })
        .collect();
    let root = model.group(0);
    let linear = root.linear.clone();
    let cache = caches.entry(usize::MAX).or_default();

    for (&of_path, o) in of.iter().zip(ofs.iter()) {
        for (&wrt_path, w) in wrt.iter().zip(wrts.iter()) {
            totals.map.insert(
                (of_path.to_string(), wrt_path.to_string()),
                vec![vec![0.0; w.len]; o.len],
            );
        }
    }

    match mode {
        TotalsMode::Forward => {
            let mut rhs = vec![0.0; jac.n];
            for w in &wrts {
                for j in 0..w.len {
                    for v in rhs.iter_mut() {
                        *v = 0.0;
                    }
                    match w.seed {
                        Seed::Param { offset, .. } => {
                            for (i, row) in jac.dr_dx.iter().enumerate() {
                                rhs[i] = -row[offset + j];
                            }
                        }
                        Seed::Source { offset, .. } => {
                            let local = jac.local_of_state[offset + j].expect("source row is local");
                            rhs[local] = 1.0;
                        }
                    }

                    let dz = solve_linear(
                        &linear,
                        &jac,
                        &rhs,
                        SolveMode::Forward,
                        cache,
                        &blocks,
                        "totals",
                    )?;

                    for o in &ofs {
                        let m = totals
                            .map
                            .get_mut(&(o.path.clone(), w.path.clone()))
                            .expect("pair allocated");
                        for r in 0..o.len {
                            let local =
                                jac.local_of_state[o.offset + r].expect("of row is local");
                            m[r][j] = dz[local];
                        }
                    }
                }
            }
        }
        TotalsMode::Reverse => {
            let mut rhs = vec![0.0; jac.n];
            for o in &ofs {
                for r in 0..o.len {
                    for v in rhs.iter_mut() {
                        *v = 0.0;
                    }
                    let local = jac.local_of_state[o.offset + r].expect("of row is local");
                    rhs[local] = 1.0;

                    let lambda = solve_linear(
                        &linear,
                        &jac,
                        &rhs,
                        SolveMode::Reverse,
                        cache,
                        &blocks,
                        "totals",
                    )?;

                    for w in &wrts {
                        let m = totals
                            .map
                            .get_mut(&(o.path.clone(), w.path.clone()))
                            .expect("pair allocated");
                        for j in 0..w.len {
                            m[r][j] = match w.seed {
                                Seed::Param { offset, .. } => {
                                    let mut sum = 0.0;
                                    for (i, row) in jac.dr_dx.iter().enumerate() {
                                        sum += lambda[i] * row[offset + j];
                                    }
                                    -sum
                                }
                                Seed::Source { offset, .. } => {
                                    let local = jac.local_of_state[offset + j]
                                        .expect("source row is local");
                                    lambda[local]
                                }
                            };
                        }
                    }
                }
            }
        }
    }

    Ok(totals)
}
