//! The system hierarchy: a tagged arena of groups and leaf components.
//!
//! Groups own ordered child lists and the connections declared between
//! their descendants' variables; components own their variable slices and
//! partial declarations. Edges are index-based within the arena. All
//! structural analysis (connection resolution, cycle detection, execution
//! ordering, range assignment) happens once in [`Model::setup`]; solves
//! never re-derive structure.

use std::collections::BTreeSet;

use crate::approx_partials::DerivMethod;
use crate::component::{
    ComponentSetup, ExplicitComponent, ImplicitComponent, PartialDecl, ResolvedPartial, WrtSlot,
};
use crate::error::ConfigurationError;
use crate::graph::{execution_order, has_self_loop};
use crate::solvers::{LinearSolver, NonlinearSolver};
use crate::variable::{Registry, VarId, VarMeta, VarRole};

/// Identifier of a system (group or component) in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SysId(pub(crate) usize);

/// A leaf's user-supplied behavior: exactly one of the two contracts.
pub(crate) enum Leaf {
    Explicit(Box<dyn ExplicitComponent>),
    Implicit(Box<dyn ImplicitComponent>),
}

impl Leaf {
    pub(crate) fn is_implicit(&self) -> bool {
        matches!(self, Leaf::Implicit(_))
    }
}

/// Leaf slot in the arena.
pub(crate) struct ComponentSlot {
    pub name: String,
    pub path: String,
    pub parent: usize,
    pub leaf: Leaf,
    /// Declared variables, filled at setup.
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
    /// Name-addressed layout of the local input buffer.
    pub input_index: Vec<(String, usize, usize)>,
    /// Name-addressed layout of the output/residual block.
    pub output_index: Vec<(String, usize, usize)>,
    pub input_len: usize,
    pub output_len: usize,
    /// Resolved partial declarations.
    pub partials: Vec<ResolvedPartial>,
    /// Global state offset of this component's first output entry.
    pub state_offset: usize,
}

/// One entry of a group's execution order: either a single child or a
/// strongly coupled set of children solved atomically.
#[derive(Debug, Clone)]
pub(crate) struct ExecUnit {
    /// Arena indices of the member children, in insertion order.
    pub members: Vec<usize>,
    /// Whether the members form a cycle (or a self-loop) and therefore
    /// require an iterative solver.
    pub coupled: bool,
    /// Whether any member is an implicit leaf.
    pub has_implicit: bool,
}

impl ExecUnit {
    pub(crate) fn needs_iteration(&self) -> bool {
        self.coupled || self.has_implicit
    }
}

/// Group slot in the arena.
pub(crate) struct GroupSlot {
    pub name: String,
    pub path: String,
    pub parent: usize,
    pub children: Vec<usize>,
    pub nonlinear: NonlinearSolver,
    pub linear: LinearSolver,
    /// Execution order over children, built at setup.
    pub exec_units: Vec<ExecUnit>,
}

pub(crate) enum SystemNode {
    Component(ComponentSlot),
    Group(GroupSlot),
}

impl SystemNode {
    pub(crate) fn name(&self) -> &str {
        match self {
            SystemNode::Component(c) => &c.name,
            SystemNode::Group(g) => &g.name,
        }
    }

    pub(crate) fn path(&self) -> &str {
        match self {
            SystemNode::Component(c) => &c.path,
            SystemNode::Group(g) => &g.path,
        }
    }

    pub(crate) fn parent(&self) -> usize {
        match self {
            SystemNode::Component(c) => c.parent,
            SystemNode::Group(g) => g.parent,
        }
    }
}

/// Where an input reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Col {
    /// Global state offset of the connected source output.
    State(usize),
    /// Offset into the parameter vector (unconnected input).
    Param(usize),
}

/// The model: system arena, variable registry and resolved structure.
pub struct Model {
    pub(crate) systems: Vec<SystemNode>,
    pub(crate) registry: Registry,
    pending: Vec<(String, String)>,
    // Resolved at setup:
    pub(crate) src_of_input: Vec<Option<VarId>>,
    pub(crate) state_range: Vec<Option<(usize, usize)>>,
    pub(crate) param_range: Vec<Option<(usize, usize)>>,
    pub(crate) state_len: usize,
    pub(crate) param_len: usize,
    /// Per state entry bounds; infinite where unbounded.
    pub(crate) lower: Vec<f64>,
    pub(crate) upper: Vec<f64>,
    /// All leaf components in global execution order.
    pub(crate) comp_order: Vec<usize>,
    is_setup: bool,
}

pub(crate) const NO_PARENT: usize = usize::MAX;

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    /// An empty model with an unnamed root group.
    pub fn new() -> Self {
        Model {
            systems: vec![SystemNode::Group(GroupSlot {
                name: String::new(),
                path: String::new(),
                parent: NO_PARENT,
                children: Vec::new(),
                nonlinear: NonlinearSolver::default(),
                linear: LinearSolver::default(),
                exec_units: Vec::new(),
            })],
            registry: Registry::new(),
            pending: Vec::new(),
            src_of_input: Vec::new(),
            state_range: Vec::new(),
            param_range: Vec::new(),
            state_len: 0,
            param_len: 0,
            lower: Vec::new(),
            upper: Vec::new(),
            comp_order: Vec::new(),
            is_setup: false,
        }
    }

    /// The root group.
    pub fn root(&self) -> SysId {
        SysId(0)
    }

    fn join_path(parent_path: &str, name: &str) -> String {
        if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}.{name}")
        }
    }

    fn check_child_name(&self, parent: SysId, name: &str) -> Result<(), ConfigurationError> {
        let SystemNode::Group(group) = &self.systems[parent.0] else {
            panic!("parent of a child system must be a group");
        };
        if name.is_empty() || name.contains('.') {
            return Err(ConfigurationError::DuplicateName(format!(
                "invalid system name '{name}'"
            )));
        }
        for &child in &group.children {
            if self.systems[child].name() == name {
                return Err(ConfigurationError::DuplicateName(Self::join_path(
                    &group.path,
                    name,
                )));
            }
        }
        Ok(())
    }

    /// Add a child group under `parent`.
    pub fn add_group(&mut self, parent: SysId, name: &str) -> Result<SysId, ConfigurationError> {
        self.check_child_name(parent, name)?;
        let path = Self::join_path(self.systems[parent.0].path(), name);
        let idx = self.systems.len();
        self.systems.push(SystemNode::Group(GroupSlot {
            name: name.to_string(),
            path,
            parent: parent.0,
            children: Vec::new(),
            nonlinear: NonlinearSolver::default(),
            linear: LinearSolver::default(),
            exec_units: Vec::new(),
        }));
        let SystemNode::Group(group) = &mut self.systems[parent.0] else {
            unreachable!()
        };
        group.children.push(idx);
        Ok(SysId(idx))
    }

    fn add_component(
        &mut self,
        parent: SysId,
        name: &str,
        leaf: Leaf,
    ) -> Result<SysId, ConfigurationError> {
        self.check_child_name(parent, name)?;
        let path = Self::join_path(self.systems[parent.0].path(), name);
        let idx = self.systems.len();
        self.systems.push(SystemNode::Component(ComponentSlot {
            name: name.to_string(),
            path,
            parent: parent.0,
            leaf,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_index: Vec::new(),
            output_index: Vec::new(),
            input_len: 0,
            output_len: 0,
            partials: Vec::new(),
            state_offset: 0,
        }));
        let SystemNode::Group(group) = &mut self.systems[parent.0] else {
            unreachable!()
        };
        group.children.push(idx);
        Ok(SysId(idx))
    }

    /// Add an explicit leaf component under `parent`.
    pub fn add_explicit(
        &mut self,
        parent: SysId,
        name: &str,
        comp: impl ExplicitComponent + 'static,
    ) -> Result<SysId, ConfigurationError> {
        self.add_component(parent, name, Leaf::Explicit(Box::new(comp)))
    }

    /// Add an implicit leaf component under `parent`.
    pub fn add_implicit(
        &mut self,
        parent: SysId,
        name: &str,
        comp: impl ImplicitComponent + 'static,
    ) -> Result<SysId, ConfigurationError> {
        self.add_component(parent, name, Leaf::Implicit(Box::new(comp)))
    }

    /// Queue a connection from a source output path to a target input path.
    ///
    /// Validation happens in [`Model::setup`].
    pub fn connect(&mut self, source: &str, target: &str) {
        self.pending.push((source.to_string(), target.to_string()));
    }

    /// Set the nonlinear solver of a group.
    pub fn set_nonlinear_solver(&mut self, group: SysId, solver: NonlinearSolver) {
        let SystemNode::Group(g) = &mut self.systems[group.0] else {
            panic!("nonlinear solvers attach to groups");
        };
        g.nonlinear = solver;
    }

    /// Set the linear solver of a group.
    pub fn set_linear_solver(&mut self, group: SysId, solver: LinearSolver) {
        let SystemNode::Group(g) = &mut self.systems[group.0] else {
            panic!("linear solvers attach to groups");
        };
        g.linear = solver;
    }

    /// Path for diagnostics; the unnamed root displays as `root`.
    pub(crate) fn diag_path(&self, sys: usize) -> String {
        let p = self.systems[sys].path();
        if p.is_empty() {
            "root".to_string()
        } else {
            p.to_string()
        }
    }

    pub(crate) fn comp(&self, idx: usize) -> &ComponentSlot {
        match &self.systems[idx] {
            SystemNode::Component(c) => c,
            SystemNode::Group(_) => panic!("system {idx} is a group, not a component"),
        }
    }

    pub(crate) fn group(&self, idx: usize) -> &GroupSlot {
        match &self.systems[idx] {
            SystemNode::Group(g) => g,
            SystemNode::Component(_) => panic!("system {idx} is a component, not a group"),
        }
    }

    /// Column an input variable reads from.
    pub(crate) fn input_col(&self, input: VarId) -> Col {
        match self.src_of_input[input.0] {
            Some(src) => Col::State(self.state_range[src.0].expect("source has a state range").0),
            None => Col::Param(self.param_range[input.0].expect("unconnected input has a param range").0),
        }
    }

    /// State range `(offset, len)` of an output variable.
    pub(crate) fn state_range_of(&self, var: VarId) -> (usize, usize) {
        self.state_range[var.0].expect("variable is not an output")
    }

    /// Leaf components in the subtree rooted at `sys`, in execution order.
    pub(crate) fn subtree_components(&self, sys: usize) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_components(sys, &mut out);
        out
    }

    fn collect_components(&self, sys: usize, out: &mut Vec<usize>) {
        match &self.systems[sys] {
            SystemNode::Component(_) => out.push(sys),
            SystemNode::Group(g) => {
                for unit in &g.exec_units {
                    for &m in &unit.members {
                        self.collect_components(m, out);
                    }
                }
            }
        }
    }

    /// Whether setup has completed.
    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Execution order of a group's children after setup.
    ///
    /// One entry per topological step; children coupled in a cycle share an
    /// entry and are solved atomically. The order is deterministic for a
    /// given configuration. Panics if `group` is not a group.
    pub fn execution_order(&self, group: SysId) -> Vec<Vec<SysId>> {
        assert!(self.is_setup, "execution order is built at setup");
        self.group(group.0)
            .exec_units
            .iter()
            .map(|u| u.members.iter().map(|&m| SysId(m)).collect())
            .collect()
    }

    // ── Setup ──

    /// Finalize the model: run component setups, resolve connections,
    /// detect coupling, order execution and assign index ranges.
    pub fn setup(&mut self) -> Result<(), ConfigurationError> {
        assert!(!self.is_setup, "setup may only run once");
        self.setup_components()?;
        self.resolve_connections()?;
        self.order_groups()?;
        self.assign_ranges();
        self.is_setup = true;
        Ok(())
    }

    fn setup_components(&mut self) -> Result<(), ConfigurationError> {
        for idx in 0..self.systems.len() {
            let SystemNode::Component(slot) = &self.systems[idx] else {
                continue;
            };
            let (mut cs, supports_complex) = match &slot.leaf {
                Leaf::Explicit(c) => {
                    let mut cs = ComponentSetup::new(VarRole::Output);
                    c.setup(&mut cs);
                    (cs, c.supports_complex())
                }
                Leaf::Implicit(c) => {
                    let mut cs = ComponentSetup::new(VarRole::ImplicitOutput);
                    c.setup(&mut cs);
                    (cs, c.supports_complex())
                }
            };
            let path = slot.path.clone();

            // Local name uniqueness across inputs and outputs
            let mut seen = BTreeSet::new();
            for meta in cs.inputs.iter().chain(cs.outputs.iter()) {
                if !seen.insert(meta.name.clone()) {
                    return Err(ConfigurationError::DuplicateName(format!(
                        "{path}.{}",
                        meta.name
                    )));
                }
            }

            // Register variables and build local layouts
            let mut inputs = Vec::new();
            let mut input_index = Vec::new();
            let mut offset = 0usize;
            for meta in cs.inputs.drain(..) {
                let len = meta.len();
                input_index.push((meta.name.clone(), offset, len));
                offset += len;
                inputs.push(self.register_var(meta, idx, &path)?);
            }
            let input_len = offset;

            let mut outputs = Vec::new();
            let mut output_index = Vec::new();
            let mut out_offset = 0usize;
            for meta in cs.outputs.drain(..) {
                let len = meta.len();
                output_index.push((meta.name.clone(), out_offset, len));
                out_offset += len;
                outputs.push(self.register_var(meta, idx, &path)?);
            }
            let output_len = out_offset;

            let partials = Self::resolve_partials(
                &path,
                &cs.partials,
                &input_index,
                &output_index,
                input_len,
                self.comp(idx).leaf.is_implicit(),
                supports_complex,
            )?;

            let SystemNode::Component(slot) = &mut self.systems[idx] else {
                unreachable!()
            };
            slot.inputs = inputs;
            slot.outputs = outputs;
            slot.input_index = input_index;
            slot.output_index = output_index;
            slot.input_len = input_len;
            slot.output_len = output_len;
            slot.partials = partials;
        }
        Ok(())
    }

    fn register_var(
        &mut self,
        mut meta: VarMeta,
        owner: usize,
        owner_path: &str,
    ) -> Result<VarId, ConfigurationError> {
        meta.path = Self::join_path(owner_path, &meta.name);
        meta.owner = owner;
        if meta.default.len() != meta.len() {
            return Err(ConfigurationError::ValueLength {
                path: meta.path.clone(),
                got: meta.default.len(),
                expected: meta.len(),
            });
        }
        self.registry.register(meta)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_partials(
        comp_path: &str,
        decls: &[PartialDecl],
        input_index: &[(String, usize, usize)],
        output_index: &[(String, usize, usize)],
        input_len: usize,
        is_implicit: bool,
        supports_complex: bool,
    ) -> Result<Vec<ResolvedPartial>, ConfigurationError> {
        let find =
            |index: &[(String, usize, usize)], name: &str| -> Option<(usize, usize, usize)> {
                index
                    .iter()
                    .enumerate()
                    .find(|(_, (n, _, _))| n == name)
                    .map(|(slot, (_, off, len))| (slot, *off, *len))
            };

        let mut resolved: Vec<ResolvedPartial> = Vec::new();
        for d in decls {
            let unknown = || ConfigurationError::UnknownPartial {
                component: comp_path.to_string(),
                of: d.of.clone(),
                wrt: d.wrt.clone(),
            };

            let (of_slot, of_offset, of_len) = find(output_index, &d.of).ok_or_else(unknown)?;

            // `wrt` may be an input, or (implicit leaves only) an own output
            let (wrt_slot, wrt_offset, wrt_len) = if let Some((s, off, len)) =
                find(input_index, &d.wrt)
            {
                (WrtSlot::Input(s), off, len)
            } else if is_implicit {
                let (s, off, len) = find(output_index, &d.wrt).ok_or_else(unknown)?;
                (WrtSlot::Output(s), input_len + off, len)
            } else {
                return Err(unknown());
            };

            if resolved.iter().any(|r| r.of == d.of && r.wrt == d.wrt) {
                return Err(ConfigurationError::DuplicateName(format!(
                    "{comp_path}: partial ({}, {})",
                    d.of, d.wrt
                )));
            }

            if let Some((rows, cols)) = &d.sparsity {
                let in_range = rows.iter().all(|&r| (r as usize) < of_len)
                    && cols.iter().all(|&c| (c as usize) < wrt_len);
                if !in_range {
                    return Err(ConfigurationError::SparsityOutOfRange {
                        component: comp_path.to_string(),
                        of: d.of.clone(),
                        wrt: d.wrt.clone(),
                    });
                }
            }

            match d.method {
                DerivMethod::Analytic => {}
                DerivMethod::Fd { step, .. } => {
                    if !(step.is_finite() && step > 0.0) {
                        return Err(ConfigurationError::InvalidStepSize {
                            component: comp_path.to_string(),
                            step,
                            reason: "step must be positive and finite",
                        });
                    }
                    // Below this the difference quotient is pure round-off
                    if step < 1e3 * f64::EPSILON {
                        return Err(ConfigurationError::InvalidStepSize {
                            component: comp_path.to_string(),
                            step,
                            reason: "step is below finite-difference resolution",
                        });
                    }
                }
                DerivMethod::ComplexStep { step } => {
                    if !(step.is_finite() && step > 0.0) {
                        return Err(ConfigurationError::InvalidStepSize {
                            component: comp_path.to_string(),
                            step,
                            reason: "step must be positive and finite",
                        });
                    }
                    if !supports_complex {
                        return Err(ConfigurationError::ComplexStepUnsupported(
                            comp_path.to_string(),
                        ));
                    }
                }
            }

            resolved.push(ResolvedPartial {
                of: d.of.clone(),
                wrt: d.wrt.clone(),
                of_slot,
                wrt_slot,
                of_offset,
                of_len,
                wrt_offset,
                wrt_len,
                sparsity: d.sparsity.clone(),
                method: d.method,
            });
        }
        Ok(resolved)
    }

    fn resolve_connections(&mut self) -> Result<(), ConfigurationError> {
        self.src_of_input = vec![None; self.registry.len()];
        let pending = std::mem::take(&mut self.pending);
        for (src_path, tgt_path) in &pending {
            let src = self.registry.lookup(src_path)?;
            let tgt = self.registry.lookup(tgt_path)?;
            let src_meta = self.registry.meta(src);
            let tgt_meta = self.registry.meta(tgt);

            if !src_meta.role.is_output() {
                return Err(ConfigurationError::NotAnOutput(src_path.clone()));
            }
            if tgt_meta.role != VarRole::Input {
                return Err(ConfigurationError::NotAnInput(tgt_path.clone()));
            }
            if src_meta.shape != tgt_meta.shape {
                return Err(ConfigurationError::ShapeMismatch {
                    source: src_path.clone(),
                    source_shape: src_meta.shape.clone(),
                    target: tgt_path.clone(),
                    target_shape: tgt_meta.shape.clone(),
                });
            }
            if src_meta.units != tgt_meta.units {
                return Err(ConfigurationError::UnitsMismatch {
                    source: src_path.clone(),
                    source_units: src_meta.units.clone().unwrap_or_else(|| "none".into()),
                    target: tgt_path.clone(),
                    target_units: tgt_meta.units.clone().unwrap_or_else(|| "none".into()),
                });
            }
            if let Some(existing) = self.src_of_input[tgt.0] {
                return Err(ConfigurationError::DuplicateConnection {
                    target: tgt_path.clone(),
                    existing: self.registry.meta(existing).path.clone(),
                });
            }
            self.src_of_input[tgt.0] = Some(src);
        }
        Ok(())
    }

    /// Chain `[sys, parent, .., root]`.
    fn ancestors(&self, mut sys: usize) -> Vec<usize> {
        let mut chain = vec![sys];
        while self.systems[sys].parent() != NO_PARENT {
            sys = self.systems[sys].parent();
            chain.push(sys);
        }
        chain
    }

    /// For a connection between two distinct leaves, the group whose child
    /// ordering the connection affects and the two direct children involved.
    fn lca_edge(&self, a: usize, b: usize) -> (usize, usize, usize) {
        let ca = self.ancestors(a);
        let cb = self.ancestors(b);
        let mut i = ca.len();
        let mut j = cb.len();
        // Walk down from the shared root while the chains agree
        while i > 1 && j > 1 && ca[i - 1] == cb[j - 1] {
            i -= 1;
            j -= 1;
        }
        debug_assert_eq!(ca[i], cb[j], "leaves share the root");
        (ca[i], ca[i - 1], cb[j - 1])
    }

    fn order_groups(&mut self) -> Result<(), ConfigurationError> {
        // Edges per group, over positions in the group's child list
        let mut group_edges: Vec<Vec<(usize, usize)>> = vec![Vec::new(); self.systems.len()];

        for (var_idx, src) in self.src_of_input.iter().enumerate() {
            let Some(src) = src else { continue };
            let tgt_owner = self.registry.meta(VarId(var_idx)).owner;
            let src_owner = self.registry.meta(*src).owner;
            let (lca, src_child, tgt_child) = if src_owner == tgt_owner {
                let parent = self.systems[src_owner].parent();
                (parent, src_owner, tgt_owner)
            } else {
                self.lca_edge(src_owner, tgt_owner)
            };
            let group = self.group(lca);
            let from = group
                .children
                .iter()
                .position(|&c| c == src_child)
                .expect("edge endpoint is a child of its lca");
            let to = group
                .children
                .iter()
                .position(|&c| c == tgt_child)
                .expect("edge endpoint is a child of its lca");
            group_edges[lca].push((from, to));
        }

        for idx in 0..self.systems.len() {
            let SystemNode::Group(group) = &self.systems[idx] else {
                continue;
            };
            let n = group.children.len();
            let children = group.children.clone();
            let group_path = group.path.clone();
            let nonlinear_kind = match group.nonlinear {
                NonlinearSolver::SinglePass => 0u8,
                NonlinearSolver::GaussSeidel(_) => 1,
                NonlinearSolver::Newton(_) => 2,
            };

            let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
            for &(from, to) in &group_edges[idx] {
                if !adj[from].contains(&to) {
                    adj[from].push(to);
                }
            }
            for a in adj.iter_mut() {
                a.sort_unstable();
            }

            let order = execution_order(n, &adj);
            let mut units = Vec::with_capacity(order.len());
            for scc in order {
                let coupled = scc.len() > 1 || has_self_loop(&adj, scc[0]);
                let members: Vec<usize> = scc.iter().map(|&p| children[p]).collect();
                let has_implicit = members.iter().any(|&m| {
                    matches!(&self.systems[m], SystemNode::Component(c) if c.leaf.is_implicit())
                });
                let unit = ExecUnit {
                    members,
                    coupled,
                    has_implicit,
                };

                if unit.needs_iteration() {
                    let detail = if unit.coupled {
                        format!("cycle over {} children", unit.members.len())
                    } else {
                        "implicit component".to_string()
                    };
                    match nonlinear_kind {
                        0 => {
                            return Err(ConfigurationError::SolverRequired {
                                group: group_path.clone(),
                                detail,
                            })
                        }
                        // Gauss-Seidel sweeps cannot drive an implicit leaf
                        1 if unit.has_implicit => {
                            return Err(ConfigurationError::SolverRequired {
                                group: group_path.clone(),
                                detail: "implicit component under Gauss-Seidel".to_string(),
                            })
                        }
                        _ => {}
                    }
                }
                units.push(unit);
            }

            let SystemNode::Group(group) = &mut self.systems[idx] else {
                unreachable!()
            };
            group.exec_units = units;
        }
        Ok(())
    }

    fn assign_ranges(&mut self) {
        self.comp_order = self.subtree_components(0);
        self.state_range = vec![None; self.registry.len()];
        self.param_range = vec![None; self.registry.len()];
        self.lower.clear();
        self.upper.clear();

        let mut state_len = 0usize;
        let mut param_len = 0usize;
        for &c in &self.comp_order.clone() {
            let (outputs, inputs) = {
                let slot = self.comp(c);
                (slot.outputs.clone(), slot.inputs.clone())
            };
            let comp_offset = state_len;
            for var in outputs {
                let meta = self.registry.meta(var);
                let len = meta.len();
                let lo = meta.lower.unwrap_or(f64::NEG_INFINITY);
                let hi = meta.upper.unwrap_or(f64::INFINITY);
                self.state_range[var.0] = Some((state_len, len));
                state_len += len;
                for _ in 0..len {
                    self.lower.push(lo);
                    self.upper.push(hi);
                }
            }
            for var in inputs {
                if self.src_of_input[var.0].is_none() {
                    let len = self.registry.meta(var).len();
                    self.param_range[var.0] = Some((param_len, len));
                    param_len += len;
                }
            }
            let SystemNode::Component(slot) = &mut self.systems[c] else {
                unreachable!()
            };
            slot.state_offset = comp_offset;
        }
        self.state_len = state_len;
        self.param_len = param_len;
    }
}
