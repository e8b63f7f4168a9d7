//! Variable metadata and the model-wide registry.
//!
//! Every input and output declared by a component is registered here with
//! its shape, units, bounds and default value. At setup the registry
//! resolves each variable to a contiguous index range: outputs (explicit and
//! implicit alike) map into the state vector, unconnected inputs map into
//! the parameter vector, and connected inputs alias their source output's
//! range.

use std::collections::BTreeMap;

use crate::error::ConfigurationError;

/// Identifier of a registered variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Role of a variable on its owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRole {
    /// Read by the component; connected to exactly one source output or
    /// left unconnected with a default value.
    Input,
    /// Produced by an explicit component's compute.
    Output,
    /// State of an implicit component, driven by its residual.
    ImplicitOutput,
}

impl VarRole {
    pub fn is_output(&self) -> bool {
        matches!(self, VarRole::Output | VarRole::ImplicitOutput)
    }
}

/// Metadata for one declared variable.
#[derive(Debug, Clone)]
pub struct VarMeta {
    /// Local name on the owning component.
    pub name: String,
    /// Full dotted path from the model root.
    pub path: String,
    /// Declared shape; the flattened length is the product of its entries.
    pub shape: Vec<usize>,
    /// Units label, compared for equality when connecting.
    pub units: Option<String>,
    /// Lower bound applied uniformly over all entries.
    pub lower: Option<f64>,
    /// Upper bound applied uniformly over all entries.
    pub upper: Option<f64>,
    pub role: VarRole,
    /// Default (initial) value, flattened.
    pub default: Vec<f64>,
    /// Arena index of the owning component.
    pub(crate) owner: usize,
}

impl VarMeta {
    /// Flattened length.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Model-wide variable table with path lookup.
#[derive(Debug, Default)]
pub struct Registry {
    vars: Vec<VarMeta>,
    by_path: BTreeMap<String, VarId>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a variable under its full path.
    pub(crate) fn register(&mut self, meta: VarMeta) -> Result<VarId, ConfigurationError> {
        if self.by_path.contains_key(&meta.path) {
            return Err(ConfigurationError::DuplicateName(meta.path.clone()));
        }
        let id = VarId(self.vars.len());
        self.by_path.insert(meta.path.clone(), id);
        self.vars.push(meta);
        Ok(id)
    }

    /// Look up a variable by full path.
    pub fn lookup(&self, path: &str) -> Result<VarId, ConfigurationError> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownVariable(path.to_string()))
    }

    pub fn meta(&self, id: VarId) -> &VarMeta {
        &self.vars[id.0]
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over all `(id, meta)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, &VarMeta)> {
        self.vars.iter().enumerate().map(|(i, m)| (VarId(i), m))
    }
}
