//! Solver configuration, reports and the solver family.
//!
//! Every iterative solver shares the same convergence-option shape:
//! an iteration bound, absolute and relative residual tolerances, and a
//! choice between raising on non-convergence or reporting it through the
//! solve report.

pub(crate) mod linear;
pub(crate) mod nonlinear;

/// Convergence options shared by all iterative solvers.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverOptions {
    /// Bound on iteration count.
    pub max_iter: usize,
    /// Absolute residual-norm threshold.
    pub atol: f64,
    /// Relative threshold: converged when the norm drops by this factor
    /// from its initial value.
    pub rtol: f64,
    /// Whether exceeding `max_iter` is fatal (raises) instead of being
    /// reported through the solve report.
    pub err_on_non_converge: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_iter: 50,
            atol: 1e-10,
            rtol: 1e-10,
            err_on_non_converge: false,
        }
    }
}

/// Options for the coupled-group Newton solver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NewtonOptions {
    pub solver: SolverOptions,
    /// Bound on backtracking halvings per Newton step.
    pub max_linesearch: usize,
}

impl NewtonOptions {
    pub fn new() -> Self {
        NewtonOptions {
            solver: SolverOptions::default(),
            max_linesearch: 6,
        }
    }
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for nonlinear block Gauss-Seidel.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GaussSeidelOptions {
    pub solver: SolverOptions,
    /// Aitken relaxation of the sweep update.
    pub use_aitken: bool,
    /// Clamp range for the Aitken relaxation factor.
    pub aitken_min_factor: f64,
    pub aitken_max_factor: f64,
}

impl Default for GaussSeidelOptions {
    fn default() -> Self {
        GaussSeidelOptions {
            solver: SolverOptions::default(),
            use_aitken: false,
            aitken_min_factor: 0.1,
            aitken_max_factor: 1.5,
        }
    }
}

/// Per-group nonlinear solver selection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NonlinearSolver {
    /// One ordered evaluation pass; valid only for acyclic, fully explicit
    /// groups.
    SinglePass,
    /// Nonlinear block Gauss-Seidel over coupled children.
    GaussSeidel(GaussSeidelOptions),
    /// Newton's method over the group's assembled system.
    Newton(NewtonOptions),
}

impl NonlinearSolver {
    pub fn gauss_seidel() -> Self {
        NonlinearSolver::GaussSeidel(GaussSeidelOptions::default())
    }

    pub fn newton() -> Self {
        NonlinearSolver::Newton(NewtonOptions::new())
    }
}

impl Default for NonlinearSolver {
    fn default() -> Self {
        NonlinearSolver::SinglePass
    }
}

/// Options for the restarted GMRES backend.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GmresOptions {
    pub solver: SolverOptions,
    /// Krylov subspace size between restarts.
    pub restart: usize,
}

impl Default for GmresOptions {
    fn default() -> Self {
        GmresOptions {
            solver: SolverOptions {
                max_iter: 200,
                atol: 1e-12,
                rtol: 1e-12,
                err_on_non_converge: true,
            },
            restart: 30,
        }
    }
}

/// Options for linear block Gauss-Seidel.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinearGsOptions {
    pub solver: SolverOptions,
}

impl Default for LinearGsOptions {
    fn default() -> Self {
        LinearGsOptions {
            solver: SolverOptions {
                max_iter: 100,
                atol: 1e-12,
                rtol: 1e-12,
                err_on_non_converge: true,
            },
        }
    }
}

/// Per-group linear solver selection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinearSolver {
    /// LU factorization, cached and reused across right-hand sides.
    Direct,
    /// Restarted GMRES through Jacobian-vector products.
    Gmres(GmresOptions),
    /// Linear block Gauss-Seidel over the group's children.
    GaussSeidel(LinearGsOptions),
}

impl LinearSolver {
    pub fn gmres() -> Self {
        LinearSolver::Gmres(GmresOptions::default())
    }

    pub fn gauss_seidel() -> Self {
        LinearSolver::GaussSeidel(LinearGsOptions::default())
    }
}

impl Default for LinearSolver {
    fn default() -> Self {
        LinearSolver::Direct
    }
}

/// Why a nonlinear solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    /// Residual norm fell below `atol`.
    Absolute,
    /// Residual norm fell below `rtol` times its initial value.
    Relative,
    /// The system was acyclic and explicit; one pass is exact.
    SinglePass,
    /// Iteration bound reached without convergence.
    MaxIterations,
}

/// Outcome of a nonlinear solve.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveReport {
    pub converged: bool,
    /// Iterations of the slowest-converging coupled subgroup.
    pub iterations: usize,
    /// Final absolute residual norm over the whole model.
    pub residual_norm: f64,
    pub termination: Termination,
}

impl SolveReport {
    pub(crate) fn single_pass() -> Self {
        SolveReport {
            converged: true,
            iterations: 0,
            residual_norm: 0.0,
            termination: Termination::SinglePass,
        }
    }

    /// Merge a child subgroup's report into the parent's.
    ///
    /// The first failure wins the termination field; otherwise the most
    /// specific convergence reason replaces the single-pass default.
    pub(crate) fn absorb(&mut self, other: &SolveReport) {
        if self.converged && !other.converged {
            self.termination = other.termination;
        } else if self.converged
            && matches!(self.termination, Termination::SinglePass)
            && !matches!(other.termination, Termination::SinglePass)
        {
            self.termination = other.termination;
        }
        self.converged &= other.converged;
        self.iterations = self.iterations.max(other.iterations);
        self.residual_norm = self.residual_norm.max(other.residual_norm);
    }
}
