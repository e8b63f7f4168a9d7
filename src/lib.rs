//! platypus: hierarchical coupled-model solving with exact total
//! derivatives.
//!
//! A model is a tree of groups and leaf components wired together by
//! variable connections, which may be cyclic. The engine converges the
//! coupled nonlinear system (block Gauss-Seidel or Newton per group),
//! linearizes every leaf (analytic partials or colored finite-difference /
//! complex-step approximation), and computes exact total derivatives of
//! any output with respect to any independent value by solving one global
//! linear system in forward or reverse mode.
//!
//! ```
//! use platypus::{FuncComp, IndepVar, Model, Problem};
//!
//! let mut model = Model::new();
//! let root = model.root();
//! model.add_explicit(root, "p", IndepVar::new().add_scalar("x", 3.0)).unwrap();
//! model
//!     .add_explicit(
//!         root,
//!         "square",
//!         FuncComp::new(|i, o| {
//!             let x = i.scalar("x");
//!             o.set_scalar("y", x * x);
//!             Ok(())
//!         })
//!         .input_scalar("x", 0.0)
//!         .output_scalar("y"),
//!     )
//!     .unwrap();
//! model.connect("p.x", "square.x");
//!
//! let mut prob = Problem::new(model);
//! prob.setup().unwrap();
//! prob.run_model().unwrap();
//! assert!((prob.get_scalar("square.y").unwrap() - 9.0).abs() < 1e-12);
//!
//! let totals = prob.compute_totals(&["square.y"], &["p.x"], None).unwrap();
//! assert!((totals.scalar("square.y", "p.x") - 6.0).abs() < 1e-6);
//! ```

pub mod approx_partials;
pub mod builtins;
pub mod coloring;
pub mod comm;
pub mod component;
pub mod derivatives;
pub mod error;
pub mod float;
mod graph;
pub mod jacobian;
pub mod linalg;
pub mod problem;
pub mod solvers;
pub mod system;
pub mod variable;
pub mod vector;

pub use approx_partials::{DerivMethod, FdForm};
pub use builtins::{Balance, FuncComp, IndepVar};
pub use comm::{Communicator, SerialComm};
pub use component::{
    ComponentSetup, ExplicitComponent, ImplicitComponent, Partials, Values, ValuesMut,
};
pub use derivatives::{Totals, TotalsMode};
pub use error::{ComponentError, ConfigurationError, Error, SolveError};
pub use float::Float;
pub use jacobian::LinearOperator;
pub use problem::Problem;
pub use solvers::{
    GaussSeidelOptions, GmresOptions, LinearGsOptions, LinearSolver, NewtonOptions,
    NonlinearSolver, SolveReport, SolverOptions, Termination,
};
pub use system::{Model, SysId};
pub use variable::{VarId, VarMeta, VarRole};
