//! Communicator abstraction for collective execution.
//!
//! The engine never constructs communicators; one is injected at problem
//! construction. Residual norms are reduced through [`Communicator::allreduce_sum`]
//! so that every participant sees the same convergence decision: an iteration
//! step is a synchronization barrier, and a convergence failure is observed
//! collectively (all ranks compute the same norm and take the same branch).

/// Collective operations over a set of cooperating participants.
///
/// Implementations must guarantee that `allreduce_sum` returns the same
/// values on every rank for the same call site; the solvers rely on this to
/// keep all participants in lock-step.
pub trait Communicator: Send + Sync {
    /// Rank of this participant, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of participants.
    fn size(&self) -> usize;

    /// Element-wise sum of `buf` across all participants, result replacing
    /// `buf` on every rank.
    fn allreduce_sum(&self, buf: &mut [f64]);
}

/// Single-process communicator: one rank, reductions are the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allreduce_sum(&self, _buf: &mut [f64]) {}
}
