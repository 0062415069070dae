//! Penalty method for linear complementarity quadratic programs (LCQPs).
//!
//! The complementarity constraints are moved into the objective as the
//! bilinear penalty `rho (L x - lbL)^T (R x - lbR)`, and a sequence of convex
//! QPs is solved while `rho` grows until the iterate is complementary.

mod problem;
mod options;
mod diagnostics;
mod subproblem;
pub mod stationarity;
mod context;
mod inner;
mod outer;
mod solution;

pub use problem::{MatrixData, Problem, ProblemBuilder, ProblemData};
pub use options::{SolverOptions, Verbosity, EPS};
pub use diagnostics::{CancelToken, DiagnosticsSink, IterationRecord, LoopPhase, MemorySink, NullSink, TracingSink};
pub use subproblem::SubproblemBuilder;
pub use inner::{InnerResult, InnerStatus};
pub use outer::{solve, LcqpSolver};
pub use solution::{LcqpSolution, SolveStats, WarmStart};

pub use lcqp_qp::{QpBackendChoice, SolverBackend};
pub use lcqp_types::{LcqpError, Result, ReturnStatus, StationarityType};

#[cfg(test)]
mod tests;
