//! Convex QP layer: the two-sided QP model, the backend contract and the
//! concrete backends used to solve penalty subproblems.

mod qp_model;
mod backend;
mod active_set_backend;
mod clarabel_backend;
pub mod matrix_utils;

pub use qp_model::QpModel;
pub use backend::{
    BackendSettings, QpBackendChoice, QpSolution, QpStatus, QpWarmStart, SolverBackend,
};
pub use active_set_backend::ActiveSetSolver;
pub use clarabel_backend::ClarabelSolver;
