use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome of an LCQP solve.
///
/// Every run produces exactly one of these. Budget exhaustion and penalty
/// exhaustion are expected outcomes and come back as values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    /// Stationary and complementary within tolerance.
    SuccessfulReturn,
    /// Penalty hit its ceiling while the iterate was still not complementary.
    MaxPenaltyReached,
    /// Outer or inner iteration cap exhausted.
    MaxIterationsReached,
    /// The very first (initialization) subproblem could not be solved.
    InitialSubproblemFailed,
    /// A subproblem solve failed or could not be regularized.
    QpSolverFailed,
    /// Problem data rejected at load time.
    InvalidProblem,
    /// Cancelled by the caller or out of wall-clock budget.
    Aborted,
}

impl ReturnStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ReturnStatus::SuccessfulReturn)
    }

    /// Outcomes that still carry a meaningful best iterate.
    pub fn has_iterate(&self) -> bool {
        !matches!(
            self,
            ReturnStatus::InvalidProblem | ReturnStatus::InitialSubproblemFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::SuccessfulReturn => "SUCCESSFUL_RETURN",
            ReturnStatus::MaxPenaltyReached => "MAX_PENALTY_REACHED",
            ReturnStatus::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            ReturnStatus::InitialSubproblemFailed => "INITIAL_FAILED",
            ReturnStatus::QpSolverFailed => "QP_SOLVER_FAILED",
            ReturnStatus::InvalidProblem => "INVALID_PROBLEM",
            ReturnStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a complementarity-stationary point, from weakest to
/// strongest. Only meaningful after a successful solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StationarityType {
    NotSolved,
    Weak,
    Clarke,
    Mordukhovich,
    Strong,
}

impl StationarityType {
    pub fn short_name(&self) -> &'static str {
        match self {
            StationarityType::NotSolved => "-",
            StationarityType::Weak => "W",
            StationarityType::Clarke => "C",
            StationarityType::Mordukhovich => "M",
            StationarityType::Strong => "S",
        }
    }
}

impl fmt::Display for StationarityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
