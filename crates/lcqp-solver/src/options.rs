use lcqp_qp::{BackendSettings, QpBackendChoice};
use lcqp_types::{LcqpError, Result};
use serde::{Deserialize, Serialize};

/// Machine epsilon used to scale the default tolerances
pub const EPS: f64 = f64::EPSILON;

/// How much of the iteration history reaches the diagnostics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Verbosity {
    None,
    #[default]
    OuterLoopIterates,
    InnerLoopIterates,
    /// Inner iterates plus the QP backend's own output.
    SubproblemSolverIterates,
}

/// Solver configuration, validated once when the solver is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Inner loop stops once the penalty stationarity residual drops below this.
    pub stationarity_tolerance: f64,
    /// Success requires the complementarity residual below this.
    pub complementarity_tolerance: f64,
    pub initial_penalty: f64,
    pub penalty_growth_factor: f64,
    /// The penalty is clamped here and never exceeds it.
    pub max_penalty: f64,
    /// Number of penalty levels that may be visited.
    pub max_outer_iterations: usize,
    /// Subproblem solves per penalty level.
    pub max_inner_iterations: usize,
    /// Solve the first subproblem without the penalty term when no x0 is given.
    pub solve_zero_penalty_first: bool,
    /// History length of the dynamic penalty check (0 disables it).
    pub dynamic_penalty_window: usize,
    /// Required decrease factor of the dynamic penalty check.
    pub dynamic_penalty_eta: f64,
    /// Nudge iterates off symmetric saddle points of the merit function.
    pub perturb_step: bool,
    /// Inner loop also stops when the accepted step is this small.
    pub step_tolerance: f64,
    /// Allowed relative merit increase for a non-descent full step.
    pub merit_tolerance: f64,
    /// First diagonal shift, relative to max(1, max |Q_ii|).
    pub regularization_initial: f64,
    pub regularization_growth: f64,
    pub regularization_max_attempts: usize,
    pub qp_backend: QpBackendChoice,
    pub qp_max_iterations: u32,
    pub qp_tolerance: f64,
    pub verbosity: Verbosity,
    pub time_limit_seconds: Option<f64>,
    /// Keep every iteration record in the solve statistics.
    pub store_steps: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            stationarity_tolerance: 1.0e6 * EPS,
            complementarity_tolerance: 1.0e3 * EPS,
            initial_penalty: 0.01,
            penalty_growth_factor: 2.0,
            max_penalty: 1.0e8,
            max_outer_iterations: 100,
            max_inner_iterations: 1000,
            solve_zero_penalty_first: true,
            dynamic_penalty_window: 3,
            dynamic_penalty_eta: 0.9,
            perturb_step: true,
            step_tolerance: 1.0e2 * EPS,
            merit_tolerance: 1.0e3 * EPS,
            regularization_initial: 1.0e-8,
            regularization_growth: 10.0,
            regularization_max_attempts: 10,
            qp_backend: QpBackendChoice::DenseActiveSet,
            qp_max_iterations: 10_000,
            qp_tolerance: 1.0e-10,
            verbosity: Verbosity::OuterLoopIterates,
            time_limit_seconds: None,
            store_steps: false,
        }
    }
}

impl SolverOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: SolverOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        positive("stationarity_tolerance", self.stationarity_tolerance)?;
        positive("complementarity_tolerance", self.complementarity_tolerance)?;
        positive("initial_penalty", self.initial_penalty)?;
        positive("regularization_initial", self.regularization_initial)?;
        positive("qp_tolerance", self.qp_tolerance)?;
        non_negative("step_tolerance", self.step_tolerance)?;
        non_negative("merit_tolerance", self.merit_tolerance)?;

        if !(self.penalty_growth_factor > 1.0) || !self.penalty_growth_factor.is_finite() {
            return Err(invalid(format!(
                "penalty_growth_factor must be finite and > 1, got {}",
                self.penalty_growth_factor
            )));
        }
        if !(self.max_penalty >= self.initial_penalty) || !self.max_penalty.is_finite() {
            return Err(invalid(format!(
                "max_penalty ({}) must be finite and >= initial_penalty ({})",
                self.max_penalty, self.initial_penalty
            )));
        }
        if self.max_outer_iterations == 0 || self.max_inner_iterations == 0 {
            return Err(invalid("iteration limits must be at least 1".to_string()));
        }
        if self.dynamic_penalty_window > 0
            && !(self.dynamic_penalty_eta > 0.0 && self.dynamic_penalty_eta < 1.0)
        {
            return Err(invalid(format!(
                "dynamic_penalty_eta must lie in (0, 1), got {}",
                self.dynamic_penalty_eta
            )));
        }
        if !(self.regularization_growth > 1.0) || self.regularization_max_attempts == 0 {
            return Err(invalid(
                "regularization needs growth > 1 and at least one attempt".to_string(),
            ));
        }
        if self.qp_max_iterations == 0 {
            return Err(invalid("qp_max_iterations must be at least 1".to_string()));
        }
        if let Some(limit) = self.time_limit_seconds {
            positive("time_limit_seconds", limit)?;
        }
        Ok(())
    }

    /// Settings handed to the QP backend factory.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            max_iterations: self.qp_max_iterations,
            tolerance: self.qp_tolerance,
            verbose: self.verbosity >= Verbosity::SubproblemSolverIterates,
        }
    }
}

fn invalid(msg: String) -> LcqpError {
    LcqpError::InvalidOptions(msg)
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must be positive and finite, got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must be non-negative and finite, got {}", name, value)))
    }
}
