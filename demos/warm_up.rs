use lcqp_solver::{LcqpSolver, MemorySink, Problem, SolverOptions, Verbosity};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== LCQP Warm-Up Demo ===\n");
    println!("minimize (x1 - 1)^2 + (x2 - 1)^2  s.t.  0 <= x1 ⟂ x2 >= 0\n");

    let problem = Problem::builder(
        DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0])),
        DVector::from_vec(vec![-2.0, -2.0]),
    )
    .complementarity(
        DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
        DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
    )
    .build()
    .expect("warm-up problem is well formed");

    let options = SolverOptions {
        verbosity: Verbosity::InnerLoopIterates,
        ..Default::default()
    };
    let sink = Arc::new(MemorySink::new());
    let solver = LcqpSolver::new(options)
        .expect("default options are valid")
        .with_diagnostics(sink.clone());

    let solution = solver.run(&problem);

    println!("{:>5} {:>5} {:>12} {:>12} {:>12} {:>8}", "outer", "inner", "rho", "compl", "stat", "alpha");
    for r in sink.records() {
        println!(
            "{:>5} {:>5} {:>12.4e} {:>12.4e} {:>12.4e} {:>8.3}",
            r.outer_iteration, r.inner_iteration, r.penalty, r.complementarity, r.stationarity, r.step_length
        );
    }

    println!("\nStatus:      {}", solution.status);
    println!("Stationarity: {}", solution.stationarity_type);
    println!("x = [{:.6}, {:.6}]", solution.x[0], solution.x[1]);
    println!("objective = {:.6}", solution.stats.objective);
    println!(
        "{} outer / {} inner iterations, final rho = {:e}",
        solution.stats.outer_iterations, solution.stats.inner_iterations, solution.stats.final_penalty
    );
}
