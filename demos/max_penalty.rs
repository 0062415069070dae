use lcqp_solver::{solve, Problem, SolverOptions, Verbosity};
use nalgebra::{DMatrix, DVector};
use tracing_subscriber::EnvFilter;

/// With the penalty capped at 1 the penalty function stays convex, so the
/// iterate settles on the diagonal and never becomes complementary.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Max Penalty Demo ===\n");

    let problem = Problem::builder(
        DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0])),
        DVector::from_vec(vec![-2.0, -2.0]),
    )
    .complementarity(
        DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
        DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
    )
    .build()
    .expect("problem is well formed");

    for max_penalty in [1.0, 1e8] {
        let options = SolverOptions {
            max_penalty,
            verbosity: Verbosity::None,
            ..Default::default()
        };
        let solution = solve(&problem, options).expect("options are valid");
        println!(
            "max rho {:>8.1e}: {:<22} x = [{:.6}, {:.6}]  compl = {:.3e}",
            max_penalty,
            solution.status.as_str(),
            solution.x[0],
            solution.x[1],
            solution.stats.complementarity
        );
    }
}
