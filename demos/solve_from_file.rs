use lcqp_solver::{LcqpSolver, Problem, SolverOptions};
use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Usage: solve_from_file [problem.json] [options.json]
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let problem_path = args
        .next()
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/data/warm_up.json").to_string());

    let problem = match Problem::from_json_file(&problem_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to load {}: {}", problem_path, e);
            return ExitCode::FAILURE;
        }
    };

    let options = match args.next() {
        Some(path) => match std::fs::read_to_string(&path)
            .map_err(Into::into)
            .and_then(|s| SolverOptions::from_json_str(&s))
        {
            Ok(o) => o,
            Err(e) => {
                eprintln!("failed to load options {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => SolverOptions::default(),
    };

    let solver = match LcqpSolver::new(options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("invalid options: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "Solving {} ({} vars, {} constraints, {} pairs) with {}",
        problem_path,
        problem.num_vars(),
        problem.num_constraints(),
        problem.num_complementarities(),
        solver.backend_name()
    );

    let solution = solver.run(&problem);
    match serde_json::to_string_pretty(&solution) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to encode solution: {}", e),
    }

    if solution.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
