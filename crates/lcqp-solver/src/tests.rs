// Solver-level tests on small LCQPs with known solutions

#[cfg(test)]
mod tests {
    use crate::*;
    use lcqp_qp::{ActiveSetSolver, QpModel, QpSolution, QpStatus, QpWarmStart};
    use nalgebra::{DMatrix, DVector};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// min (x1 - 1)^2 + (x2 - 1)^2  s.t.  0 <= x1 ⟂ x2 >= 0
    fn warm_up() -> ProblemBuilder {
        Problem::builder(
            DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0])),
            DVector::from_vec(vec![-2.0, -2.0]),
        )
        .complementarity(
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
        )
    }

    fn quiet() -> SolverOptions {
        SolverOptions {
            verbosity: Verbosity::None,
            ..Default::default()
        }
    }

    /// Two coupled pairs: x1 ⟂ x2 and x3 ⟂ x4
    fn two_pairs() -> Problem {
        Problem::builder(
            DMatrix::from_row_slice(4, 4, &[
                2.0, 1.0, 0.0, 0.0,
                1.0, 2.0, 0.0, 0.0,
                0.0, 0.0, 2.0, 1.0,
                0.0, 0.0, 1.0, 2.0,
            ]),
            DVector::from_vec(vec![-3.0, -1.0, -2.0, -4.0]),
        )
        .complementarity(
            DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            DMatrix::from_row_slice(2, 4, &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]),
        )
        .build()
        .unwrap()
    }

    /// Solves the first `budget` subproblems, then reports a numerical error.
    struct FailingAfter {
        inner: ActiveSetSolver,
        budget: usize,
        calls: AtomicUsize,
    }

    impl SolverBackend for FailingAfter {
        fn solve_qp(&self, model: &QpModel, warm_start: Option<&QpWarmStart>) -> Result<QpSolution> {
            let mut solution = self.inner.solve_qp(model, warm_start)?;
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.budget {
                solution.status = QpStatus::NumericalError;
            }
            Ok(solution)
        }

        fn requires_positive_definite(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "failing-after"
        }
    }

    fn on_axis(x: &[f64]) -> bool {
        let near = |a: f64, b: f64| (a - b).abs() < 1e-6;
        (near(x[0], 1.0) && near(x[1], 0.0)) || (near(x[0], 0.0) && near(x[1], 1.0))
    }

    #[test]
    fn test_warm_up_reaches_axis() {
        let problem = warm_up().build().unwrap();
        let solution = solve(&problem, quiet()).unwrap();

        assert_eq!(solution.status, ReturnStatus::SuccessfulReturn);
        assert!(on_axis(&solution.x), "x = {:?}", solution.x);
        assert!(solution.stats.complementarity <= 1e3 * EPS);
        assert!((solution.stats.objective + 1.0).abs() < 1e-6);
        // Isolated solution, no bi-active pair
        assert_eq!(solution.stationarity_type, StationarityType::Strong);
        assert!(solution.stats.outer_iterations >= 1);
    }

    #[test]
    fn test_duals_are_lcqp_duals_on_success() {
        let problem = warm_up().build().unwrap();
        let solution = solve(&problem, quiet()).unwrap();
        assert!(solution.is_success());

        let x = DVector::from_column_slice(&solution.x);
        let y = DVector::from_column_slice(&solution.y);
        let residual = stationarity::lcqp_stationarity(&problem, &x, &y).amax();
        assert!(residual < 1e-8, "residual = {residual}");

        // The pair that is at zero carries multiplier -2
        let (y_l, y_r) = solution.complementarity_duals(&problem);
        let active = if solution.x[0] < 0.5 { y_l[0] } else { y_r[0] };
        assert!((active + 2.0).abs() < 1e-6);
        assert!(solution.constraint_duals(&problem).is_empty());
    }

    #[test]
    fn test_small_max_penalty_stops_on_diagonal() {
        let problem = warm_up().build().unwrap();
        let options = SolverOptions {
            max_penalty: 1.0,
            ..quiet()
        };
        let solution = solve(&problem, options).unwrap();

        assert_eq!(solution.status, ReturnStatus::MaxPenaltyReached);
        assert_eq!(solution.stationarity_type, StationarityType::NotSolved);
        assert_eq!(solution.stats.final_penalty, 1.0);
        // Minimizer of the penalty function at rho = 1
        for xi in &solution.x {
            assert!((xi - 2.0 / 3.0).abs() < 1e-6, "x = {:?}", solution.x);
        }
        assert!(problem.max_violation(&DVector::from_column_slice(&solution.x)) <= 1e-12);
    }

    #[test]
    fn test_general_constraint_is_respected() {
        let problem = warm_up()
            .constraints(
                DMatrix::from_row_slice(1, 2, &[1.0, -1.0]),
                Some(DVector::from_vec(vec![-0.5])),
                None,
            )
            .build()
            .unwrap();
        let solution = solve(&problem, quiet()).unwrap();

        assert!(solution.is_success());
        let x = DVector::from_column_slice(&solution.x);
        assert!(problem.max_violation(&x) <= 1e-9);
        assert!(problem.complementarity_residual(&x) <= 1e3 * EPS);

        let y = DVector::from_column_slice(&solution.y);
        let residual = stationarity::lcqp_stationarity(&problem, &x, &y).amax();
        assert!(residual < 1e-8, "residual = {residual}");

        // x1 - x2 >= -0.5: positive multiplier when it holds with equality,
        // zero when it is slack.
        let y_a = solution.constraint_duals(&problem);
        assert_eq!(y_a.len(), 1);
        let slack = x[0] - x[1] + 0.5;
        if slack > 1e-9 {
            assert!(y_a[0].abs() < 1e-8, "slack {slack}, y_A = {}", y_a[0]);
        } else {
            assert!(y_a[0] >= -1e-8, "active lower bound with y_A = {}", y_a[0]);
        }
    }

    #[test]
    fn test_without_complementarity_matches_backend() {
        // min |x - 1|^2 s.t. x1 + x2 <= 1
        let q = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0]));
        let g = DVector::from_vec(vec![-2.0, -2.0]);
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let ub = DVector::from_vec(vec![1.0]);
        let problem = Problem::builder(q.clone(), g.clone())
            .constraints(a.clone(), None, Some(ub.clone()))
            .build()
            .unwrap();

        let solution = solve(&problem, quiet()).unwrap();
        assert!(solution.is_success());
        assert_eq!(solution.stationarity_type, StationarityType::Strong);

        let model = QpModel::new(q, g, a, DVector::from_vec(vec![f64::NEG_INFINITY]), ub);
        let direct = ActiveSetSolver::new().solve_qp(&model, None).unwrap();
        for (a, b) in solution.x.iter().zip(direct.x.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!((solution.x[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_solution_as_warm_start_needs_no_new_level() {
        let problem = warm_up().build().unwrap();
        let solver = LcqpSolver::new(quiet()).unwrap();
        let first = solver.run(&problem);
        assert!(first.is_success());

        let second = solver.run_from(&problem, &first.warm_start());
        assert!(second.is_success());
        assert!(second.stats.outer_iterations <= 1);
        for (a, b) in first.x.iter().zip(second.x.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mismatched_warm_start_is_invalid() {
        let problem = warm_up().build().unwrap();
        let solver = LcqpSolver::new(quiet()).unwrap();
        let solution = solver.run_from(&problem, &WarmStart::primal(vec![1.0, 2.0, 3.0]));
        assert_eq!(solution.status, ReturnStatus::InvalidProblem);
        assert_eq!(solution.stats.inner_iterations, 0);
    }

    #[test]
    fn test_invalid_options_rejected_up_front() {
        let problem = warm_up().build().unwrap();
        let options = SolverOptions {
            penalty_growth_factor: 1.0,
            ..quiet()
        };
        let err = solve(&problem, options).unwrap_err();
        assert!(matches!(err, LcqpError::InvalidOptions(_)));
    }

    #[test]
    fn test_cancelled_token_aborts_with_iterate() {
        let problem = warm_up().build().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let solver = LcqpSolver::new(quiet()).unwrap().with_cancel_token(token);
        let solution = solver.run(&problem);

        assert_eq!(solution.status, ReturnStatus::Aborted);
        assert_eq!(solution.x.len(), 2);
        assert_eq!(solution.stats.outer_iterations, 0);
    }

    #[test]
    fn test_penalty_history_monotone_and_bounded() {
        let problem = warm_up().build().unwrap();
        let options = SolverOptions {
            max_penalty: 100.0,
            ..quiet()
        };
        let solution = solve(&problem, options).unwrap();
        let history = &solution.stats.penalty_history;
        assert_eq!(history[0], 0.01);
        assert!(history.windows(2).all(|w| w[0] <= w[1]));
        assert!(history.iter().all(|&rho| rho <= 100.0));
        assert_eq!(*history.last().unwrap(), solution.stats.final_penalty);
    }

    #[test]
    fn test_verbosity_filters_sink() {
        let problem = warm_up().build().unwrap();

        let sink = Arc::new(MemorySink::new());
        let solver = LcqpSolver::new(quiet()).unwrap().with_diagnostics(sink.clone());
        solver.run(&problem);
        assert!(sink.is_empty());

        let sink = Arc::new(MemorySink::new());
        let options = SolverOptions {
            verbosity: Verbosity::OuterLoopIterates,
            ..Default::default()
        };
        LcqpSolver::new(options).unwrap().with_diagnostics(sink.clone()).run(&problem);
        let records = sink.records();
        assert!(records.iter().all(|r| r.is_outer()));
        assert_eq!(records.first().map(|r| r.phase), Some(LoopPhase::Initialization));
        assert_eq!(records.last().map(|r| r.phase), Some(LoopPhase::Terminated));

        let sink = Arc::new(MemorySink::new());
        let options = SolverOptions {
            verbosity: Verbosity::InnerLoopIterates,
            ..Default::default()
        };
        LcqpSolver::new(options).unwrap().with_diagnostics(sink.clone()).run(&problem);
        assert!(sink.records().iter().any(|r| r.phase == LoopPhase::Inner));
    }

    #[test]
    fn test_store_steps_keeps_trace() {
        let problem = warm_up().build().unwrap();
        let options = SolverOptions {
            store_steps: true,
            ..quiet()
        };
        let solution = solve(&problem, options).unwrap();
        let inner = solution
            .stats
            .trace
            .iter()
            .filter(|r| r.phase == LoopPhase::Inner)
            .count();
        // Every solve except the initial one is an inner step
        assert_eq!(inner + 1, solution.stats.inner_iterations);
    }

    #[test]
    fn test_fixed_penalty_inner_loop() {
        let problem = warm_up().build().unwrap();
        let solver = LcqpSolver::new(quiet()).unwrap();
        // Below rho = 2 the penalty function is convex, minimizer 2 / (2 + rho)
        let result = solver.run_inner(&problem, 1.0, &[1.0, 1.0], &[0.0, 0.0]).unwrap();
        assert_eq!(result.status, InnerStatus::Stationary);
        for xi in result.x.iter() {
            assert!((xi - 2.0 / 3.0).abs() < 1e-6);
        }

        assert!(solver.run_inner(&problem, 1.0, &[1.0], &[0.0, 0.0]).is_err());
        assert!(solver.run_inner(&problem, f64::NAN, &[1.0, 1.0], &[0.0, 0.0]).is_err());
    }

    #[test]
    fn test_problem_warm_start_from_solution_is_idempotent() {
        let problem = warm_up().build().unwrap();
        let solver = LcqpSolver::new(quiet()).unwrap();
        let first = solver.run(&problem);
        assert!(first.is_success());

        let warm = problem
            .with_warm_start(
                Some(DVector::from_column_slice(&first.x)),
                Some(DVector::from_column_slice(&first.y)),
            )
            .unwrap();
        let second = solver.run(&warm);
        assert_eq!(second.status, ReturnStatus::SuccessfulReturn);
        assert!(second.stats.outer_iterations <= 1);
        assert_eq!(second.stationarity_type, first.stationarity_type);
        for (a, b) in first.x.iter().zip(second.x.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_infeasible_constraints_fail_initial_subproblem() {
        // x1 >= 1 and x1 <= 0 on two rows
        let problem = warm_up()
            .constraints(
                DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]),
                Some(DVector::from_vec(vec![1.0, f64::NEG_INFINITY])),
                Some(DVector::from_vec(vec![f64::INFINITY, 0.0])),
            )
            .build()
            .unwrap();
        let solution = solve(&problem, quiet()).unwrap();

        assert_eq!(solution.status, ReturnStatus::InitialSubproblemFailed);
        assert_eq!(solution.stationarity_type, StationarityType::NotSolved);
        assert_eq!(solution.stats.last_qp_status, Some(QpStatus::Infeasible));
        assert_eq!(solution.stats.outer_iterations, 0);
    }

    #[test]
    fn test_unregularizable_hessian_is_solver_failure() {
        let problem = Problem::builder(
            DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -1.0e6])),
            DVector::from_vec(vec![-2.0, -2.0]),
        )
        .complementarity(
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
        )
        .build()
        .unwrap();
        let options = SolverOptions {
            regularization_max_attempts: 1,
            ..quiet()
        };
        let solution = solve(&problem, options).unwrap();

        assert_eq!(solution.status, ReturnStatus::QpSolverFailed);
        assert_eq!(solution.stats.inner_iterations, 0);
        assert_eq!(solution.x.len(), 2);
    }

    #[test]
    fn test_backend_failure_mid_run_is_solver_failure() {
        let problem = warm_up().build().unwrap();
        let backend = Arc::new(FailingAfter {
            inner: ActiveSetSolver::new(),
            budget: 1,
            calls: AtomicUsize::new(0),
        });
        let solution = LcqpSolver::with_backend(backend, quiet()).unwrap().run(&problem);

        assert_eq!(solution.status, ReturnStatus::QpSolverFailed);
        assert_eq!(solution.stats.last_qp_status, Some(QpStatus::NumericalError));
        assert_eq!(solution.stats.outer_iterations, 1);
        assert!(!solution.status.is_success());
    }

    #[test]
    fn test_single_outer_iteration_cap() {
        let problem = warm_up().build().unwrap();
        let options = SolverOptions {
            max_outer_iterations: 1,
            ..quiet()
        };
        let solution = solve(&problem, options).unwrap();

        assert_eq!(solution.status, ReturnStatus::MaxIterationsReached);
        assert_eq!(solution.stats.outer_iterations, 1);
        assert_eq!(solution.stationarity_type, StationarityType::NotSolved);
        // One penalty level ran, the next one was scheduled but not started
        assert_eq!(solution.stats.penalty_history, vec![0.01, 0.02]);
    }

    #[test]
    fn test_unbounded_relaxation_fails_on_both_backends() {
        // min x with Q = 0 and no constraints
        let problem = Problem::builder(DMatrix::zeros(1, 1), DVector::from_element(1, 1.0))
            .build()
            .unwrap();

        let dense = solve(&problem, quiet()).unwrap();
        assert_eq!(dense.status, ReturnStatus::InitialSubproblemFailed);
        assert_eq!(dense.stats.last_qp_status, Some(QpStatus::Unbounded));
        assert!(dense.stats.regularization > 0.0);

        let options = SolverOptions {
            qp_backend: QpBackendChoice::SparseInteriorPoint,
            ..quiet()
        };
        let sparse = solve(&problem, options).unwrap();
        assert_eq!(sparse.status, dense.status);
    }

    #[test]
    fn test_unbounded_subproblem_stops_inner_loop() {
        let problem = Problem::builder(DMatrix::zeros(1, 1), DVector::from_element(1, 1.0))
            .build()
            .unwrap();
        let solver = LcqpSolver::new(quiet()).unwrap();
        let result = solver.run_inner(&problem, 0.01, &[0.0], &[]).unwrap();

        assert_eq!(result.status, InnerStatus::Failed(Some(QpStatus::Unbounded)));
        assert_eq!(result.iterations, 0);
        assert_eq!(result.x[0], 0.0);
    }

    #[test]
    fn test_merit_never_rises_within_a_penalty_level() {
        for problem in [warm_up().build().unwrap(), two_pairs()] {
            let options = SolverOptions {
                store_steps: true,
                perturb_step: true,
                ..quiet()
            };
            let tol = options.merit_tolerance;
            let solution = solve(&problem, options).unwrap();

            let inner: Vec<&IterationRecord> = solution
                .stats
                .trace
                .iter()
                .filter(|r| r.phase == LoopPhase::Inner)
                .collect();
            assert!(!inner.is_empty());
            for pair in inner.windows(2) {
                let (before, after) = (pair[0], pair[1]);
                if before.outer_iteration != after.outer_iteration {
                    continue;
                }
                let scale = before.merit.abs().max(1.0);
                assert!(
                    after.merit <= before.merit + (tol + 10.0 * EPS) * scale,
                    "merit rose from {} to {} at outer {}",
                    before.merit,
                    after.merit,
                    after.outer_iteration
                );
            }
        }
    }
}
