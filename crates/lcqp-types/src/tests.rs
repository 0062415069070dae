#[cfg(test)]
mod tests {
    use crate::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(ReturnStatus::SuccessfulReturn.to_string(), "SUCCESSFUL_RETURN");
        assert_eq!(ReturnStatus::MaxPenaltyReached.to_string(), "MAX_PENALTY_REACHED");
        assert_eq!(ReturnStatus::InitialSubproblemFailed.to_string(), "INITIAL_FAILED");
        assert_eq!(ReturnStatus::QpSolverFailed.as_str(), "QP_SOLVER_FAILED");
    }

    #[test]
    fn test_only_success_is_success() {
        let all = [
            ReturnStatus::SuccessfulReturn,
            ReturnStatus::MaxPenaltyReached,
            ReturnStatus::MaxIterationsReached,
            ReturnStatus::InitialSubproblemFailed,
            ReturnStatus::QpSolverFailed,
            ReturnStatus::InvalidProblem,
            ReturnStatus::Aborted,
        ];
        let successes = all.iter().filter(|s| s.is_success()).count();
        assert_eq!(successes, 1);
        assert!(!ReturnStatus::InvalidProblem.has_iterate());
        assert!(ReturnStatus::MaxPenaltyReached.has_iterate());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ReturnStatus::MaxPenaltyReached).unwrap();
        assert_eq!(json, "\"MAX_PENALTY_REACHED\"");
        let back: ReturnStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReturnStatus::MaxPenaltyReached);
    }

    #[test]
    fn test_stationarity_ordering() {
        assert!(StationarityType::Strong > StationarityType::Mordukhovich);
        assert!(StationarityType::Mordukhovich > StationarityType::Clarke);
        assert!(StationarityType::Clarke > StationarityType::Weak);
        assert_eq!(StationarityType::Strong.to_string(), "S");
    }

    #[test]
    fn test_error_classification() {
        let err = LcqpError::MalformedBounds("lbA[0] > ubA[0]".to_string());
        assert!(err.is_input_error());
        assert!(err.to_string().contains("lbA[0]"));

        let err = LcqpError::InvalidOptions("negative tolerance".to_string());
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: std::result::Result<ReturnStatus, _> = serde_json::from_str("\"NOPE\"");
        let err: LcqpError = parse.unwrap_err().into();
        assert!(matches!(err, LcqpError::Serialization(_)));
    }

    proptest! {
        #[test]
        fn prop_backend_message_preserved(msg in "[a-z ]{1,40}") {
            let err = LcqpError::Backend(msg.clone());
            prop_assert!(err.to_string().ends_with(&msg));
        }
    }
}
