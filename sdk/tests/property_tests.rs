use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorBody, LexisErrorExt};

// User hints never echo the raw failure detail, whatever it contains
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::RuleSet(error_str.clone()),
            EngineError::SearchProvider(error_str.clone()),
            EngineError::ModelStream(error_str.clone()),
            EngineError::ModelUnavailable {
                message: error_str.clone(),
                code: "model_rejected".to_string(),
            },
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            if error_str.len() > 12 {
                prop_assert!(!hint.contains(&error_str));
            }
        }
    }
}

// Status codes always land in the HTTP error range
proptest! {
    #[test]
    fn test_error_body_status_in_error_range(
        code in "model_[a-z]{1,12}",
        timeout_ms in 1..120_000u64,
    ) {
        let errs = vec![
            EngineError::SearchTimeout(timeout_ms),
            EngineError::ModelUnavailable {
                message: "failure".to_string(),
                code: code.clone(),
            },
            EngineError::Cancelled,
        ];

        for err in errs {
            let body = ErrorBody::from(&err);
            prop_assert!((400..600).contains(&body.status));
            prop_assert!(!body.code.is_empty());
        }
    }
}
