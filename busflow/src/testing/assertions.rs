//! Assertions over mediation outcomes.

use crate::engine::MediationOutcome;

/// Asserts the run completed and returns the root result.
pub fn assert_completed(outcome: &MediationOutcome) -> bool {
    match outcome {
        MediationOutcome::Completed { proceed, .. } => *proceed,
        other => panic!("Expected completed outcome, got {other:?}"),
    }
}

/// Asserts the run suspended and returns its correlation key.
pub fn assert_suspended(outcome: &MediationOutcome) -> String {
    match outcome {
        MediationOutcome::Suspended { key, .. } => key.clone(),
        other => panic!("Expected suspended outcome, got {other:?}"),
    }
}

/// Asserts the run was terminated.
pub fn assert_terminated(outcome: &MediationOutcome) {
    assert!(
        matches!(outcome, MediationOutcome::Terminated { .. }),
        "Expected terminated outcome, got {outcome:?}"
    );
}

/// Asserts the run failed with an error mentioning `needle`.
pub fn assert_failed_with(outcome: &MediationOutcome, needle: &str) {
    match outcome {
        MediationOutcome::Failed { error, .. } => assert!(
            error.contains(needle),
            "Expected error containing '{needle}', got '{error}'"
        ),
        other => panic!("Expected failed outcome, got {other:?}"),
    }
}
