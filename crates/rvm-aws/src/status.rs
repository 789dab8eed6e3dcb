//! CloudFormation status mapping.
//!
//! CloudFormation reports many more statuses than the planner distinguishes.
//! Unknown statuses map to `Failed`: the planner never mutates a failed
//! stack, so an unrecognized status can never trigger a mutation.

use rvm_core::state::StackStatus;

pub fn stack_status_from_str(raw: &str) -> StackStatus {
    match raw {
        "CREATE_IN_PROGRESS" => StackStatus::CreateInProgress,
        "CREATE_COMPLETE" => StackStatus::CreateComplete,
        "UPDATE_IN_PROGRESS" | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => {
            StackStatus::UpdateInProgress
        }
        "UPDATE_COMPLETE" => StackStatus::UpdateComplete,
        "DELETE_IN_PROGRESS" => StackStatus::DeleteInProgress,
        // A deleted stack still shows up when described by id; it is gone
        // for planning purposes.
        "DELETE_COMPLETE" => StackStatus::None,
        "ROLLBACK_COMPLETE" | "UPDATE_ROLLBACK_COMPLETE" => StackStatus::RollbackComplete,
        // A change set awaiting execution; nothing here will ever run it, so
        // surface the stack as needing attention instead of polling forever.
        "REVIEW_IN_PROGRESS" => StackStatus::Failed,
        other => {
            if other.ends_with("_IN_PROGRESS") {
                // Rollbacks, imports and cleanup phases: busy, hands off.
                StackStatus::UpdateInProgress
            } else {
                StackStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_the_primary_lifecycle_statuses() {
        assert_eq!(
            stack_status_from_str("CREATE_IN_PROGRESS"),
            StackStatus::CreateInProgress
        );
        assert_eq!(
            stack_status_from_str("CREATE_COMPLETE"),
            StackStatus::CreateComplete
        );
        assert_eq!(
            stack_status_from_str("UPDATE_COMPLETE"),
            StackStatus::UpdateComplete
        );
        assert_eq!(
            stack_status_from_str("DELETE_IN_PROGRESS"),
            StackStatus::DeleteInProgress
        );
    }

    #[test]
    fn rollback_variants_map_to_rollback_complete() {
        assert_eq!(
            stack_status_from_str("ROLLBACK_COMPLETE"),
            StackStatus::RollbackComplete
        );
        assert_eq!(
            stack_status_from_str("UPDATE_ROLLBACK_COMPLETE"),
            StackStatus::RollbackComplete
        );
    }

    #[test]
    fn busy_variants_never_map_to_a_mutable_state() {
        for raw in [
            "ROLLBACK_IN_PROGRESS",
            "UPDATE_ROLLBACK_IN_PROGRESS",
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
            "IMPORT_IN_PROGRESS",
        ] {
            assert!(stack_status_from_str(raw).is_in_progress(), "{raw}");
        }
    }

    #[test]
    fn failure_and_unknown_statuses_map_to_failed() {
        for raw in [
            "CREATE_FAILED",
            "DELETE_FAILED",
            "UPDATE_ROLLBACK_FAILED",
            "REVIEW_IN_PROGRESS",
            "SOME_FUTURE_STATUS",
        ] {
            assert_eq!(stack_status_from_str(raw), StackStatus::Failed, "{raw}");
        }
    }
}
