//! Workflow Validation
//!
//! Checks that a run's action list can be driven stage by stage:
//! - Run has an identifier
//! - Workflow is not empty
//! - Sorting orders are unique
//! - Sorting orders are contiguous starting at 0

use std::collections::BTreeSet;

use log::{debug, info};

use super::model::{WorkflowDefinition, WorkflowRun};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Run has empty or whitespace-only ID")]
    EmptyRunId,
    #[error("Workflow '{0}' has no actions")]
    EmptyWorkflow(String),
    #[error("Workflow '{workflow}' has more than one action at sortingOrder {order}")]
    DuplicateSortingOrder { workflow: String, order: u32 },
    #[error("Workflow '{workflow}' has no action at sortingOrder {missing} (orders must be contiguous from 0)")]
    MissingSortingOrder { workflow: String, missing: u32 },
}

/// Validates a workflow definition's stage layout.
pub fn validate_definition(workflow: &WorkflowDefinition) -> Result<(), ValidationError> {
    if workflow.is_empty() {
        return Err(ValidationError::EmptyWorkflow(workflow.id.clone()));
    }

    let mut seen = BTreeSet::new();
    for action in &workflow.actions {
        if !seen.insert(action.sorting_order) {
            return Err(ValidationError::DuplicateSortingOrder {
                workflow: workflow.id.clone(),
                order: action.sorting_order,
            });
        }
    }

    // Unique orders; contiguous iff every index below len is present
    if let Some(missing) = (0..workflow.len() as u32).find(|order| !seen.contains(order)) {
        return Err(ValidationError::MissingSortingOrder {
            workflow: workflow.id.clone(),
            missing,
        });
    }

    debug!(
        "Workflow '{}' has {} contiguous stages",
        workflow.id,
        workflow.len()
    );
    Ok(())
}

/// Validates a run and its workflow definition.
pub fn validate_run(run: &WorkflowRun) -> Result<(), ValidationError> {
    if run.id.trim().is_empty() {
        return Err(ValidationError::EmptyRunId);
    }
    validate_definition(&run.workflow)?;
    info!(
        "Run '{}' validated ({} stages)",
        run.id,
        run.workflow.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{ActionDefinition, ActionKind};
    use serde_json::json;

    fn definition(orders: &[u32]) -> WorkflowDefinition {
        WorkflowDefinition::new(
            "wf",
            orders
                .iter()
                .map(|&o| ActionDefinition::new(ActionKind::Notification, o))
                .collect(),
        )
    }

    #[test]
    fn test_valid_definition() {
        assert!(validate_definition(&definition(&[0, 1, 2])).is_ok());
    }

    #[test]
    fn test_valid_definition_out_of_order() {
        assert!(validate_definition(&definition(&[2, 0, 1])).is_ok());
    }

    #[test]
    fn test_empty_definition() {
        assert_eq!(
            validate_definition(&definition(&[])),
            Err(ValidationError::EmptyWorkflow("wf".to_string()))
        );
    }

    #[test]
    fn test_duplicate_sorting_order() {
        assert_eq!(
            validate_definition(&definition(&[0, 1, 1])),
            Err(ValidationError::DuplicateSortingOrder {
                workflow: "wf".to_string(),
                order: 1
            })
        );
    }

    #[test]
    fn test_gap_in_sorting_order() {
        assert_eq!(
            validate_definition(&definition(&[0, 2])),
            Err(ValidationError::MissingSortingOrder {
                workflow: "wf".to_string(),
                missing: 1
            })
        );
    }

    #[test]
    fn test_not_starting_at_zero() {
        let err = validate_definition(&definition(&[1, 2])).unwrap_err();
        assert!(err.to_string().contains("sortingOrder 0"));
    }

    #[test]
    fn test_empty_run_id() {
        let run = WorkflowRun::new("  ", definition(&[0]), json!({}));
        assert_eq!(validate_run(&run), Err(ValidationError::EmptyRunId));
    }
}
