//! Run Fixture Parser
//!
//! Loads triggered runs, and any stage messages already waiting on the log,
//! from a YAML (or JSON) file. The worker binary uses this to populate its
//! in-process run store and message log.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{StageMessage, WorkflowRun};
use super::validator::{validate_run, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Failed to read run fixture '{path}': {source}. Check that the file exists and is readable.")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse run fixture: {0}. Check the file format.")]
    Parse(#[from] serde_yaml::Error),
    #[error("Run '{0}' is defined more than once")]
    DuplicateRun(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Contents of a run fixture file.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunFixture {
    /// Runs available to the store
    #[serde(default)]
    pub runs: Vec<WorkflowRun>,

    /// Messages already published by the trigger side
    #[serde(default)]
    pub pending: Vec<StageMessage>,
}

/// Parses and validates fixture text.
pub fn parse_fixture(content: &str) -> Result<RunFixture, FixtureError> {
    let fixture: RunFixture = serde_yaml::from_str(content)?;

    let mut seen = HashSet::new();
    for run in &fixture.runs {
        if !seen.insert(run.id.as_str()) {
            return Err(FixtureError::DuplicateRun(run.id.clone()));
        }
        validate_run(run)?;
    }

    info!(
        "Parsed {} runs, {} pending stage messages",
        fixture.runs.len(),
        fixture.pending.len()
    );
    Ok(fixture)
}

/// Loads a run fixture from a file.
///
/// # Example
///
/// ```rust,no_run
/// use stagerunner::workflow::load_fixture;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fixture = load_fixture("runs.yaml")?;
///     println!("Loaded {} runs", fixture.runs.len());
///     Ok(())
/// }
/// ```
pub fn load_fixture(path: impl AsRef<Path>) -> Result<RunFixture, FixtureError> {
    let path = path.as_ref();
    info!("Loading run fixture from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| FixtureError::Read {
        path: path.display().to_string(),
        source,
    })?;
    debug!("Fixture content loaded ({} bytes)", content.len());

    parse_fixture(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::ActionKind;
    use tempfile::tempdir;

    const FIXTURE: &str = r#"
runs:
  - id: r1
    workflow:
      id: welcome
      actions:
        - kind: email
          sortingOrder: 0
          parameterTemplate:
            email: "{user.email}"
            body: "Hi {user.name}"
        - kind: send-sol
          sortingOrder: 1
          parameterTemplate:
            address: "{wallet}"
            amount: "0.5"
    triggerMetadata:
      user: { email: ada@example.com, name: Ada }
      wallet: abc123
pending:
  - runId: r1
    stage: 0
"#;

    #[test]
    fn test_parse_fixture() {
        let fixture = parse_fixture(FIXTURE).unwrap();

        assert_eq!(fixture.runs.len(), 1);
        assert_eq!(fixture.pending, vec![StageMessage::new("r1", 0)]);

        let run = &fixture.runs[0];
        assert_eq!(run.workflow.actions[1].kind, ActionKind::AssetTransfer);
        assert_eq!(run.trigger_metadata["user"]["name"], "Ada");
    }

    #[test]
    fn test_parse_json_fixture() {
        let json = r#"{"runs": [{"id": "r2", "workflow": {"actions": [
            {"kind": "notification", "sortingOrder": 0}
        ]}}]}"#;
        let fixture = parse_fixture(json).unwrap();
        assert_eq!(fixture.runs[0].id, "r2");
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn test_duplicate_run_rejected() {
        let yaml = r#"
runs:
  - id: r1
    workflow: { actions: [ { kind: email, sortingOrder: 0 } ] }
  - id: r1
    workflow: { actions: [ { kind: email, sortingOrder: 0 } ] }
"#;
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::DuplicateRun(id)) if id == "r1"
        ));
    }

    #[test]
    fn test_invalid_run_rejected() {
        let yaml = r#"
runs:
  - id: r1
    workflow: { actions: [ { kind: email, sortingOrder: 1 } ] }
"#;
        assert!(matches!(parse_fixture(yaml), Err(FixtureError::Invalid(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse_fixture("runs: [ {"),
            Err(FixtureError::Parse(_))
        ));
    }

    #[test]
    fn test_load_fixture_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("runs.yaml");
        fs::write(&path, FIXTURE).unwrap();

        let fixture = load_fixture(&path).unwrap();
        assert_eq!(fixture.runs[0].id, "r1");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_fixture("/nonexistent/runs.yaml");
        assert!(matches!(result, Err(FixtureError::Read { .. })));
    }
}
