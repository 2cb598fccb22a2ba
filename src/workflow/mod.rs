//! Workflow Definition Module
//!
//! Data structures and collaborators describing what a run is and how its
//! actions are parameterized.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (WorkflowRun, ActionDefinition, StageMessage)
//! - [`validator`]: Stage layout rules (contiguous sorting orders)
//! - [`parser`]: Run fixture loading
//! - [`store`]: Run lookup by id
//! - [`template`]: Parameter template rendering
//! - [`ledger`]: Completed-stage markers for redelivery de-duplication

pub mod ledger;
pub mod model;
pub mod parser;
pub mod store;
pub mod template;
pub mod validator;

pub use ledger::{
    FileStageLedger, LedgerError, MemoryStageLedger, RecentKeys, StageLedger,
    DEFAULT_LEDGER_CAPACITY,
};
pub use model::{ActionDefinition, ActionKind, StageMessage, WorkflowDefinition, WorkflowRun};
pub use parser::{load_fixture, parse_fixture, FixtureError, RunFixture};
pub use store::{MemoryRunStore, RunStore, StoreError};
pub use template::{PathTemplateRenderer, RenderError, RenderedParams, TemplateRenderer};
pub use validator::{validate_definition, validate_run, ValidationError};
