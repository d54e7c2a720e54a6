//! Row mappings and queries, one module per table.
//!
//! Queries take a bare connection so [`crate::PgStageStore`] can run them
//! either on a pooled connection or inside a transaction.

pub mod deployment;
pub mod host;
pub mod parameter;
pub mod project;
pub mod recipe;
pub mod role;
pub mod stage;

pub use deployment::DeploymentRow;
pub use host::HostRow;
pub use parameter::ParameterRow;
pub use project::ProjectRow;
pub use recipe::RecipeRow;
pub use role::RoleRow;
pub use stage::StageRow;
