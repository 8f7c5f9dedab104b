//! Records read and written by the deployment engine

pub mod deployment;
pub mod machine;
pub mod project;

pub use deployment::{Deployment, DeploymentUpdate, LogBlock};
pub use machine::{Credential, Machine};
pub use project::{Project, ProjectCategory, RepositoryType};
