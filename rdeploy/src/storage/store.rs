//! Persistence seam for deployment records

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::{Deployment, DeploymentUpdate, Machine, Project};

/// Read access to projects and machines, and the only write path for deployments
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn deployment(&self, id: u64) -> Result<Deployment, DeployError>;

    async fn project(&self, id: u64) -> Result<Project, DeployError>;

    async fn machine(&self, id: u64) -> Result<Machine, DeployError>;

    /// Durably apply `update` to deployment `id` and return the new record.
    ///
    /// The update's log block is appended; existing log text is never replaced.
    async fn commit(&self, id: u64, update: DeploymentUpdate) -> Result<Deployment, DeployError>;
}
