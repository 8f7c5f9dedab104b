//! JSON file store: one document per record

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::{Deployment, DeploymentUpdate, Machine, Project};
use crate::storage::layout::StorageLayout;
use crate::storage::store::DeploymentStore;

/// Records under `<base>/records/{deployments,projects,machines}/<id>.json`
pub struct FileStore {
    layout: StorageLayout,
    // Serializes read-modify-write cycles on deployment documents
    write_lock: Mutex<()>,
}

fn record_file(dir: &Dir, id: u64) -> File {
    dir.file(&format!("{}.json", id))
}

async fn read_record<T: DeserializeOwned>(dir: &Dir, kind: &str, id: u64) -> Result<T, DeployError> {
    let file = record_file(dir, id);
    if !file.exists().await {
        return Err(DeployError::NotFound(format!("{} {}", kind, id)));
    }
    file.read_json().await
}

async fn write_record<T: Serialize>(dir: &Dir, id: u64, value: &T) -> Result<(), DeployError> {
    let contents = serde_json::to_vec_pretty(value)?;
    record_file(dir, id).write_atomic(&contents).await
}

/// Numeric ids of the records in `dir`, ascending
async fn record_ids(dir: &Dir) -> Result<Vec<u64>, DeployError> {
    let mut ids: Vec<u64> = dir
        .list_files()
        .await?
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .filter_map(|p| p.file_stem()?.to_str()?.parse().ok())
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

impl FileStore {
    /// Open the store, creating its directories
    pub async fn open(layout: StorageLayout) -> Result<Self, DeployError> {
        layout.setup().await?;
        Ok(Self {
            layout,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.layout.base_dir
    }

    pub async fn put_project(&self, project: &Project) -> Result<(), DeployError> {
        write_record(&self.layout.projects_dir(), project.id, project).await
    }

    pub async fn put_machine(&self, machine: &Machine) -> Result<(), DeployError> {
        write_record(&self.layout.machines_dir(), machine.id, machine).await
    }

    /// All deployments, ordered by id
    pub async fn deployments(&self) -> Result<Vec<Deployment>, DeployError> {
        let dir = self.layout.deployments_dir();
        let mut out = Vec::new();
        for id in record_ids(&dir).await? {
            out.push(read_record(&dir, "deployment", id).await?);
        }
        Ok(out)
    }

    /// Pair a project with a machine.
    ///
    /// An existing pairing is returned unchanged; otherwise a new
    /// `not_deployed` record is created.
    pub async fn associate(
        &self,
        project_id: u64,
        machine_id: u64,
        environment: Option<&str>,
        deploy_path: Option<&str>,
    ) -> Result<Deployment, DeployError> {
        self.project(project_id).await?;
        self.machine(machine_id).await?;

        let _guard = self.write_lock.lock().await;
        let existing = self.deployments().await?;
        if let Some(found) = existing
            .iter()
            .find(|d| d.project_id == project_id && d.machine_id == machine_id)
        {
            debug!(
                "Project {} already associated with machine {} as deployment {}",
                project_id, machine_id, found.id
            );
            return Ok(found.clone());
        }

        let id = existing.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        let mut deployment = Deployment::new(id, project_id, machine_id);
        if let Some(environment) = environment {
            deployment.environment = environment.to_string();
        }
        deployment.deploy_path = deploy_path.map(str::to_string);
        write_record(&self.layout.deployments_dir(), id, &deployment).await?;
        info!(
            "Created deployment {} for project {} on machine {}",
            id, project_id, machine_id
        );
        Ok(deployment)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn deployment(&self, id: u64) -> Result<Deployment, DeployError> {
        read_record(&self.layout.deployments_dir(), "deployment", id).await
    }

    async fn project(&self, id: u64) -> Result<Project, DeployError> {
        read_record(&self.layout.projects_dir(), "project", id).await
    }

    async fn machine(&self, id: u64) -> Result<Machine, DeployError> {
        read_record(&self.layout.machines_dir(), "machine", id).await
    }

    async fn commit(&self, id: u64, update: DeploymentUpdate) -> Result<Deployment, DeployError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.layout.deployments_dir();
        let mut deployment: Deployment = read_record(&dir, "deployment", id).await?;
        update.apply(&mut deployment);
        write_record(&dir, id, &deployment).await?;
        debug!("Deployment {} committed as {}", id, deployment.status);
        Ok(deployment)
    }
}
