//! File store and settings tests

use std::path::PathBuf;

use rdeploy::deploy::DeploymentStatus;
use rdeploy::errors::DeployError;
use rdeploy::filesys::{Dir, File};
use rdeploy::models::{
    Credential, DeploymentUpdate, LogBlock, Machine, Project, ProjectCategory, RepositoryType,
};
use rdeploy::storage::{DeploymentStore, FileStore, Settings, StorageLayout};
use tokio_test::{assert_err, assert_ok};

fn project() -> Project {
    Project {
        id: 3,
        name: "Blog Engine".to_string(),
        repository_type: RepositoryType::PlainCopy,
        repository_location: String::new(),
        storage_path: PathBuf::from("/srv/projects/blog"),
        category: ProjectCategory::Frontend,
    }
}

fn machine() -> Machine {
    Machine {
        id: 4,
        name: "lan box".to_string(),
        host: "192.168.1.20".to_string(),
        port: 2222,
        username: "admin".to_string(),
        credential: Credential::KeyFile(PathBuf::from("/keys/lan")),
        platform_hint: None,
    }
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = assert_ok!(Dir::create_temp_dir("rdeploy-it-store").await);

    let id = {
        let store = assert_ok!(FileStore::open(StorageLayout::new(dir.path())).await);
        assert_ok!(store.put_project(&project()).await);
        assert_ok!(store.put_machine(&machine()).await);
        let deployment = assert_ok!(store.associate(3, 4, Some("staging"), Some("/opt/blog")).await);

        let mut block = LogBlock::new("sync");
        block.line("3 transferred, 0 skipped, 0 failed");
        assert_ok!(
            store
                .commit(
                    deployment.id,
                    DeploymentUpdate::status(DeploymentStatus::Pending).with_log(block)
                )
                .await
        );
        deployment.id
    };

    let store = assert_ok!(FileStore::open(StorageLayout::new(dir.path())).await);
    let deployment = assert_ok!(store.deployment(id).await);
    assert_eq!(deployment.status, DeploymentStatus::Pending);
    assert_eq!(deployment.environment, "staging");
    assert_eq!(deployment.deploy_path(), Some("/opt/blog"));
    assert!(deployment.log.contains("3 transferred"));
    assert_eq!(assert_ok!(store.deployments().await).len(), 1);

    let machine = assert_ok!(store.machine(4).await);
    assert_eq!(machine.port, 2222);

    assert_ok!(dir.delete().await);
}

#[tokio::test]
async fn test_associate_requires_known_records() {
    let dir = assert_ok!(Dir::create_temp_dir("rdeploy-it-store").await);
    let store = assert_ok!(FileStore::open(StorageLayout::new(dir.path())).await);
    assert_ok!(store.put_project(&project()).await);

    let err = assert_err!(store.associate(3, 99, None, None).await);
    assert!(matches!(err, DeployError::NotFound(_)));
    assert_ok!(dir.delete().await);
}

#[tokio::test]
async fn test_settings_missing_file_gives_defaults_and_bad_file_errors() {
    let dir = assert_ok!(Dir::create_temp_dir("rdeploy-it-settings").await);

    let settings = assert_ok!(Settings::load(&dir.file("settings.json")).await);
    assert_eq!(settings.ssh.connect_timeout_secs, 10);
    assert!(settings.sync.install_dependencies);

    let bad = dir.file("bad.json");
    assert_ok!(bad.write_string("{ not json").await);
    let err = assert_err!(Settings::load(&bad).await);
    assert!(matches!(err, DeployError::ConfigError(_)));

    let custom = File::new(dir.path().join("custom.json"));
    assert_ok!(
        custom
            .write_string(r#"{"paths":{"unix_template":"/home/deploy/{project}"}}"#)
            .await
    );
    let settings = assert_ok!(Settings::load(&custom).await);
    assert_eq!(
        settings.paths.default_deploy_path("example.com", "blog"),
        "/home/deploy/blog"
    );

    assert_ok!(dir.delete().await);
}
