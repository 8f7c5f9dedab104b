//! FSM unit tests

use rdeploy::deploy::fsm::{transition, DeploymentEvent, DeploymentFsm, DeploymentStatus};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::default();
    assert_eq!(fsm.state(), DeploymentStatus::NotDeployed);
    assert!(fsm.permits(DeploymentEvent::RequestSync));
    assert!(!fsm.permits(DeploymentEvent::RequestStart));
}

#[test]
fn test_fsm_sync_success_flow() {
    let mut fsm = DeploymentFsm::default();

    // not_deployed -> pending -> syncing -> success
    fsm.process(DeploymentEvent::RequestSync).unwrap();
    fsm.process(DeploymentEvent::BeginSync).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Syncing);
    fsm.process(DeploymentEvent::SyncSucceeded).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Success);
}

#[test]
fn test_fsm_failure_states_are_named() {
    let mut fsm = DeploymentFsm::default();
    fsm.process(DeploymentEvent::RequestSync).unwrap();
    fsm.process(DeploymentEvent::BeginSync).unwrap();
    assert_eq!(
        fsm.process(DeploymentEvent::SyncFailed),
        Ok(DeploymentStatus::SyncFailed)
    );

    let mut fsm = DeploymentFsm::new(DeploymentStatus::Pending);
    fsm.process(DeploymentEvent::BeginDeploy).unwrap();
    assert_eq!(
        fsm.process(DeploymentEvent::DeployFailed),
        Ok(DeploymentStatus::Failed)
    );

    let mut fsm = DeploymentFsm::new(DeploymentStatus::Success);
    fsm.process(DeploymentEvent::RequestStart).unwrap();
    assert_eq!(
        fsm.process(DeploymentEvent::StartFailed),
        Ok(DeploymentStatus::StartFailed)
    );

    let mut fsm = DeploymentFsm::new(DeploymentStatus::Running);
    fsm.process(DeploymentEvent::RequestStop).unwrap();
    assert_eq!(
        fsm.process(DeploymentEvent::StopFailed),
        Ok(DeploymentStatus::StopFailed)
    );
}

#[test]
fn test_fsm_retry_after_failure() {
    for failed in [
        DeploymentStatus::Failed,
        DeploymentStatus::SyncFailed,
        DeploymentStatus::StartFailed,
        DeploymentStatus::StopFailed,
    ] {
        assert_eq!(
            transition(failed, DeploymentEvent::RequestDeploy),
            Some(DeploymentStatus::Pending)
        );
    }
}

#[test]
fn test_fsm_rejects_transitions_outside_the_table() {
    let mut fsm = DeploymentFsm::new(DeploymentStatus::Running);
    assert!(fsm.process(DeploymentEvent::RequestSync).is_err());
    assert!(fsm.process(DeploymentEvent::RequestStart).is_err());
    assert_eq!(fsm.state(), DeploymentStatus::Running);

    assert_eq!(
        transition(DeploymentStatus::NotDeployed, DeploymentEvent::RequestStop),
        None
    );
    assert_eq!(
        transition(DeploymentStatus::SyncFailed, DeploymentEvent::RequestStart),
        None
    );
}
