//! Deployment module

pub mod coordinator;
pub mod fsm;
pub mod launcher;
pub mod locks;

pub use coordinator::{Coordinator, DeployRequest, Operation};
pub use fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
