//! rdeploy library
//!
//! Remote deployment orchestration: code sync, dependency setup and
//! launcher control for projects on SSH-reachable hosts.

pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod progress;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod utils;
