//! Project synchronization to remote hosts

pub mod copy;
pub mod engine;
pub mod ignore;
pub mod setup;
pub mod vcs;

pub use engine::{CheckoutAction, SyncEngine, SyncOptions, SyncReport, SyncStrategy};
