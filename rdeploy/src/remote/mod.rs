//! Remote host access: sessions, file channels, OS detection

pub mod platform;
pub mod session;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use platform::{detect, Detection, PlatformFamily, PlatformProfile};
pub use session::{
    ConnectParams, EntryKind, ExecOutput, FileChannel, RemoteEntry, RemoteSession, RemoteStat,
    SessionConnector, SessionGuard,
};
pub use ssh::{SshConnector, SshOptions};
