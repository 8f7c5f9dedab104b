//! Storage: on-disk layout, settings and records

pub mod layout;
pub mod records;
pub mod settings;
pub mod store;

pub use layout::StorageLayout;
pub use records::FileStore;
pub use settings::Settings;
pub use store::DeploymentStore;
