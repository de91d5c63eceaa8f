mod error;
mod paths;
mod schema;
mod store;

pub use error::SnapshotStoreError;
pub use paths::{snapshot_file_name, state_root};
pub use schema::{SnapshotEnvelope, SnapshotKey, SNAPSHOT_VERSION};
pub use store::SnapshotStore;
