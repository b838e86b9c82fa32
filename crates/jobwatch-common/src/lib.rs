pub mod error;
pub mod time;
pub mod types;

pub use error::{Result, SourceError, SourceErrorKind, SyncError};
pub use types::{
    DependentEntitySnapshot, EntityId, JobId, JobStatus, JobStatusSnapshot, StatusEvent,
};
