//! Remote storage API boundary.
//!
//! The engine never talks to a concrete cloud client: listing and mutations go
//! through these traits. Credentials, sessions and client construction belong
//! to whoever implements them.

pub mod in_memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ebssnap_core::{RemoteError, Snapshot, SnapshotId, Tag, Volume, VolumeId};

pub use in_memory::{InMemoryEc2, RemoteOperation};

/// Default page size requested from paginated listings.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// One listing predicate, passed through verbatim to the remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `tag:<key>` filter matching any of `values`.
    pub fn tag<I, S>(key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(format!("tag:{key}"), values)
    }
}

/// Lazy, fallible sequence produced by a paginated listing.
pub type Listing<'a, T> = Box<dyn Iterator<Item = Result<T, RemoteError>> + Send + 'a>;

/// Lists candidate resources, one page at a time.
pub trait ResourceLister: Send + Sync {
    fn volumes(&self, filters: &[Filter], page_size: usize) -> Listing<'_, Volume>;

    fn snapshots(&self, filters: &[Filter], page_size: usize) -> Listing<'_, Snapshot>;
}

/// Result of a create-snapshot call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSnapshot {
    pub snapshot_id: SnapshotId,
    pub start_time: DateTime<Utc>,
}

/// Account and principal the remote API is acting as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account: String,
    pub user_id: String,
}

/// Mutating snapshot calls. Implementations must be shareable across workers.
pub trait SnapshotApi: Send + Sync {
    fn create_snapshot(
        &self,
        volume_id: &VolumeId,
        description: &str,
        tags: &[Tag],
    ) -> Result<CreatedSnapshot, RemoteError>;

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), RemoteError>;

    fn caller_identity(&self) -> Result<CallerIdentity, RemoteError>;
}

impl<T: ResourceLister + ?Sized> ResourceLister for std::sync::Arc<T> {
    fn volumes(&self, filters: &[Filter], page_size: usize) -> Listing<'_, Volume> {
        (**self).volumes(filters, page_size)
    }

    fn snapshots(&self, filters: &[Filter], page_size: usize) -> Listing<'_, Snapshot> {
        (**self).snapshots(filters, page_size)
    }
}

impl<T: SnapshotApi + ?Sized> SnapshotApi for std::sync::Arc<T> {
    fn create_snapshot(
        &self,
        volume_id: &VolumeId,
        description: &str,
        tags: &[Tag],
    ) -> Result<CreatedSnapshot, RemoteError> {
        (**self).create_snapshot(volume_id, description, tags)
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), RemoteError> {
        (**self).delete_snapshot(snapshot_id)
    }

    fn caller_identity(&self) -> Result<CallerIdentity, RemoteError> {
        (**self).caller_identity()
    }
}
