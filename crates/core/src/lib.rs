//! Pure domain building blocks for bulk snapshot lifecycle runs.
//!
//! No I/O and no concurrency lives here: resource model, tag shaping, the
//! expiry policy and the result events workers report.

pub mod error;
pub mod event;
pub mod expiry;
pub mod id;
pub mod resource;
pub mod tags;

pub use error::{DomainError, RemoteError};
pub use event::{Action, CreateDetail, EventDetail, ExpireDetail, ExpireStatus, Outcome, ResultEvent};
pub use expiry::{ExpiryBounds, age_days, is_in_life};
pub use id::{CorrelationId, SnapshotId, VolumeId};
pub use resource::{Resource, Snapshot, Tag, Tagged, Volume};
pub use tags::{Provenance, provenance_tags, snapshot_tag_set, tag_info};
