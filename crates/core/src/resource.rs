//! Remote resources the engine reads: volumes and their snapshots.
//!
//! Both are owned by the remote system. The engine only reads them, except that
//! creating a snapshot produces a new remote snapshot (still owned remotely).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{SnapshotId, VolumeId};

/// A single key/value tag pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Capability shared by every remote resource kind.
pub trait Tagged {
    /// Remote identifier, as a string.
    fn id(&self) -> &str;

    /// Tags in remote order (unordered set semantics, keys unique).
    fn tags(&self) -> &[Tag];

    /// Creation (volume) or start (snapshot) time.
    fn created_at(&self) -> DateTime<Utc>;
}

/// A storage volume, candidate for snapshot creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: VolumeId,
    pub availability_zone: String,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Volume {
    pub fn new(
        volume_id: impl Into<VolumeId>,
        availability_zone: impl Into<String>,
        create_time: DateTime<Utc>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            availability_zone: availability_zone.into(),
            create_time,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

impl Tagged for Volume {
    fn id(&self) -> &str {
        self.volume_id.as_str()
    }

    fn tags(&self) -> &[Tag] {
        &self.tags
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.create_time
    }
}

/// A point-in-time snapshot of a volume, candidate for expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub volume_id: VolumeId,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Snapshot {
    pub fn new(
        snapshot_id: impl Into<SnapshotId>,
        volume_id: impl Into<VolumeId>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            volume_id: volume_id.into(),
            start_time,
            description: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

impl Tagged for Snapshot {
    fn id(&self) -> &str {
        self.snapshot_id.as_str()
    }

    fn tags(&self) -> &[Tag] {
        &self.tags
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.start_time
    }
}

/// One unit of work for a dispatch run.
///
/// The variant decides the operation: volumes are snapshotted, snapshots are
/// considered for expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    Volume(Volume),
    Snapshot(Snapshot),
}

impl Tagged for Resource {
    fn id(&self) -> &str {
        match self {
            Resource::Volume(v) => v.id(),
            Resource::Snapshot(s) => s.id(),
        }
    }

    fn tags(&self) -> &[Tag] {
        match self {
            Resource::Volume(v) => v.tags(),
            Resource::Snapshot(s) => s.tags(),
        }
    }

    fn created_at(&self) -> DateTime<Utc> {
        match self {
            Resource::Volume(v) => v.created_at(),
            Resource::Snapshot(s) => s.created_at(),
        }
    }
}

impl From<Volume> for Resource {
    fn from(value: Volume) -> Self {
        Resource::Volume(value)
    }
}

impl From<Snapshot> for Resource {
    fn from(value: Snapshot) -> Self {
        Resource::Snapshot(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_delegates_to_variant() {
        let now = Utc::now();
        let vol: Resource = Volume::new("vol-1", "us-east-1a", now)
            .with_tags(vec![Tag::new("Name", "db")])
            .into();
        assert_eq!(vol.id(), "vol-1");
        assert_eq!(vol.tags().len(), 1);
        assert_eq!(vol.created_at(), now);

        let snap: Resource = Snapshot::new("snap-1", "vol-1", now).into();
        assert_eq!(snap.id(), "snap-1");
        assert!(snap.tags().is_empty());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let now = Utc::now();
        let snap: Resource = Snapshot::new("snap-9", "vol-9", now).into();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["kind"], "snapshot");
        assert_eq!(json["snapshot_id"], "snap-9");
    }
}
