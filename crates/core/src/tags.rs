//! Tag shaping: provenance tags for new snapshots and sorted tag maps for
//! reporting.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::CorrelationId;
use crate::resource::Tag;

pub const TAG_DESCRIPTION: &str = "backup-desc";
pub const TAG_CORRELATION_ID: &str = "backup-uuid";
pub const TAG_VERSION: &str = "backup-version";
pub const TAG_DELETE_PROTECTION: &str = "backup-delete-protection";
pub const TAG_HOST: &str = "backup-host";
pub const TAG_USER: &str = "backup-user";
pub const TAG_UID: &str = "backup-uid";
pub const TAG_EUID: &str = "backup-euid";

/// Keys every provenance tag set carries, in emission order.
pub const PROVENANCE_KEYS: [&str; 8] = [
    TAG_DESCRIPTION,
    TAG_CORRELATION_ID,
    TAG_VERSION,
    TAG_DELETE_PROTECTION,
    TAG_HOST,
    TAG_USER,
    TAG_UID,
    TAG_EUID,
];

/// Who and what is creating snapshots in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub version: String,
    pub host: String,
    pub user: String,
    pub uid: u32,
    pub euid: u32,
}

/// Build the fixed provenance tag set for a snapshot created by this run.
///
/// Delete protection always starts out as `false`.
pub fn provenance_tags(
    description: &str,
    correlation_id: CorrelationId,
    provenance: &Provenance,
) -> Vec<Tag> {
    vec![
        Tag::new(TAG_DESCRIPTION, description),
        Tag::new(TAG_CORRELATION_ID, correlation_id.to_string()),
        Tag::new(TAG_VERSION, provenance.version.as_str()),
        Tag::new(TAG_DELETE_PROTECTION, "false"),
        Tag::new(TAG_HOST, provenance.host.as_str()),
        Tag::new(TAG_USER, provenance.user.as_str()),
        Tag::new(TAG_UID, provenance.uid.to_string()),
        Tag::new(TAG_EUID, provenance.euid.to_string()),
    ]
}

/// Append the source resource's tags after the provenance tags.
///
/// Keys stay unique: the first occurrence wins, so a resource tag can never
/// shadow a provenance tag.
pub fn snapshot_tag_set(provenance: Vec<Tag>, resource_tags: &[Tag]) -> Vec<Tag> {
    let mut seen: HashSet<String> = provenance.iter().map(|t| t.key.clone()).collect();
    let mut tags = provenance;
    tags.reserve(resource_tags.len());

    for tag in resource_tags {
        if seen.insert(tag.key.clone()) {
            tags.push(tag.clone());
        } else {
            debug!(key = %tag.key, "dropping resource tag that collides with an existing key");
        }
    }

    tags
}

/// Key→value view of a tag list, ordered lexicographically by key.
///
/// Input order never affects the result. No tags yields an empty map.
pub fn tag_info(tags: &[Tag]) -> BTreeMap<String, String> {
    let mut sorted: Vec<&Tag> = tags.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let mut info = BTreeMap::new();
    for tag in sorted {
        info.insert(tag.key.clone(), tag.value.clone());
    }
    info
}
