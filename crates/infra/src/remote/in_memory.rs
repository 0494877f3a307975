//! In-memory EC2 stand-in for tests/dev.
//!
//! Implements both [`ResourceLister`] and [`SnapshotApi`]. Listings are served
//! lazily one page per fetch, and errors can be scripted per operation to
//! exercise throttling and terminal failure paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use ebssnap_core::error::INVALID_PARAMETER_CODE;
use ebssnap_core::{RemoteError, Snapshot, SnapshotId, Tag, Tagged, Volume, VolumeId};

use super::{CallerIdentity, CreatedSnapshot, Filter, Listing, ResourceLister, SnapshotApi};

/// Remote calls that can be counted and scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    DescribeVolumes,
    DescribeSnapshots,
    CreateSnapshot,
    DeleteSnapshot,
}

#[derive(Debug, Default)]
struct Ec2State {
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
    in_use: HashSet<SnapshotId>,
    injected: HashMap<RemoteOperation, VecDeque<RemoteError>>,
    calls: HashMap<RemoteOperation, usize>,
    deleted: Vec<SnapshotId>,
    next_snapshot: u64,
}

impl Ec2State {
    /// Count the call and pop the next scripted error for it, if any.
    fn begin(&mut self, op: RemoteOperation) -> Result<(), RemoteError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.injected.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryEc2 {
    state: Mutex<Ec2State>,
    identity: CallerIdentity,
    latency: Duration,
}

impl Default for InMemoryEc2 {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEc2 {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Ec2State::default()),
            identity: CallerIdentity {
                account: "000000000000".to_string(),
                user_id: "AIDAINMEMORY".to_string(),
            },
            latency: Duration::ZERO,
        }
    }

    pub fn with_identity(mut self, identity: CallerIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Sleep this long inside every mutating call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Ec2State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_volume(&self, volume: Volume) {
        self.lock().volumes.push(volume);
    }

    pub fn add_snapshot(&self, snapshot: Snapshot) {
        self.lock().snapshots.push(snapshot);
    }

    /// Make deletes of this snapshot fail with `InvalidSnapshot.InUse`.
    pub fn mark_in_use(&self, snapshot_id: &SnapshotId) {
        self.lock().in_use.insert(snapshot_id.clone());
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn inject_error(&self, op: RemoteOperation, error: RemoteError, times: usize) {
        let mut state = self.lock();
        let queue = state.injected.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub fn calls(&self, op: RemoteOperation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn volume_list(&self) -> Vec<Volume> {
        self.lock().volumes.clone()
    }

    pub fn snapshot_list(&self) -> Vec<Snapshot> {
        self.lock().snapshots.clone()
    }

    pub fn deleted(&self) -> Vec<SnapshotId> {
        self.lock().deleted.clone()
    }

    fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

fn unsupported_filter(name: &str) -> RemoteError {
    RemoteError::new(
        INVALID_PARAMETER_CODE,
        format!("The filter '{name}' is invalid"),
    )
}

fn tag_matches(tags: &[Tag], filter: &Filter) -> Option<bool> {
    if filter.name == "tag-key" {
        return Some(tags.iter().any(|t| filter.values.contains(&t.key)));
    }
    let key = filter.name.strip_prefix("tag:")?;
    Some(
        tags.iter()
            .any(|t| t.key == key && filter.values.contains(&t.value)),
    )
}

fn volume_matches(volume: &Volume, filters: &[Filter]) -> Result<bool, RemoteError> {
    for filter in filters {
        let hit = match filter.name.as_str() {
            "volume-id" => filter.values.iter().any(|v| v == volume.volume_id.as_str()),
            "availability-zone" => filter.values.contains(&volume.availability_zone),
            _ => tag_matches(&volume.tags, filter).ok_or_else(|| unsupported_filter(&filter.name))?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn snapshot_matches(snapshot: &Snapshot, filters: &[Filter]) -> Result<bool, RemoteError> {
    for filter in filters {
        let hit = match filter.name.as_str() {
            "snapshot-id" => filter.values.iter().any(|v| v == snapshot.snapshot_id.as_str()),
            "volume-id" => filter.values.iter().any(|v| v == snapshot.volume_id.as_str()),
            "description" => filter.values.contains(&snapshot.description),
            _ => tag_matches(&snapshot.tags, filter).ok_or_else(|| unsupported_filter(&filter.name))?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Next page of matches, in id order, strictly after the `after` cursor.
///
/// Deletes between pages never shift later items out of the listing.
fn page_of<T: Tagged + Clone>(
    items: &[T],
    filters: &[Filter],
    matches: fn(&T, &[Filter]) -> Result<bool, RemoteError>,
    after: Option<&str>,
    page_size: usize,
) -> Result<Vec<T>, RemoteError> {
    let mut candidates = Vec::new();
    for item in items {
        if after.is_some_and(|cursor| item.id() <= cursor) {
            continue;
        }
        if matches(item, filters)? {
            candidates.push(item);
        }
    }
    candidates.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(candidates.into_iter().take(page_size).cloned().collect())
}

type FetchPage<T> =
    fn(&mut Ec2State, &[Filter], Option<&str>, usize) -> Result<Vec<T>, RemoteError>;

/// Page-at-a-time iterator over a listing.
struct Pages<'a, T> {
    ec2: &'a InMemoryEc2,
    filters: Vec<Filter>,
    fetch: FetchPage<T>,
    page_size: usize,
    next_token: Option<String>,
    buffer: VecDeque<T>,
    done: bool,
}

impl<'a, T> Pages<'a, T> {
    fn new(ec2: &'a InMemoryEc2, filters: &[Filter], fetch: FetchPage<T>, page_size: usize) -> Self {
        Self {
            ec2,
            filters: filters.to_vec(),
            fetch,
            page_size: page_size.max(1),
            next_token: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

impl<T: Tagged> Iterator for Pages<'_, T> {
    type Item = Result<T, RemoteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.buffer.pop_front() {
            return Some(Ok(item));
        }
        if self.done {
            return None;
        }

        let page = {
            let mut state = self.ec2.lock();
            (self.fetch)(
                &mut state,
                &self.filters,
                self.next_token.as_deref(),
                self.page_size,
            )
        };
        match page {
            Ok(page) => {
                if page.len() < self.page_size {
                    self.done = true;
                }
                if let Some(last) = page.last() {
                    self.next_token = Some(last.id().to_string());
                }
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn fetch_volumes(
    state: &mut Ec2State,
    filters: &[Filter],
    after: Option<&str>,
    page_size: usize,
) -> Result<Vec<Volume>, RemoteError> {
    state.begin(RemoteOperation::DescribeVolumes)?;
    page_of(&state.volumes, filters, volume_matches, after, page_size)
}

fn fetch_snapshots(
    state: &mut Ec2State,
    filters: &[Filter],
    after: Option<&str>,
    page_size: usize,
) -> Result<Vec<Snapshot>, RemoteError> {
    state.begin(RemoteOperation::DescribeSnapshots)?;
    page_of(&state.snapshots, filters, snapshot_matches, after, page_size)
}

impl ResourceLister for InMemoryEc2 {
    fn volumes(&self, filters: &[Filter], page_size: usize) -> Listing<'_, Volume> {
        Box::new(Pages::new(self, filters, fetch_volumes, page_size))
    }

    fn snapshots(&self, filters: &[Filter], page_size: usize) -> Listing<'_, Snapshot> {
        Box::new(Pages::new(self, filters, fetch_snapshots, page_size))
    }
}

impl SnapshotApi for InMemoryEc2 {
    fn create_snapshot(
        &self,
        volume_id: &VolumeId,
        description: &str,
        tags: &[Tag],
    ) -> Result<CreatedSnapshot, RemoteError> {
        self.simulate_latency();
        let mut state = self.lock();
        state.begin(RemoteOperation::CreateSnapshot)?;

        if !state.volumes.iter().any(|v| &v.volume_id == volume_id) {
            return Err(RemoteError::new(
                "InvalidVolume.NotFound",
                format!("The volume '{volume_id}' does not exist."),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = tags.iter().find(|t| !seen.insert(t.key.as_str())) {
            return Err(RemoteError::new(
                INVALID_PARAMETER_CODE,
                format!("Duplicate tag key '{}' specified.", dup.key),
            ));
        }

        state.next_snapshot += 1;
        let snapshot_id = SnapshotId::new(format!("snap-{:017x}", state.next_snapshot));
        let start_time = Utc::now();
        state.snapshots.push(
            Snapshot::new(snapshot_id.clone(), volume_id.clone(), start_time)
                .with_description(description)
                .with_tags(tags.to_vec()),
        );

        Ok(CreatedSnapshot {
            snapshot_id,
            start_time,
        })
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), RemoteError> {
        self.simulate_latency();
        let mut state = self.lock();
        state.begin(RemoteOperation::DeleteSnapshot)?;

        if state.in_use.contains(snapshot_id) {
            return Err(RemoteError::snapshot_in_use(snapshot_id.as_str()));
        }

        let before = state.snapshots.len();
        state.snapshots.retain(|s| &s.snapshot_id != snapshot_id);
        if state.snapshots.len() == before {
            return Err(RemoteError::new(
                "InvalidSnapshot.NotFound",
                format!("The snapshot '{snapshot_id}' does not exist."),
            ));
        }
        state.deleted.push(snapshot_id.clone());
        Ok(())
    }

    fn caller_identity(&self) -> Result<CallerIdentity, RemoteError> {
        Ok(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ec2_with_volumes(n: usize) -> InMemoryEc2 {
        let ec2 = InMemoryEc2::new();
        for i in 0..n {
            let zone = if i % 2 == 0 { "us-east-1a" } else { "us-east-1b" };
            ec2.add_volume(
                Volume::new(format!("vol-{i:04}"), zone, Utc::now())
                    .with_tags(vec![Tag::new("team", if i < 3 { "db" } else { "web" })]),
            );
        }
        ec2
    }

    #[test]
    fn listing_is_paginated_lazily() {
        let ec2 = ec2_with_volumes(25);
        let mut listing = ec2.volumes(&[], 10);

        assert_eq!(ec2.calls(RemoteOperation::DescribeVolumes), 0);
        listing.next().unwrap().unwrap();
        assert_eq!(ec2.calls(RemoteOperation::DescribeVolumes), 1);

        let rest: Vec<_> = listing.collect::<Result<_, _>>().unwrap();
        assert_eq!(rest.len(), 24);
        assert_eq!(ec2.calls(RemoteOperation::DescribeVolumes), 3);
    }

    #[test]
    fn listing_survives_deletes_between_pages() {
        let ec2 = InMemoryEc2::new();
        for i in 0..25 {
            ec2.add_snapshot(Snapshot::new(format!("snap-{i:03}"), "vol-1", Utc::now()));
        }

        let mut seen = Vec::new();
        for snapshot in ec2.snapshots(&[], 10) {
            let snapshot = snapshot.unwrap();
            ec2.delete_snapshot(&snapshot.snapshot_id).unwrap();
            seen.push(snapshot.snapshot_id);
        }

        assert_eq!(seen.len(), 25);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!(ec2.snapshot_list().is_empty());
    }

    #[test]
    fn exact_page_multiple_fetches_one_empty_page() {
        let ec2 = ec2_with_volumes(20);
        let all: Vec<_> = ec2.volumes(&[], 10).collect::<Result<_, _>>().unwrap();
        assert_eq!(all.len(), 20);
        assert_eq!(ec2.calls(RemoteOperation::DescribeVolumes), 3);
    }

    #[test]
    fn filters_are_applied() {
        let ec2 = ec2_with_volumes(10);
        let db: Vec<_> = ec2
            .volumes(&[Filter::tag("team", ["db"])], 100)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(db.len(), 3);

        let zone_b: Vec<_> = ec2
            .volumes(&[Filter::new("availability-zone", ["us-east-1b"])], 2)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(zone_b.len(), 5);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let ec2 = ec2_with_volumes(3);
        let mut listing = ec2.volumes(&[Filter::new("bogus", ["x"])], 10);
        let err = listing.next().unwrap().unwrap_err();
        assert_eq!(err.code, INVALID_PARAMETER_CODE);
        assert!(listing.next().is_none());
    }

    #[test]
    fn create_then_delete_snapshot() {
        let ec2 = ec2_with_volumes(1);
        let created = ec2
            .create_snapshot(&VolumeId::new("vol-0000"), "nightly", &[Tag::new("a", "1")])
            .unwrap();
        assert!(created.snapshot_id.as_str().starts_with("snap-"));
        assert_eq!(ec2.snapshot_list().len(), 1);

        ec2.delete_snapshot(&created.snapshot_id).unwrap();
        assert!(ec2.snapshot_list().is_empty());
        assert_eq!(ec2.deleted(), vec![created.snapshot_id.clone()]);

        let err = ec2.delete_snapshot(&created.snapshot_id).unwrap_err();
        assert_eq!(err.code, "InvalidSnapshot.NotFound");
    }

    #[test]
    fn duplicate_tag_keys_are_rejected() {
        let ec2 = ec2_with_volumes(1);
        let err = ec2
            .create_snapshot(
                &VolumeId::new("vol-0000"),
                "d",
                &[Tag::new("a", "1"), Tag::new("a", "2")],
            )
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMETER_CODE);
    }

    #[test]
    fn in_use_and_injected_errors() {
        let ec2 = InMemoryEc2::new();
        let snap = Snapshot::new("snap-1", "vol-1", Utc::now());
        ec2.add_snapshot(snap.clone());
        ec2.mark_in_use(&snap.snapshot_id);
        assert!(ec2.delete_snapshot(&snap.snapshot_id).unwrap_err().is_in_use());

        ec2.inject_error(RemoteOperation::CreateSnapshot, RemoteError::throttled(), 2);
        let vol = VolumeId::new("vol-1");
        assert!(ec2.create_snapshot(&vol, "d", &[]).unwrap_err().is_throttling());
        assert!(ec2.create_snapshot(&vol, "d", &[]).unwrap_err().is_throttling());
        assert_eq!(
            ec2.create_snapshot(&vol, "d", &[]).unwrap_err().code,
            "InvalidVolume.NotFound"
        );
        assert_eq!(ec2.calls(RemoteOperation::CreateSnapshot), 3);
    }
}
