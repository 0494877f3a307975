//! Age-based expiry policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::Snapshot;

/// Optional day offsets relative to "now" that keep a snapshot alive.
///
/// Both offsets are added to the current time, so they are usually negative
/// (e.g. `gt = -7` keeps anything started within the last seven days).
/// A value of `0` is treated the same as an absent bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryBounds {
    /// Keep snapshots that started after `now + gt days`.
    pub gt: Option<i64>,
    /// Keep snapshots that started before `now + lt days`.
    pub lt: Option<i64>,
}

impl ExpiryBounds {
    pub fn new(gt: Option<i64>, lt: Option<i64>) -> Self {
        Self { gt, lt }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn gt(days: i64) -> Self {
        Self {
            gt: Some(days),
            lt: None,
        }
    }

    pub fn lt(days: i64) -> Self {
        Self {
            gt: None,
            lt: Some(days),
        }
    }
}

fn active(bound: Option<i64>) -> Option<i64> {
    bound.filter(|days| *days != 0)
}

/// `now + days`, or `None` when that falls outside the representable range.
fn shifted(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|offset| now.checked_add_signed(offset))
}

/// Whether `snapshot` must be kept (skipped by the expire run).
///
/// A bound too large to represent saturates: far in the past for negative
/// offsets, far in the future for positive ones.
pub fn is_in_life(snapshot: &Snapshot, bounds: ExpiryBounds, now: DateTime<Utc>) -> bool {
    let start = snapshot.start_time;

    if let Some(gt) = active(bounds.gt) {
        let keep = match shifted(now, gt) {
            Some(threshold) => start > threshold,
            None => gt < 0,
        };
        if keep {
            return true;
        }
    }

    if let Some(lt) = active(bounds.lt) {
        let keep = match shifted(now, lt) {
            Some(threshold) => start < threshold,
            None => lt > 0,
        };
        if keep {
            return true;
        }
    }

    false
}

/// Whole days elapsed between `start` and `now`.
pub fn age_days(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_days()
}
