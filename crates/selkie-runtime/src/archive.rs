//! Archiving policy
//!
//! Closes ranges of the raw event log into [`BriefArchive`] records and
//! decides when covered raw events may be transferred or deleted. The
//! trigger is both-intervals-met (seconds AND versions) so quiet actors are
//! not archived per-event and busy actors not per-second; either ceiling
//! forces an archive on its own.

use selkie_core::{ArchiveOptions, BriefArchive, SnapshotBase};
use uuid::Uuid;

/// Decide whether the open range behind `base` should be archived now.
///
/// `range_start_timestamp_ms` is the timestamp of the first event past the
/// previous archive; `None` means it is unknown (recovered snapshot with no
/// replay), in which case only the version ceiling can trigger.
pub fn should_archive(
    last: Option<&BriefArchive>,
    range_start_timestamp_ms: Option<u64>,
    base: &SnapshotBase,
    now_ms: u64,
    options: &ArchiveOptions,
) -> bool {
    if !options.enabled {
        return false;
    }

    let archived_through = last.map(|a| a.end_version).unwrap_or(0);
    debug_assert!(base.version >= archived_through, "archive past the log head");
    let versions_pending = base.version - archived_through;
    if versions_pending == 0 {
        return false;
    }

    if versions_pending >= options.version_interval_max {
        return true;
    }

    let since_ms = last
        .map(|a| a.end_timestamp_ms)
        .or(range_start_timestamp_ms);
    if let Some(since_ms) = since_ms {
        let seconds_elapsed = now_ms.saturating_sub(since_ms) / 1000;
        if seconds_elapsed >= options.seconds_interval_max {
            return true;
        }
        if seconds_elapsed >= options.seconds_interval && versions_pending >= options.version_interval
        {
            return true;
        }
    }

    false
}

/// Build the archive record closing the open range at `base.version`.
///
/// Contiguous with the previous archive: starts one past its end.
pub fn next_archive(
    last: Option<&BriefArchive>,
    base: &SnapshotBase,
    range_start_timestamp_ms: u64,
) -> BriefArchive {
    let start_version = last.map(|a| a.end_version + 1).unwrap_or(1);
    debug_assert!(start_version <= base.version, "empty archive range");

    BriefArchive {
        id: Uuid::new_v4().to_string(),
        start_version,
        end_version: base.version,
        start_timestamp_ms: range_start_timestamp_ms,
        end_timestamp_ms: base.latest_min_event_timestamp_ms,
        index: last.map(|a| a.index + 1).unwrap_or(0),
        events_cleared: false,
    }
}

/// Archives whose raw events are now clearable.
///
/// A range's raw events stay put until `retained_min` newer archives exist,
/// protecting idempotency windows that may still re-derive from them.
pub fn clear_due(archives: &[BriefArchive], retained_min: u64) -> Vec<&BriefArchive> {
    let Some(latest_index) = archives.iter().map(|a| a.index).max() else {
        return Vec::new();
    };

    archives
        .iter()
        .filter(|a| !a.events_cleared && latest_index.saturating_sub(a.index) >= retained_min)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_core::ActorId;

    fn base(version: u64, last_ts: u64) -> SnapshotBase {
        let mut base = SnapshotBase::new(ActorId::new("account", "a-1").unwrap());
        base.version = version;
        base.doing_version = version;
        base.latest_min_event_timestamp_ms = last_ts;
        base
    }

    fn options() -> ArchiveOptions {
        ArchiveOptions {
            enabled: true,
            seconds_interval: 60,
            version_interval: 10,
            seconds_interval_max: 600,
            version_interval_max: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_both_intervals() {
        let opts = options();
        // 10 versions but only 30s elapsed
        assert!(!should_archive(None, Some(0), &base(10, 30_000), 30_000, &opts));
        // 90s elapsed but only 5 versions
        assert!(!should_archive(None, Some(0), &base(5, 90_000), 90_000, &opts));
        // Both met
        assert!(should_archive(None, Some(0), &base(10, 90_000), 90_000, &opts));
    }

    #[test]
    fn test_ceilings_trigger_alone() {
        let opts = options();
        // Version ceiling with no elapsed time
        assert!(should_archive(None, Some(0), &base(100, 1), 1, &opts));
        // Seconds ceiling with a single version
        assert!(should_archive(None, Some(0), &base(1, 0), 600_000, &opts));
    }

    #[test]
    fn test_empty_range_never_archives() {
        let opts = options();
        let last = next_archive(None, &base(10, 1000), 0);
        assert!(!should_archive(
            Some(&last),
            None,
            &base(10, 1000),
            u64::MAX,
            &opts
        ));
    }

    #[test]
    fn test_unknown_range_start_only_version_ceiling() {
        let opts = options();
        // Interval pair cannot be evaluated without a time reference
        assert!(!should_archive(None, None, &base(50, 0), u64::MAX, &opts));
        assert!(should_archive(None, None, &base(100, 0), 0, &opts));
    }

    #[test]
    fn test_archives_are_contiguous() {
        let first = next_archive(None, &base(10, 1000), 5);
        assert_eq!(first.start_version, 1);
        assert_eq!(first.end_version, 10);
        assert_eq!(first.index, 0);

        let second = next_archive(Some(&first), &base(25, 2000), 1100);
        assert_eq!(second.start_version, 11);
        assert_eq!(second.end_version, 25);
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_clear_due_respects_retention() {
        let mut archives = Vec::new();
        let mut last: Option<BriefArchive> = None;
        for i in 1..=4u64 {
            let archive = next_archive(last.as_ref(), &base(i * 10, i * 1000), 0);
            last = Some(archive.clone());
            archives.push(archive);
        }

        // Indexes 0..=3; retention 2 keeps the newest two ranges raw
        let due = clear_due(&archives, 2);
        let indexes: Vec<u64> = due.iter().map(|a| a.index).collect();
        assert_eq!(indexes, vec![0, 1]);

        // Already cleared ranges are not revisited
        archives[0].events_cleared = true;
        let due = clear_due(&archives, 2);
        let indexes: Vec<u64> = due.iter().map(|a| a.index).collect();
        assert_eq!(indexes, vec![1]);
    }
}
