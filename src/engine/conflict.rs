use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.end() <= range.start() {
        return Err(EngineError::Validation("slot end must be after its start"));
    }
    Ok(())
}

/// Slots on the same resource and start date, with status in `statuses`, whose
/// time window overlaps `range`, excluding `exclude`.
///
/// Scans only the `(resource, start_date)` bucket; the caller holds the
/// resource write lock for the whole check-then-mutate sequence, which closes
/// the race between two concurrent approvals of overlapping slots.
pub(crate) fn find_conflicts<'a>(
    rs: &'a ResourceState,
    range: &TimeRange,
    statuses: &[SlotStatus],
    exclude: Ulid,
) -> Vec<&'a Slot> {
    let bucket = rs.slots_on(range.start_date);
    // Bucket is sorted by start time: everything at or past range.end_time
    // cannot overlap.
    let upper = bucket.partition_point(|s| s.range.start_time < range.end_time);
    bucket[..upper]
        .iter()
        .filter(|s| s.range.end_time > range.start_time)
        .filter(|s| s.id != exclude && statuses.contains(&s.status))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn seed(rs: &mut ResourceState, range: TimeRange, status: SlotStatus) -> Ulid {
        let id = Ulid::new();
        rs.insert_slot(Slot {
            id,
            group_id: Ulid::new(),
            range,
            status,
            updated_at: d(1).and_time(t(0, 0)),
            managed_by: None,
        });
        id
    }

    #[test]
    fn finds_overlap_with_matching_status_only() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        let approved = seed(
            &mut rs,
            TimeRange::on(d(2), t(14, 0), t(16, 0)),
            SlotStatus::Approved,
        );
        seed(
            &mut rs,
            TimeRange::on(d(2), t(14, 0), t(16, 0)),
            SlotStatus::Denied,
        );

        let candidate = TimeRange::on(d(2), t(14, 30), t(15, 30));
        let hits = find_conflicts(&rs, &candidate, &[SlotStatus::Approved], Ulid::new());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, approved);
    }

    #[test]
    fn adjacent_and_other_date_do_not_conflict() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        seed(
            &mut rs,
            TimeRange::on(d(2), t(14, 0), t(16, 0)),
            SlotStatus::Approved,
        );
        seed(
            &mut rs,
            TimeRange::on(d(3), t(14, 30), t(15, 30)),
            SlotStatus::Approved,
        );

        // Adjacent on the same date.
        let adjacent = TimeRange::on(d(2), t(16, 0), t(17, 0));
        assert!(find_conflicts(&rs, &adjacent, &[SlotStatus::Approved], Ulid::new()).is_empty());

        // Overlapping times on a different date.
        let other_day = TimeRange::on(d(4), t(14, 0), t(16, 0));
        assert!(find_conflicts(&rs, &other_day, &[SlotStatus::Approved], Ulid::new()).is_empty());
    }

    #[test]
    fn excludes_the_candidate_itself() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        let range = TimeRange::on(d(2), t(9, 0), t(10, 0));
        let id = seed(&mut rs, range, SlotStatus::Pending);
        assert!(find_conflicts(&rs, &range, &[SlotStatus::Pending], id).is_empty());
    }

    #[test]
    fn rejects_inverted_and_empty_ranges() {
        let empty = TimeRange::on(d(2), t(14, 0), t(14, 0));
        assert!(matches!(
            validate_range(&empty),
            Err(EngineError::Validation(_))
        ));

        let inverted = TimeRange::on(d(2), t(16, 0), t(14, 0));
        assert!(validate_range(&inverted).is_err());

        // End on the next day is fine even when the time-of-day is earlier.
        let overnight = TimeRange::new(d(2), t(22, 0), d(3), t(1, 0));
        assert!(validate_range(&overnight).is_ok());
    }
}
