//! Notification grouping and message text.
//!
//! Cascade denials are grouped by (immutable) parent group id after the
//! conflict scan, so each affected group's requester receives exactly one
//! combined message instead of one per denied sibling.

use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::{ResourceState, Slot, TimeRange};

/// Above this many slots, messages compress to a count + date range instead of
/// listing every date/time.
pub(crate) const SLOT_LIST_LIMIT: usize = 5;

/// One notification to send after commit: same message to every recipient.
pub(crate) struct Notice {
    pub recipients: Vec<Ulid>,
    pub group_id: Option<Ulid>,
    pub message: String,
}

fn fmt_slot(range: &TimeRange) -> String {
    format!(
        "{} from {} to {}",
        range.start_date.format("%d/%m/%Y"),
        range.start_time.format("%H:%M"),
        range.end_time.format("%H:%M"),
    )
}

/// `≤ SLOT_LIST_LIMIT`: the literal list of dates/times. Above that: a
/// compressed "N bookings between A and B" summary.
pub(crate) fn schedule_summary(ranges: &[TimeRange]) -> String {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| (r.start_date, r.start_time));

    if sorted.len() > SLOT_LIST_LIMIT {
        format!(
            "{} bookings between {} and {}",
            sorted.len(),
            sorted[0].start_date.format("%d/%m/%Y"),
            sorted[sorted.len() - 1].start_date.format("%d/%m/%Y"),
        )
    } else {
        sorted
            .iter()
            .map(fmt_slot)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub(crate) fn new_request_message(resource: &str, ranges: &[TimeRange]) -> String {
    format!(
        "New reservation request for '{resource}': {}",
        schedule_summary(ranges)
    )
}

pub(crate) fn conflict_message(resource: &str, ranges: &[TimeRange]) -> String {
    format!(
        "{} of your time slots for '{resource}' were denied due to a scheduling conflict: {}",
        ranges.len(),
        schedule_summary(ranges)
    )
}

/// One notice per distinct parent group of the denied slots, addressed to that
/// group's requester.
pub(crate) fn conflict_notices(rs: &ResourceState, denied: &[Slot]) -> Vec<Notice> {
    let mut by_group: BTreeMap<Ulid, Vec<TimeRange>> = BTreeMap::new();
    for slot in denied {
        by_group.entry(slot.group_id).or_default().push(slot.range);
    }

    by_group
        .into_iter()
        .filter_map(|(group_id, ranges)| {
            let group = rs.groups.get(&group_id)?;
            Some(Notice {
                recipients: vec![group.requester],
                group_id: Some(group_id),
                message: conflict_message(&rs.name, &ranges),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, ResourceStatus, SlotStatus};
    use chrono::{NaiveDate, NaiveTime};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn short_summaries_list_every_slot() {
        let ranges = vec![
            TimeRange::on(d(3), t(10, 0), t(12, 0)),
            TimeRange::on(d(2), t(14, 0), t(16, 0)),
        ];
        let summary = schedule_summary(&ranges);
        assert_eq!(
            summary,
            "02/10/2025 from 14:00 to 16:00; 03/10/2025 from 10:00 to 12:00"
        );
    }

    #[test]
    fn long_summaries_compress_to_a_date_span() {
        let ranges: Vec<TimeRange> = (1..=6)
            .map(|day| TimeRange::on(d(day), t(9, 0), t(10, 0)))
            .collect();
        assert_eq!(
            schedule_summary(&ranges),
            "6 bookings between 01/10/2025 and 06/10/2025"
        );

        // At the limit, the literal list is still used.
        let at_limit: Vec<TimeRange> = (1..=5)
            .map(|day| TimeRange::on(d(day), t(9, 0), t(10, 0)))
            .collect();
        assert!(schedule_summary(&at_limit).contains("from 09:00 to 10:00"));
    }

    #[test]
    fn conflict_message_counts_and_names_the_resource() {
        let ranges = vec![TimeRange::on(d(2), t(14, 0), t(16, 0))];
        let message = conflict_message("Chemistry Lab", &ranges);
        assert!(message.starts_with("1 of your time slots for 'Chemistry Lab'"));
        assert!(message.contains("02/10/2025 from 14:00 to 16:00"));
    }

    #[test]
    fn one_notice_per_parent_group() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        let requesters = [Ulid::new(), Ulid::new()];
        let group_ids = [Ulid::new(), Ulid::new()];
        let mut denied = Vec::new();
        for (i, group_id) in group_ids.iter().enumerate() {
            rs.groups.insert(
                *group_id,
                Group {
                    id: *group_id,
                    requester: requesters[i],
                    resource_id: rs.id,
                    purpose: "class".into(),
                    notes: None,
                    responsible: requesters[i],
                    created_at: d(1).and_time(t(0, 0)),
                    slot_ids: Vec::new(),
                },
            );
            // Two denied slots per group, but only one notice each.
            for h in [9, 11] {
                denied.push(Slot {
                    id: Ulid::new(),
                    group_id: *group_id,
                    range: TimeRange::on(d(2), t(h, 0), t(h + 1, 0)),
                    status: SlotStatus::Denied,
                    updated_at: d(1).and_time(t(0, 0)),
                    managed_by: None,
                });
            }
        }

        let notices = conflict_notices(&rs, &denied);
        assert_eq!(notices.len(), 2);
        for notice in &notices {
            let group_id = notice.group_id.unwrap();
            let idx = group_ids.iter().position(|g| *g == group_id).unwrap();
            assert_eq!(notice.recipients, vec![requesters[idx]]);
            assert!(notice.message.starts_with("2 of your time slots"));
        }
    }
}
