use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use ulid::Ulid;

/// A slot's calendar window: start and end as separate date + time-of-day
/// pairs, all in one local zone. Windows never span midnight in this domain,
/// so conflict comparison is start-date equality plus half-open time overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_date: NaiveDate,
    pub end_time: NaiveTime,
}

impl TimeRange {
    pub fn new(
        start_date: NaiveDate,
        start_time: NaiveTime,
        end_date: NaiveDate,
        end_time: NaiveTime,
    ) -> Self {
        Self {
            start_date,
            start_time,
            end_date,
            end_time,
        }
    }

    /// Single-day window.
    pub fn on(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self::new(date, start_time, date, end_time)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start_date.and_time(self.start_time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end_date.and_time(self.end_time)
    }

    /// Two windows conflict only when they share a start date and their
    /// half-open `[start_time, end_time)` intervals intersect.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_date == other.start_date
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }

    /// True once the window's end instant lies strictly before `now`.
    pub fn ends_before(&self, now: NaiveDateTime) -> bool {
        self.end_date < now.date() || (self.end_date == now.date() && self.end_time < now.time())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    Pending,
    Approved,
    Denied,
    Completed,
    Cancelled,
}

impl SlotStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Completed | Self::Cancelled)
    }

    /// Still occupying (or asking to occupy) the resource.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Admin state machine. User complete/cancel operations additionally take
    /// `pending → completed`, which is checked at the operation level.
    pub fn admits(self, target: SlotStatus) -> bool {
        match self {
            Self::Pending => matches!(
                target,
                Self::Approved | Self::Denied | Self::Cancelled
            ),
            Self::Approved => matches!(
                target,
                Self::Completed | Self::Cancelled | Self::Denied
            ),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    Maintenance,
    Unavailable,
    Reserved,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Maintenance => "maintenance",
            Self::Unavailable => "unavailable",
            Self::Reserved => "reserved",
        }
    }
}

/// One concrete date/time-range booking belonging to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub group_id: Ulid,
    pub range: TimeRange,
    pub status: SlotStatus,
    pub updated_at: NaiveDateTime,
    /// Admin who last transitioned the slot; `None` for user and sweeper moves.
    pub managed_by: Option<Ulid>,
}

/// A requester's single submission covering one or more slots on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Ulid,
    pub requester: Ulid,
    pub resource_id: Ulid,
    pub purpose: String,
    pub notes: Option<String>,
    pub responsible: Ulid,
    pub created_at: NaiveDateTime,
    pub slot_ids: Vec<Ulid>,
}

/// Per-resource booking state. All mutation happens under this struct's
/// `RwLock` write guard, which is what makes conflict-scan-then-write atomic.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub status: ResourceStatus,
    pub groups: HashMap<Ulid, Group>,
    /// Slots bucketed by start date; each bucket sorted by start time. This is
    /// the `(resource, start_date)` index the conflict scan runs against.
    pub days: BTreeMap<NaiveDate, Vec<Slot>>,
    slot_days: HashMap<Ulid, NaiveDate>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, status: ResourceStatus) -> Self {
        Self {
            id,
            name,
            status,
            groups: HashMap::new(),
            days: BTreeMap::new(),
            slot_days: HashMap::new(),
        }
    }

    /// Insert a slot into its start-date bucket, keeping the bucket sorted.
    pub fn insert_slot(&mut self, slot: Slot) {
        let id = slot.id;
        let day = slot.range.start_date;
        let bucket = self.days.entry(day).or_default();
        let pos = bucket
            .binary_search_by_key(&slot.range.start_time, |s| s.range.start_time)
            .unwrap_or_else(|e| e);
        bucket.insert(pos, slot);
        self.slot_days.insert(id, day);
    }

    pub fn remove_slot(&mut self, id: &Ulid) -> Option<Slot> {
        let day = self.slot_days.remove(id)?;
        let bucket = self.days.get_mut(&day)?;
        let pos = bucket.iter().position(|s| s.id == *id)?;
        let slot = bucket.remove(pos);
        if bucket.is_empty() {
            self.days.remove(&day);
        }
        Some(slot)
    }

    pub fn slot(&self, id: &Ulid) -> Option<&Slot> {
        let day = self.slot_days.get(id)?;
        self.days.get(day)?.iter().find(|s| s.id == *id)
    }

    pub fn set_slot_status(
        &mut self,
        id: &Ulid,
        status: SlotStatus,
        managed_by: Option<Ulid>,
        at: NaiveDateTime,
    ) -> bool {
        let Some(day) = self.slot_days.get(id).copied() else {
            return false;
        };
        let Some(bucket) = self.days.get_mut(&day) else {
            return false;
        };
        let Some(slot) = bucket.iter_mut().find(|s| s.id == *id) else {
            return false;
        };
        slot.status = status;
        slot.managed_by = managed_by;
        slot.updated_at = at;
        true
    }

    /// All slots bucketed on `date`, sorted by start time.
    pub fn slots_on(&self, date: NaiveDate) -> &[Slot] {
        self.days.get(&date).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn slot_count(&self) -> usize {
        self.slot_days.len()
    }

    pub fn has_approved(&self) -> bool {
        self.days
            .values()
            .flatten()
            .any(|s| s.status == SlotStatus::Approved)
    }
}

/// Seed for a slot inside a `GroupCreated` record; slots always start pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSeed {
    pub id: Ulid,
    pub range: TimeRange,
}

/// Journal record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        name: String,
        status: ResourceStatus,
    },
    ResourceStatusChanged {
        id: Ulid,
        status: ResourceStatus,
    },
    GroupCreated {
        id: Ulid,
        resource_id: Ulid,
        requester: Ulid,
        purpose: String,
        notes: Option<String>,
        responsible: Ulid,
        created_at: NaiveDateTime,
        slots: Vec<SlotSeed>,
    },
    SlotTransitioned {
        id: Ulid,
        resource_id: Ulid,
        status: SlotStatus,
        managed_by: Option<Ulid>,
        at: NaiveDateTime,
    },
    /// One record for a batched transition (cascade deny, bulk ops, sweep).
    SlotsTransitioned {
        ids: Vec<Ulid>,
        resource_id: Ulid,
        status: SlotStatus,
        managed_by: Option<Ulid>,
        at: NaiveDateTime,
    },
    GroupDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
}

/// Input to `Engine::create_group`.
#[derive(Debug, Clone)]
pub struct CreateGroup {
    pub requester: Ulid,
    pub resource_id: Ulid,
    pub purpose: String,
    pub notes: Option<String>,
    pub responsible: Ulid,
    pub slots: Vec<TimeRange>,
}

/// Produced by the fan-out; persisted and delivered by the host system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Ulid,
    pub recipient: Ulid,
    pub group_id: Option<Ulid>,
    pub message: String,
    pub read: bool,
    pub created_at: NaiveDateTime,
}

impl NotificationEvent {
    pub fn new(recipient: Ulid, group_id: Option<Ulid>, message: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            recipient,
            group_id,
            message: message.into(),
            read: false,
            created_at: chrono::Local::now().naive_local(),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub group_id: Ulid,
    pub resource_id: Ulid,
    pub range: TimeRange,
    pub status: SlotStatus,
    pub managed_by: Option<Ulid>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester: Ulid,
    pub purpose: String,
    pub notes: Option<String>,
    pub responsible: Ulid,
    pub created_at: NaiveDateTime,
    pub slots: Vec<SlotInfo>,
}

/// One approved window in the month view; serializes as `HH:MM` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Serialize for BookedRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("BookedRange", 2)?;
        st.serialize_field("start", &self.start.format("%H:%M").to_string())?;
        st.serialize_field("end", &self.end.format("%H:%M").to_string())?;
        st.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn overlap_same_date() {
        let a = TimeRange::on(d(2025, 10, 2), t(14, 0), t(16, 0));
        let b = TimeRange::on(d(2025, 10, 2), t(14, 30), t(15, 30));
        let c = TimeRange::on(d(2025, 10, 2), t(16, 0), t(17, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, half-open
    }

    #[test]
    fn overlap_requires_matching_date() {
        let a = TimeRange::on(d(2025, 10, 2), t(14, 0), t(16, 0));
        let b = TimeRange::on(d(2025, 10, 3), t(14, 0), t(16, 0));
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn overlap_containment() {
        let outer = TimeRange::on(d(2025, 10, 2), t(9, 0), t(18, 0));
        let inner = TimeRange::on(d(2025, 10, 2), t(12, 0), t(13, 0));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn ends_before_is_strict() {
        let r = TimeRange::on(d(2025, 10, 2), t(14, 0), t(16, 0));
        assert!(r.ends_before(d(2025, 10, 3).and_time(t(0, 0))));
        assert!(r.ends_before(d(2025, 10, 2).and_time(t(16, 1))));
        // End exactly at "now" is not yet expired.
        assert!(!r.ends_before(d(2025, 10, 2).and_time(t(16, 0))));
        assert!(!r.ends_before(d(2025, 10, 2).and_time(t(15, 0))));
    }

    #[test]
    fn status_machine() {
        use SlotStatus::*;
        assert!(Pending.admits(Approved));
        assert!(Pending.admits(Denied));
        assert!(Pending.admits(Cancelled));
        assert!(!Pending.admits(Completed));
        assert!(Approved.admits(Completed));
        assert!(Approved.admits(Cancelled));
        assert!(Approved.admits(Denied));
        for terminal in [Denied, Completed, Cancelled] {
            assert!(terminal.is_terminal());
            for target in [Pending, Approved, Denied, Completed, Cancelled] {
                assert!(!terminal.admits(target));
            }
        }
    }

    fn slot(range: TimeRange) -> Slot {
        Slot {
            id: Ulid::new(),
            group_id: Ulid::new(),
            range,
            status: SlotStatus::Pending,
            updated_at: d(2025, 1, 1).and_time(t(0, 0)),
            managed_by: None,
        }
    }

    #[test]
    fn insert_keeps_bucket_sorted() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        let day = d(2025, 10, 2);
        rs.insert_slot(slot(TimeRange::on(day, t(14, 0), t(15, 0))));
        rs.insert_slot(slot(TimeRange::on(day, t(9, 0), t(10, 0))));
        rs.insert_slot(slot(TimeRange::on(day, t(11, 0), t(12, 0))));
        let starts: Vec<NaiveTime> = rs.slots_on(day).iter().map(|s| s.range.start_time).collect();
        assert_eq!(starts, vec![t(9, 0), t(11, 0), t(14, 0)]);
    }

    #[test]
    fn remove_slot_clears_empty_bucket() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        let s = slot(TimeRange::on(d(2025, 10, 2), t(14, 0), t(15, 0)));
        let id = s.id;
        rs.insert_slot(s);
        assert_eq!(rs.slot_count(), 1);
        assert!(rs.remove_slot(&id).is_some());
        assert_eq!(rs.slot_count(), 0);
        assert!(rs.days.is_empty());
        assert!(rs.remove_slot(&id).is_none());
    }

    #[test]
    fn set_slot_status_updates_in_place() {
        let mut rs = ResourceState::new(Ulid::new(), "Lab".into(), ResourceStatus::Available);
        let s = slot(TimeRange::on(d(2025, 10, 2), t(14, 0), t(15, 0)));
        let id = s.id;
        rs.insert_slot(s);
        let admin = Ulid::new();
        let at = d(2025, 10, 1).and_time(t(8, 0));
        assert!(rs.set_slot_status(&id, SlotStatus::Approved, Some(admin), at));
        let got = rs.slot(&id).unwrap();
        assert_eq!(got.status, SlotStatus::Approved);
        assert_eq!(got.managed_by, Some(admin));
        assert_eq!(got.updated_at, at);
        assert!(rs.has_approved());
        assert!(!rs.set_slot_status(&Ulid::new(), SlotStatus::Denied, None, at));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::GroupCreated {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            requester: Ulid::new(),
            purpose: "Physics practicals".into(),
            notes: Some("needs projector".into()),
            responsible: Ulid::new(),
            created_at: d(2025, 9, 30).and_time(t(8, 15)),
            slots: vec![SlotSeed {
                id: Ulid::new(),
                range: TimeRange::on(d(2025, 10, 2), t(14, 0), t(16, 0)),
            }],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn booked_range_renders_hh_mm() {
        let r = BookedRange {
            start: t(14, 0),
            end: t(16, 0),
        };
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json, serde_json::json!({"start": "14:00", "end": "16:00"}));
    }
}
