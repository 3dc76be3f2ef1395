use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SweepScope};

impl Engine {
    /// Month view for free/busy calendars: approved slots only, keyed by
    /// date, each window an `{start, end}` pair (serialized as `HH:MM`).
    /// No side effects; does not invoke the sweeper. Unknown resource ⇒ empty.
    pub async fn booked_slots(
        &self,
        resource_id: Ulid,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<NaiveDate, Vec<BookedRange>>, EngineError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(EngineError::Validation("invalid year/month"))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or(EngineError::Validation("invalid year/month"))?;

        let mut out = BTreeMap::new();
        let Some(rs) = self.get_resource(&resource_id) else {
            return Ok(out);
        };
        let guard = rs.read().await;
        for (date, bucket) in guard.days.range(first..next) {
            let booked: Vec<BookedRange> = bucket
                .iter()
                .filter(|s| s.status == SlotStatus::Approved)
                .map(|s| BookedRange {
                    start: s.range.start_time,
                    end: s.range.end_time,
                })
                .collect();
            if !booked.is_empty() {
                out.insert(*date, booked);
            }
        }
        Ok(out)
    }

    /// Does any approved slot still occupy this resource?
    pub async fn has_active_approved_booking(&self, resource_id: Ulid) -> bool {
        match self.get_resource(&resource_id) {
            Some(rs) => rs.read().await.has_approved(),
            None => false,
        }
    }

    /// The caller's groups, newest first, after sweeping their expired slots.
    pub async fn list_groups_for_user(
        &self,
        requester: Ulid,
    ) -> Result<Vec<GroupInfo>, EngineError> {
        self.sweep_expired(SweepScope::Requester(requester)).await?;
        self.collect_groups(|g| g.requester == requester).await
    }

    /// Every group in the system, newest first, after a full expiration sweep.
    pub async fn list_all_groups(&self) -> Result<Vec<GroupInfo>, EngineError> {
        self.sweep_expired(SweepScope::All).await?;
        self.collect_groups(|_| true).await
    }

    async fn collect_groups(
        &self,
        keep: impl Fn(&Group) -> bool,
    ) -> Result<Vec<GroupInfo>, EngineError> {
        let mut out = Vec::new();
        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for resource_id in resource_ids {
            let Some(rs) = self.get_resource(&resource_id) else {
                continue;
            };
            let guard = rs.read().await;
            for group in guard.groups.values() {
                if keep(group) {
                    out.push(build_group_info(&guard, group));
                }
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.state
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_resources: uncontended read");
                ResourceInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    status: guard.status,
                }
            })
            .collect()
    }

    pub(super) fn group_info(
        &self,
        rs: &ResourceState,
        id: &Ulid,
    ) -> Result<GroupInfo, EngineError> {
        rs.groups
            .get(id)
            .map(|g| build_group_info(rs, g))
            .ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn slot_info(&self, rs: &ResourceState, id: &Ulid) -> Result<SlotInfo, EngineError> {
        rs.slot(id)
            .map(|s| make_slot_info(rs.id, s))
            .ok_or(EngineError::NotFound(*id))
    }
}

fn build_group_info(rs: &ResourceState, group: &Group) -> GroupInfo {
    let mut slots: Vec<SlotInfo> = group
        .slot_ids
        .iter()
        .filter_map(|sid| rs.slot(sid))
        .map(|s| make_slot_info(rs.id, s))
        .collect();
    slots.sort_by_key(|s| (s.range.start_date, s.range.start_time));
    GroupInfo {
        id: group.id,
        resource_id: group.resource_id,
        requester: group.requester,
        purpose: group.purpose.clone(),
        notes: group.notes.clone(),
        responsible: group.responsible,
        created_at: group.created_at,
        slots,
    }
}

fn make_slot_info(resource_id: Ulid, slot: &Slot) -> SlotInfo {
    SlotInfo {
        id: slot.id,
        group_id: slot.group_id,
        resource_id,
        range: slot.range,
        status: slot.status,
        managed_by: slot.managed_by,
        updated_at: slot.updated_at,
    }
}
