use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{find_conflicts, now_local, validate_range};
use super::fanout;
use super::{Engine, EngineError};

impl Engine {
    /// Persist a group with all of its slots pending and fan the "new request"
    /// out to every administrator.
    pub async fn create_group(&self, req: CreateGroup) -> Result<GroupInfo, EngineError> {
        if req.purpose.trim().is_empty() {
            return Err(EngineError::Validation("purpose is required"));
        }
        if req.purpose.len() > MAX_PURPOSE_LEN {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        if let Some(notes) = &req.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if req.slots.is_empty() {
            return Err(EngineError::Validation("at least one slot is required"));
        }
        if req.slots.len() > MAX_SLOTS_PER_GROUP {
            return Err(EngineError::LimitExceeded("too many slots in group"));
        }
        for range in &req.slots {
            validate_range(range)?;
        }

        let rs = self
            .get_resource(&req.resource_id)
            .ok_or(EngineError::NotFound(req.resource_id))?;
        let mut guard = rs.write().await;
        for range in &req.slots {
            if guard.slots_on(range.start_date).len() >= MAX_SLOTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many slots on that day"));
            }
        }

        let id = Ulid::new();
        let event = Event::GroupCreated {
            id,
            resource_id: req.resource_id,
            requester: req.requester,
            purpose: req.purpose,
            notes: req.notes,
            responsible: req.responsible,
            created_at: now_local(),
            slots: req
                .slots
                .iter()
                .map(|range| SlotSeed {
                    id: Ulid::new(),
                    range: *range,
                })
                .collect(),
        };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await?;

        let info = self.group_info(&guard, &id)?;
        let admins = self.admins.list_admins();
        let message = fanout::new_request_message(&guard.name, &req.slots);
        drop(guard);

        if !admins.is_empty() {
            self.dispatch(vec![fanout::Notice {
                recipients: admins,
                group_id: Some(id),
                message,
            }]);
        }
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "create_group").increment(1);
        Ok(info)
    }

    /// Approve one pending slot. Fails with `Conflict` when an approved slot
    /// already occupies an overlapping window; otherwise every pending slot on
    /// the resource that overlaps the newly approved window — across all
    /// groups — is denied in the same transaction, with one combined
    /// notification per affected parent group.
    pub async fn approve_slot(&self, slot_id: Ulid, actor: Ulid) -> Result<SlotInfo, EngineError> {
        let (resource_id, mut guard) = self.resolve_slot_write(&slot_id).await?;
        let slot = guard
            .slot(&slot_id)
            .cloned()
            .ok_or(EngineError::NotFound(slot_id))?;
        if slot.status != SlotStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: slot.status,
                to: SlotStatus::Approved,
            });
        }

        if let Some(hit) = find_conflicts(&guard, &slot.range, &[SlotStatus::Approved], slot_id)
            .first()
        {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(hit.id));
        }

        let displaced: Vec<Slot> = find_conflicts(&guard, &slot.range, &[SlotStatus::Pending], slot_id)
            .into_iter()
            .cloned()
            .collect();

        let now = now_local();
        let mut events = vec![Event::SlotTransitioned {
            id: slot_id,
            resource_id,
            status: SlotStatus::Approved,
            managed_by: Some(actor),
            at: now,
        }];
        if !displaced.is_empty() {
            events.push(Event::SlotsTransitioned {
                ids: displaced.iter().map(|s| s.id).collect(),
                resource_id,
                status: SlotStatus::Denied,
                managed_by: Some(actor),
                at: now,
            });
        }
        if guard.status == ResourceStatus::Available {
            events.push(Event::ResourceStatusChanged {
                id: resource_id,
                status: ResourceStatus::Reserved,
            });
        }
        self.persist_and_apply(&mut guard, &events).await?;

        if !displaced.is_empty() {
            metrics::counter!(observability::CASCADE_DENIALS_TOTAL)
                .increment(displaced.len() as u64);
        }
        let notices = fanout::conflict_notices(&guard, &displaced);
        let info = self.slot_info(&guard, &slot_id)?;
        drop(guard);

        self.dispatch(notices);
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "approve_slot").increment(1);
        Ok(info)
    }

    /// Direct denial, no conflict scan. Denying an approved slot (admin
    /// revocation) releases the resource if it was the last approved booking.
    pub async fn deny_slot(&self, slot_id: Ulid, actor: Ulid) -> Result<SlotInfo, EngineError> {
        self.admin_transition(slot_id, actor, SlotStatus::Denied, "deny_slot")
            .await
    }

    pub async fn cancel_slot(&self, slot_id: Ulid, actor: Ulid) -> Result<SlotInfo, EngineError> {
        self.admin_transition(slot_id, actor, SlotStatus::Cancelled, "cancel_slot")
            .await
    }

    async fn admin_transition(
        &self,
        slot_id: Ulid,
        actor: Ulid,
        target: SlotStatus,
        op: &'static str,
    ) -> Result<SlotInfo, EngineError> {
        let (resource_id, mut guard) = self.resolve_slot_write(&slot_id).await?;
        let slot = guard
            .slot(&slot_id)
            .cloned()
            .ok_or(EngineError::NotFound(slot_id))?;
        if !slot.status.admits(target) {
            return Err(EngineError::InvalidTransition {
                from: slot.status,
                to: target,
            });
        }

        let event = Event::SlotTransitioned {
            id: slot_id,
            resource_id,
            status: target,
            managed_by: Some(actor),
            at: now_local(),
        };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await?;

        let released = if slot.status == SlotStatus::Approved {
            self.release_if_idle(&mut guard).await?
        } else {
            false
        };
        let info = self.slot_info(&guard, &slot_id)?;
        drop(guard);

        if released {
            self.gateway.mark_available(resource_id);
        }
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => op).increment(1);
        Ok(info)
    }

    /// Approve every pending child of the group in one transaction, then run
    /// the batched cascade: all pending slots of *other* groups that overlap
    /// any newly approved window are denied in a single update, with exactly
    /// one summarized notification per affected parent group.
    pub async fn bulk_approve_group(
        &self,
        group_id: Ulid,
        actor: Ulid,
    ) -> Result<GroupInfo, EngineError> {
        let (resource_id, mut guard) = self.resolve_group_write(&group_id).await?;
        let group = guard
            .groups
            .get(&group_id)
            .cloned()
            .ok_or(EngineError::NotFound(group_id))?;
        let pending: Vec<Slot> = group
            .slot_ids
            .iter()
            .filter_map(|sid| guard.slot(sid))
            .filter(|s| s.status == SlotStatus::Pending)
            .cloned()
            .collect();
        if pending.is_empty() {
            return self.group_info(&guard, &group_id);
        }

        // Phase 1: validate every window against approved slots and against
        // the rest of the batch. All-or-nothing.
        for slot in &pending {
            if let Some(hit) =
                find_conflicts(&guard, &slot.range, &[SlotStatus::Approved], slot.id).first()
            {
                metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::Conflict(hit.id));
            }
        }
        for i in 0..pending.len() {
            for j in (i + 1)..pending.len() {
                if pending[i].range.overlaps(&pending[j].range) {
                    metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                    return Err(EngineError::Conflict(pending[i].id));
                }
            }
        }

        // Batched cascade scan across the other groups.
        let mut displaced: Vec<Slot> = Vec::new();
        for slot in &pending {
            for hit in find_conflicts(&guard, &slot.range, &[SlotStatus::Pending], slot.id) {
                if hit.group_id != group_id && !displaced.iter().any(|d| d.id == hit.id) {
                    displaced.push(hit.clone());
                }
            }
        }

        // Phase 2: commit approvals + denials + the status flip together.
        let now = now_local();
        let mut events = vec![Event::SlotsTransitioned {
            ids: pending.iter().map(|s| s.id).collect(),
            resource_id,
            status: SlotStatus::Approved,
            managed_by: Some(actor),
            at: now,
        }];
        if !displaced.is_empty() {
            events.push(Event::SlotsTransitioned {
                ids: displaced.iter().map(|s| s.id).collect(),
                resource_id,
                status: SlotStatus::Denied,
                managed_by: Some(actor),
                at: now,
            });
        }
        if guard.status == ResourceStatus::Available {
            events.push(Event::ResourceStatusChanged {
                id: resource_id,
                status: ResourceStatus::Reserved,
            });
        }
        self.persist_and_apply(&mut guard, &events).await?;

        if !displaced.is_empty() {
            metrics::counter!(observability::CASCADE_DENIALS_TOTAL)
                .increment(displaced.len() as u64);
        }
        let notices = fanout::conflict_notices(&guard, &displaced);
        let info = self.group_info(&guard, &group_id)?;
        drop(guard);

        self.dispatch(notices);
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "bulk_approve_group")
            .increment(1);
        Ok(info)
    }

    /// Deny every pending child of the group in one update. No conflict scan.
    pub async fn bulk_deny_group(
        &self,
        group_id: Ulid,
        actor: Ulid,
    ) -> Result<GroupInfo, EngineError> {
        let (resource_id, mut guard) = self.resolve_group_write(&group_id).await?;
        let group = guard
            .groups
            .get(&group_id)
            .cloned()
            .ok_or(EngineError::NotFound(group_id))?;
        let pending_ids: Vec<Ulid> = group
            .slot_ids
            .iter()
            .filter_map(|sid| guard.slot(sid))
            .filter(|s| s.status == SlotStatus::Pending)
            .map(|s| s.id)
            .collect();
        if pending_ids.is_empty() {
            return self.group_info(&guard, &group_id);
        }

        let event = Event::SlotsTransitioned {
            ids: pending_ids,
            resource_id,
            status: SlotStatus::Denied,
            managed_by: Some(actor),
            at: now_local(),
        };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await?;
        let info = self.group_info(&guard, &group_id)?;

        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "bulk_deny_group").increment(1);
        Ok(info)
    }

    /// Delete the group and cascade to its slots. No notification.
    pub async fn delete_group(&self, group_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_group_write(&group_id).await?;
        let group = guard
            .groups
            .get(&group_id)
            .cloned()
            .ok_or(EngineError::NotFound(group_id))?;
        let had_approved = group
            .slot_ids
            .iter()
            .filter_map(|sid| guard.slot(sid))
            .any(|s| s.status == SlotStatus::Approved);

        let event = Event::GroupDeleted {
            id: group_id,
            resource_id,
        };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await?;

        let released = if had_approved {
            self.release_if_idle(&mut guard).await?
        } else {
            false
        };
        drop(guard);

        if released {
            self.gateway.mark_available(resource_id);
        }
        tracing::info!(group = %group_id, actor = %actor, "group deleted");
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "delete_group").increment(1);
        Ok(())
    }

    /// Requester closes out their own group: every slot still in
    /// `{approved, pending}` moves to `target`, others are untouched.
    pub async fn user_complete_or_cancel_group(
        &self,
        group_id: Ulid,
        requester: Ulid,
        target: SlotStatus,
    ) -> Result<GroupInfo, EngineError> {
        validate_user_target(target)?;
        let (resource_id, mut guard) = self.resolve_group_write(&group_id).await?;
        let group = guard
            .groups
            .get(&group_id)
            .cloned()
            .ok_or(EngineError::NotFound(group_id))?;
        if group.requester != requester {
            return Err(EngineError::Permission(requester));
        }

        let movable: Vec<Slot> = group
            .slot_ids
            .iter()
            .filter_map(|sid| guard.slot(sid))
            .filter(|s| s.status.is_active())
            .cloned()
            .collect();
        if movable.is_empty() {
            return self.group_info(&guard, &group_id);
        }
        let removes_approved = movable.iter().any(|s| s.status == SlotStatus::Approved);

        let event = Event::SlotsTransitioned {
            ids: movable.iter().map(|s| s.id).collect(),
            resource_id,
            status: target,
            managed_by: None,
            at: now_local(),
        };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await?;

        let released = if removes_approved {
            self.release_if_idle(&mut guard).await?
        } else {
            false
        };
        let info = self.group_info(&guard, &group_id)?;
        drop(guard);

        if released {
            self.gateway.mark_available(resource_id);
        }
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "user_group_close")
            .increment(1);
        Ok(info)
    }

    /// Per-slot equivalent of `user_complete_or_cancel_group`.
    pub async fn user_complete_or_cancel_slot(
        &self,
        slot_id: Ulid,
        requester: Ulid,
        target: SlotStatus,
    ) -> Result<SlotInfo, EngineError> {
        validate_user_target(target)?;
        let (resource_id, mut guard) = self.resolve_slot_write(&slot_id).await?;
        let slot = guard
            .slot(&slot_id)
            .cloned()
            .ok_or(EngineError::NotFound(slot_id))?;
        let owner = guard
            .groups
            .get(&slot.group_id)
            .map(|g| g.requester)
            .ok_or(EngineError::NotFound(slot.group_id))?;
        if owner != requester {
            return Err(EngineError::Permission(requester));
        }
        if !slot.status.is_active() {
            return Err(EngineError::InvalidTransition {
                from: slot.status,
                to: target,
            });
        }

        let event = Event::SlotTransitioned {
            id: slot_id,
            resource_id,
            status: target,
            managed_by: None,
            at: now_local(),
        };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await?;

        let released = if slot.status == SlotStatus::Approved {
            self.release_if_idle(&mut guard).await?
        } else {
            false
        };
        let info = self.slot_info(&guard, &slot_id)?;
        drop(guard);

        if released {
            self.gateway.mark_available(resource_id);
        }
        metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => "user_slot_close")
            .increment(1);
        Ok(info)
    }
}

fn validate_user_target(target: SlotStatus) -> Result<(), EngineError> {
    if matches!(target, SlotStatus::Completed | SlotStatus::Cancelled) {
        Ok(())
    } else {
        Err(EngineError::Validation(
            "target must be completed or cancelled",
        ))
    }
}
