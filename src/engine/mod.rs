mod conflict;
mod error;
mod fanout;
mod mutations;
mod queries;
mod sweep;

pub use error::EngineError;
pub use sweep::SweepScope;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{AdminDirectory, Notifier, ResourceGateway};
use crate::observability;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Reverse lookups: group id → resource id, slot id → resource id.
pub(super) struct EntityIndex {
    pub groups: DashMap<Ulid, Ulid>,
    pub slots: DashMap<Ulid, Ulid>,
}

impl EntityIndex {
    fn new() -> Self {
        Self {
            groups: DashMap::new(),
            slots: DashMap::new(),
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    wal: Mutex<Wal>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) admins: Arc<dyn AdminDirectory>,
    pub(super) gateway: Arc<dyn ResourceGateway>,
    pub(super) index: EntityIndex,
}

/// Apply an event directly to a ResourceState (no locking — caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &EntityIndex) {
    match event {
        Event::ResourceStatusChanged { status, .. } => {
            rs.status = *status;
        }
        Event::GroupCreated {
            id,
            resource_id,
            requester,
            purpose,
            notes,
            responsible,
            created_at,
            slots,
        } => {
            rs.groups.insert(
                *id,
                Group {
                    id: *id,
                    requester: *requester,
                    resource_id: *resource_id,
                    purpose: purpose.clone(),
                    notes: notes.clone(),
                    responsible: *responsible,
                    created_at: *created_at,
                    slot_ids: slots.iter().map(|s| s.id).collect(),
                },
            );
            for seed in slots {
                rs.insert_slot(Slot {
                    id: seed.id,
                    group_id: *id,
                    range: seed.range,
                    status: SlotStatus::Pending,
                    updated_at: *created_at,
                    managed_by: None,
                });
                index.slots.insert(seed.id, *resource_id);
            }
            index.groups.insert(*id, *resource_id);
        }
        Event::SlotTransitioned {
            id,
            status,
            managed_by,
            at,
            ..
        } => {
            rs.set_slot_status(id, *status, *managed_by, *at);
        }
        Event::SlotsTransitioned {
            ids,
            status,
            managed_by,
            at,
            ..
        } => {
            for id in ids {
                rs.set_slot_status(id, *status, *managed_by, *at);
            }
        }
        Event::GroupDeleted { id, .. } => {
            if let Some(group) = rs.groups.remove(id) {
                for slot_id in &group.slot_ids {
                    rs.remove_slot(slot_id);
                    index.slots.remove(slot_id);
                }
            }
            index.groups.remove(id);
        }
        // Registration is handled at the DashMap level, not here.
        Event::ResourceRegistered { .. } => {}
    }
}

/// Extract the resource id from an event (for non-registration events).
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceStatusChanged { id, .. } => Some(*id),
        Event::GroupCreated { resource_id, .. }
        | Event::SlotTransitioned { resource_id, .. }
        | Event::SlotsTransitioned { resource_id, .. }
        | Event::GroupDeleted { resource_id, .. } => Some(*resource_id),
        Event::ResourceRegistered { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notifier: Arc<dyn Notifier>,
        admins: Arc<dyn AdminDirectory>,
        gateway: Arc<dyn ResourceGateway>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let engine = Self {
            state: DashMap::new(),
            wal: Mutex::new(wal),
            notifier,
            admins,
            gateway,
            index: EntityIndex::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention).
        for event in &events {
            match event {
                Event::ResourceRegistered { id, name, status } => {
                    let rs = ResourceState::new(*id, name.clone(), *status);
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.state.get(&resource_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_resource(&mut guard, other, &engine.index);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Make a resource known to the engine (shadow of the external catalog).
    pub async fn register_resource(
        &self,
        id: Ulid,
        name: String,
        status: ResourceStatus,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceRegistered {
            id,
            name: name.clone(),
            status,
        };
        self.wal_append(std::slice::from_ref(&event)).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(ResourceState::new(id, name, status))));
        Ok(())
    }

    /// Adopt a status change decided by the external catalog.
    pub async fn set_resource_status(
        &self,
        id: Ulid,
        status: ResourceStatus,
    ) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::ResourceStatusChanged { id, status };
        self.persist_and_apply(&mut guard, std::slice::from_ref(&event))
            .await
    }

    async fn wal_append(&self, events: &[Event]) -> Result<(), EngineError> {
        let mut wal = self.wal.lock().await;
        let start = Instant::now();
        let result = wal
            .append_batch(events)
            .map_err(|e| EngineError::WalError(e.to_string()));
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        result
    }

    /// Journal the whole batch (one fsync), then apply it in memory.
    /// Caller holds the resource write lock for the entire transaction.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        events: &[Event],
    ) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }
        self.wal_append(events).await?;
        for event in events {
            apply_to_resource(rs, event, &self.index);
        }
        Ok(())
    }

    /// Lookup slot → resource, acquire the resource write lock.
    pub(super) async fn resolve_slot_write(
        &self,
        slot_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .index
            .slots
            .get(slot_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*slot_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        Ok((resource_id, rs.write_owned().await))
    }

    /// Lookup group → resource, acquire the resource write lock.
    pub(super) async fn resolve_group_write(
        &self,
        group_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .index
            .groups
            .get(group_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*group_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        Ok((resource_id, rs.write_owned().await))
    }

    /// Centralized availability recompute: once the last approved slot on a
    /// reserved resource disappears, flip it back to available. Idempotent.
    /// Returns true when the caller should fire `ResourceGateway::mark_available`
    /// after releasing the lock.
    pub(super) async fn release_if_idle(
        &self,
        rs: &mut ResourceState,
    ) -> Result<bool, EngineError> {
        if rs.status != ResourceStatus::Reserved || rs.has_approved() {
            return Ok(false);
        }
        let event = Event::ResourceStatusChanged {
            id: rs.id,
            status: ResourceStatus::Available,
        };
        self.persist_and_apply(rs, std::slice::from_ref(&event)).await?;
        metrics::counter!(observability::RESOURCE_RELEASES_TOTAL).increment(1);
        tracing::debug!(resource = %rs.id, "released resource back to available");
        Ok(true)
    }

    /// Hand notices to the notifier on a detached task. A slow or failing
    /// notifier never blocks or aborts the transition that already committed.
    pub(super) fn dispatch(&self, notices: Vec<fanout::Notice>) {
        if notices.is_empty() {
            return;
        }
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            for notice in notices {
                metrics::counter!(observability::NOTIFICATIONS_TOTAL)
                    .increment(notice.recipients.len() as u64);
                if let Err(e) = notifier
                    .notify_many(&notice.recipients, notice.group_id, &notice.message)
                    .await
                {
                    metrics::counter!(observability::NOTIFY_FAILURES_TOTAL).increment(1);
                    tracing::warn!("notification dispatch failed: {e}");
                }
            }
        });
    }

    /// Rewrite the journal with only the events needed to recreate the current
    /// state. Snapshots with `try_read`, so run this at a quiet moment.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let mut resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        resource_ids.sort();

        for resource_id in resource_ids {
            let Some(rs) = self.get_resource(&resource_id) else {
                continue;
            };
            let guard = rs.try_read().expect("compact: uncontended read");

            events.push(Event::ResourceRegistered {
                id: guard.id,
                name: guard.name.clone(),
                status: guard.status,
            });

            let mut groups: Vec<&Group> = guard.groups.values().collect();
            groups.sort_by_key(|g| (g.created_at, g.id));
            for group in groups {
                events.push(Event::GroupCreated {
                    id: group.id,
                    resource_id: guard.id,
                    requester: group.requester,
                    purpose: group.purpose.clone(),
                    notes: group.notes.clone(),
                    responsible: group.responsible,
                    created_at: group.created_at,
                    slots: group
                        .slot_ids
                        .iter()
                        .filter_map(|sid| guard.slot(sid))
                        .map(|s| SlotSeed {
                            id: s.id,
                            range: s.range,
                        })
                        .collect(),
                });
                // Re-establish non-pending statuses (with their attribution).
                for slot in group.slot_ids.iter().filter_map(|sid| guard.slot(sid)) {
                    if slot.status != SlotStatus::Pending {
                        events.push(Event::SlotTransitioned {
                            id: slot.id,
                            resource_id: guard.id,
                            status: slot.status,
                            managed_by: slot.managed_by,
                            at: slot.updated_at,
                        });
                    }
                }
            }
        }

        let mut wal = self.wal.lock().await;
        Wal::write_compact_file(wal.path(), &events)
            .and_then(|()| wal.swap_compact_file())
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.lock().await.appends_since_compact()
    }
}
