//! Lazy expiration sweep, run before list queries rather than as a background
//! job: an approved slot whose end instant has passed becomes `completed`; a
//! pending slot whose end instant has passed becomes `denied` (a lapsed
//! request is treated as refused, not silently dropped).

use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::{Event, SlotStatus};
use crate::observability;

use super::conflict::now_local;
use super::{Engine, EngineError};

/// Which slots a sweep may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    All,
    /// Only slots whose parent group belongs to this requester.
    Requester(Ulid),
}

impl Engine {
    /// Promote expired slots to their terminal states. "Now" is taken once,
    /// from the local clock. Idempotent: a second run promotes nothing.
    pub async fn sweep_expired(&self, scope: SweepScope) -> Result<u64, EngineError> {
        self.sweep_expired_at(scope, now_local()).await
    }

    /// Clock-injected variant of [`Engine::sweep_expired`].
    pub async fn sweep_expired_at(
        &self,
        scope: SweepScope,
        now: NaiveDateTime,
    ) -> Result<u64, EngineError> {
        let mut promoted: u64 = 0;
        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();

        for resource_id in resource_ids {
            let Some(rs) = self.get_resource(&resource_id) else {
                continue;
            };
            let mut guard = rs.write().await;

            let mut to_complete: Vec<Ulid> = Vec::new();
            let mut to_deny: Vec<Ulid> = Vec::new();
            // Only buckets up to today can hold expired slots (end >= start).
            for (_, bucket) in guard.days.range(..=now.date()) {
                for slot in bucket {
                    if !slot.range.ends_before(now) {
                        continue;
                    }
                    if let SweepScope::Requester(requester) = scope
                        && guard
                            .groups
                            .get(&slot.group_id)
                            .is_none_or(|g| g.requester != requester)
                    {
                        continue;
                    }
                    match slot.status {
                        SlotStatus::Approved => to_complete.push(slot.id),
                        SlotStatus::Pending => to_deny.push(slot.id),
                        _ => {}
                    }
                }
            }
            if to_complete.is_empty() && to_deny.is_empty() {
                continue;
            }

            let removed_approved = !to_complete.is_empty();
            promoted += (to_complete.len() + to_deny.len()) as u64;
            let mut events = Vec::new();
            if !to_complete.is_empty() {
                events.push(Event::SlotsTransitioned {
                    ids: to_complete,
                    resource_id,
                    status: SlotStatus::Completed,
                    managed_by: None,
                    at: now,
                });
            }
            if !to_deny.is_empty() {
                events.push(Event::SlotsTransitioned {
                    ids: to_deny,
                    resource_id,
                    status: SlotStatus::Denied,
                    managed_by: None,
                    at: now,
                });
            }
            self.persist_and_apply(&mut guard, &events).await?;

            let released = if removed_approved {
                self.release_if_idle(&mut guard).await?
            } else {
                false
            };
            drop(guard);
            if released {
                self.gateway.mark_available(resource_id);
            }
        }

        if promoted > 0 {
            metrics::counter!(observability::SWEEP_PROMOTIONS_TOTAL).increment(promoted);
            tracing::debug!(promoted, "expiration sweep promoted stale slots");
        }
        Ok(promoted)
    }
}
