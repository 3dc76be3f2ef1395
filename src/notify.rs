use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::NotificationEvent;

pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Delivery seam to the host system (persisted inbox, email, …).
///
/// Dispatch is fire-and-forget: the engine calls this after a transition has
/// committed, logs failures, and never rolls back or surfaces them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: Ulid,
        group_id: Option<Ulid>,
        message: &str,
    ) -> Result<(), NotifyError>;

    /// One notification event per recipient, same message.
    async fn notify_many(
        &self,
        recipients: &[Ulid],
        group_id: Option<Ulid>,
        message: &str,
    ) -> Result<(), NotifyError> {
        for recipient in recipients {
            self.notify(*recipient, group_id, message).await?;
        }
        Ok(())
    }
}

/// Who receives "new request" fan-outs.
pub trait AdminDirectory: Send + Sync {
    fn list_admins(&self) -> Vec<Ulid>;
}

/// Fixed admin list, for hosts without a live directory and for tests.
pub struct StaticAdmins(pub Vec<Ulid>);

impl AdminDirectory for StaticAdmins {
    fn list_admins(&self) -> Vec<Ulid> {
        self.0.clone()
    }
}

/// Outbound signal to the resource catalog: the last approved booking on a
/// resource is gone and it may be offered as available again.
pub trait ResourceGateway: Send + Sync {
    fn mark_available(&self, resource_id: Ulid);
}

/// For hosts whose catalog does not track availability.
pub struct NoopGateway;

impl ResourceGateway for NoopGateway {
    fn mark_available(&self, _resource_id: Ulid) {}
}

const CHANNEL_CAPACITY: usize = 256;

/// In-process notification hub: one broadcast channel per recipient.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<NotificationEvent>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a recipient's notifications. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Ulid) -> broadcast::Receiver<NotificationEvent> {
        let sender = self
            .channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Remove a recipient's channel.
    pub fn remove(&self, recipient: &Ulid) {
        self.channels.remove(recipient);
    }

    fn send(&self, event: NotificationEvent) {
        if let Some(sender) = self.channels.get(&event.recipient) {
            let _ = sender.send(event);
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn notify(
        &self,
        recipient: Ulid,
        group_id: Option<Ulid>,
        message: &str,
    ) -> Result<(), NotifyError> {
        self.send(NotificationEvent::new(recipient, group_id, message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let recipient = Ulid::new();
        let group_id = Ulid::new();
        let mut rx = hub.subscribe(recipient);

        hub.notify(recipient, Some(group_id), "your request was updated")
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.recipient, recipient);
        assert_eq!(event.group_id, Some(group_id));
        assert_eq!(event.message, "your request was updated");
        assert!(!event.read);
    }

    #[tokio::test]
    async fn notify_many_emits_one_event_per_recipient() {
        let hub = NotifyHub::new();
        let recipients: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        let mut rxs: Vec<_> = recipients.iter().map(|r| hub.subscribe(*r)).collect();

        hub.notify_many(&recipients, None, "new request").await.unwrap();

        for rx in &mut rxs {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.message, "new request");
        }
    }

    #[tokio::test]
    async fn notify_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — must not error or panic.
        hub.notify(Ulid::new(), None, "nobody listening").await.unwrap();
    }
}
