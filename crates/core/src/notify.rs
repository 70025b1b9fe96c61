use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::entity::EntityRef;

/// Outbound message produced by a committed transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// The request now waits on `step_order`; addressed to that step's approvers.
    StepAdvanced {
        request_id: ApprovalId,
        entity: EntityRef,
        step_order: u32,
        step_name: String,
        recipients: Vec<String>,
    },
    /// The request reached a terminal status; addressed to the initiator.
    RequestResolved {
        request_id: ApprovalId,
        entity: EntityRef,
        status: ApprovalStatus,
        recipient: String,
    },
}

impl Notification {
    pub fn request_id(&self) -> &ApprovalId {
        match self {
            Self::StepAdvanced { request_id, .. } | Self::RequestResolved { request_id, .. } => {
                request_id
            }
        }
    }

    pub fn recipients(&self) -> Vec<&str> {
        match self {
            Self::StepAdvanced { recipients, .. } => {
                recipients.iter().map(String::as_str).collect()
            }
            Self::RequestResolved { recipient, .. } => vec![recipient.as_str()],
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notification: Notification) {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

/// Delivery is owned by an external messaging service; this records the hand-off.
#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let recipients = notification.recipients().join(",");
        match &notification {
            Notification::StepAdvanced { request_id, entity, step_order, .. } => {
                tracing::info!(
                    event_name = "approval.notification.step_advanced",
                    request_id = %request_id,
                    entity = %entity,
                    step_order = *step_order,
                    recipients = %recipients,
                    "approvers notified of pending step"
                );
            }
            Notification::RequestResolved { request_id, entity, status, .. } => {
                tracing::info!(
                    event_name = "approval.notification.resolved",
                    request_id = %request_id,
                    entity = %entity,
                    status = status.as_str(),
                    recipients = %recipients,
                    "initiator notified of outcome"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryNotifier, Notification, Notifier};
    use crate::domain::approval::{ApprovalId, ApprovalStatus};
    use crate::domain::entity::{EntityRef, EntityType};

    #[test]
    fn in_memory_notifier_keeps_send_order() {
        let notifier = InMemoryNotifier::default();
        let entity = EntityRef::new(EntityType::Document, "DOC-1");

        notifier.notify(Notification::StepAdvanced {
            request_id: ApprovalId("APR-1".to_string()),
            entity: entity.clone(),
            step_order: 2,
            step_name: "Engineer".to_string(),
            recipients: vec!["u-b".to_string(), "u-c".to_string()],
        });
        notifier.notify(Notification::RequestResolved {
            request_id: ApprovalId("APR-1".to_string()),
            entity,
            status: ApprovalStatus::Approved,
            recipient: "u-owner".to_string(),
        });

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipients(), vec!["u-b", "u-c"]);
        assert_eq!(sent[1].recipients(), vec!["u-owner"]);
        assert_eq!(sent[1].request_id().0, "APR-1");
    }
}
