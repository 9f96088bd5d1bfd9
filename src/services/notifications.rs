use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        join_request::{JoinRequest, JoinRequestStatus},
        notification::{NotificationKind, NotificationSender, TripNotification},
    },
    services::storage::{encode, StorageService, SHARED_SCOPE},
};

pub const JOIN_REQUESTS_KEY: &str = "join-requests";
pub const NOTIFICATIONS_KEY: &str = "trip-notifications";

#[derive(Debug, Clone)]
pub struct JoinRequestInput {
    pub trip_id: String,
    pub trip_name: String,
    pub owner_id: String,
    pub requester_id: String,
    pub requester_name: String,
    pub requester_email: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(TripNotification),
    NoEffect,
}

/// Join requests plus every notification derived from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationBook {
    pub requests: Vec<JoinRequest>,
    pub notifications: Vec<TripNotification>,
}

impl NotificationBook {
    pub fn request_join(&mut self, input: JoinRequestInput) -> JoinRequest {
        let now = Utc::now();
        let request = JoinRequest {
            id: Uuid::new_v4().to_string(),
            trip_id: input.trip_id,
            trip_name: input.trip_name,
            owner_id: input.owner_id,
            requester_id: input.requester_id,
            requester_name: input.requester_name,
            requester_email: input.requester_email,
            message: input.message,
            status: JoinRequestStatus::Pending,
            created_at: now,
        };
        let message = Some(request.message.trim().to_string()).filter(|m| !m.is_empty());
        self.notifications.push(TripNotification {
            id: Uuid::new_v4().to_string(),
            recipient_id: request.owner_id.clone(),
            request_id: request.id.clone(),
            trip_id: request.trip_id.clone(),
            trip_name: request.trip_name.clone(),
            kind: NotificationKind::JoinRequest,
            from: NotificationSender {
                name: request.requester_name.clone(),
                email: request.requester_email.clone(),
            },
            message,
            read: false,
            status: JoinRequestStatus::Pending,
            created_at: now,
        });
        self.requests.push(request.clone());
        request
    }

    pub fn approve(&mut self, request_id: &str, owner: &NotificationSender) -> Transition {
        self.transition(request_id, JoinRequestStatus::Approved, owner)
    }

    pub fn reject(&mut self, request_id: &str, owner: &NotificationSender) -> Transition {
        self.transition(request_id, JoinRequestStatus::Rejected, owner)
    }

    /// Only pending requests move, and only once.
    fn transition(&mut self, request_id: &str, to: JoinRequestStatus, owner: &NotificationSender) -> Transition {
        let Some(request) = self
            .requests
            .iter_mut()
            .find(|request| request.id == request_id)
        else {
            return Transition::NoEffect;
        };
        if request.status.is_terminal() {
            return Transition::NoEffect;
        }
        request.status = to;

        for origin in self.notifications.iter_mut().filter(|n| {
            n.request_id == request_id && n.kind == NotificationKind::JoinRequest
        }) {
            origin.status = to;
        }

        let kind = match to {
            JoinRequestStatus::Approved => NotificationKind::JoinAccepted,
            _ => NotificationKind::JoinRejected,
        };
        let notification = TripNotification {
            id: Uuid::new_v4().to_string(),
            recipient_id: request.requester_id.clone(),
            request_id: request.id.clone(),
            trip_id: request.trip_id.clone(),
            trip_name: request.trip_name.clone(),
            kind,
            from: owner.clone(),
            message: None,
            read: false,
            status: to,
            created_at: Utc::now(),
        };
        self.notifications.push(notification.clone());
        Transition::Applied(notification)
    }

    pub fn for_viewer(&self, viewer_id: &str) -> Vec<TripNotification> {
        let mut items: Vec<TripNotification> = self
            .notifications
            .iter()
            .filter(|n| n.recipient_id == viewer_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub fn unread_count(&self, viewer_id: &str) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.recipient_id == viewer_id && !n.read)
            .count()
    }

    /// Returns whether the notification exists for this viewer.
    pub fn mark_read(&mut self, viewer_id: &str, notification_id: &str) -> bool {
        match self
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.recipient_id == viewer_id)
        {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self, viewer_id: &str) -> usize {
        let mut changed = 0;
        for notification in self
            .notifications
            .iter_mut()
            .filter(|n| n.recipient_id == viewer_id && !n.read)
        {
            notification.read = true;
            changed += 1;
        }
        changed
    }

    /// Drops the viewer's notifications; join requests stay.
    pub fn clear_all(&mut self, viewer_id: &str) -> usize {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.recipient_id != viewer_id);
        before - self.notifications.len()
    }

    pub fn request(&self, request_id: &str) -> Option<&JoinRequest> {
        self.requests.iter().find(|request| request.id == request_id)
    }
}

/// Persists the book in the shared scope. Read-modify-write cycles hold the
/// scope lock so concurrent requests do not drop each other's changes.
#[derive(Clone)]
pub struct NotificationService {
    storage: StorageService,
}

impl NotificationService {
    pub fn new(storage: StorageService) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> NotificationBook {
        NotificationBook {
            requests: self.storage.load_or_default(SHARED_SCOPE, JOIN_REQUESTS_KEY).await,
            notifications: self.storage.load_or_default(SHARED_SCOPE, NOTIFICATIONS_KEY).await,
        }
    }

    async fn load_for_update(&self) -> Result<NotificationBook, AppError> {
        Ok(NotificationBook {
            requests: self
                .storage
                .load_for_update(SHARED_SCOPE, JOIN_REQUESTS_KEY)
                .await?,
            notifications: self
                .storage
                .load_for_update(SHARED_SCOPE, NOTIFICATIONS_KEY)
                .await?,
        })
    }

    /// Requests and notifications are written together or not at all.
    async fn store(&self, book: &NotificationBook) -> Result<(), AppError> {
        self.storage
            .write_all(
                SHARED_SCOPE,
                &[
                    (JOIN_REQUESTS_KEY, encode(&book.requests)?),
                    (NOTIFICATIONS_KEY, encode(&book.notifications)?),
                ],
            )
            .await
    }

    async fn update<T>(&self, f: impl FnOnce(&mut NotificationBook) -> T) -> Result<T, AppError> {
        let _guard = self.storage.lock_scope(SHARED_SCOPE).await;
        let mut book = self.load_for_update().await?;
        let result = f(&mut book);
        self.store(&book).await?;
        Ok(result)
    }

    pub async fn list(&self, viewer_id: &str) -> Vec<TripNotification> {
        self.load().await.for_viewer(viewer_id)
    }

    pub async fn request_join(&self, input: JoinRequestInput) -> Result<JoinRequest, AppError> {
        if input.requester_id == input.owner_id {
            return Err(AppError::BadRequest("cannot request to join your own trip".into()));
        }
        let request = self.update(|book| book.request_join(input)).await?;
        info!(request_id = %request.id, trip_id = %request.trip_id, "join request created");
        Ok(request)
    }

    /// Only the trip owner may answer; anyone else gets `NotFound`.
    pub async fn respond(
        &self,
        owner_id: &str,
        owner: NotificationSender,
        request_id: &str,
        approve: bool,
    ) -> Result<Transition, AppError> {
        let _guard = self.storage.lock_scope(SHARED_SCOPE).await;
        let mut book = self.load_for_update().await?;
        match book.request(request_id) {
            Some(request) if request.owner_id == owner_id => {}
            _ => return Err(AppError::NotFound),
        }
        let transition = if approve {
            book.approve(request_id, &owner)
        } else {
            book.reject(request_id, &owner)
        };
        if let Transition::Applied(notification) = &transition {
            self.store(&book).await?;
            info!(request_id, status = %notification.status, "join request answered");
        }
        Ok(transition)
    }

    pub async fn mark_read(&self, viewer_id: &str, notification_id: &str) -> Result<bool, AppError> {
        self.update(|book| book.mark_read(viewer_id, notification_id))
            .await
    }

    pub async fn mark_all_read(&self, viewer_id: &str) -> Result<usize, AppError> {
        self.update(|book| book.mark_all_read(viewer_id)).await
    }

    pub async fn clear_all(&self, viewer_id: &str) -> Result<usize, AppError> {
        self.update(|book| book.clear_all(viewer_id)).await
    }
}
