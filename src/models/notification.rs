use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::join_request::JoinRequestStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JoinRequest,
    JoinAccepted,
    JoinRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationSender {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripNotification {
    pub id: String,
    pub recipient_id: String,
    pub request_id: String,
    pub trip_id: String,
    pub trip_name: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from: NotificationSender,
    pub message: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub status: JoinRequestStatus,
    pub created_at: DateTime<Utc>,
}
