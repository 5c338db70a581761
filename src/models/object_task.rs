use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::object_tasks;

/// Lifecycle of a single listing (object page) crawl task, gated behind the
/// global advisory-lock concurrency cap at acquire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectTaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Invalid,
}

impl ObjectTaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectTaskStatus::Pending => "pending",
            ObjectTaskStatus::Processing => "processing",
            ObjectTaskStatus::Completed => "completed",
            ObjectTaskStatus::Failed => "failed",
            ObjectTaskStatus::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for ObjectTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized object task status: {0}")]
pub struct UnknownObjectTaskStatus(pub String);

impl std::str::FromStr for ObjectTaskStatus {
    type Err = UnknownObjectTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ObjectTaskStatus::Pending),
            "processing" => Ok(ObjectTaskStatus::Processing),
            "completed" => Ok(ObjectTaskStatus::Completed),
            "failed" => Ok(ObjectTaskStatus::Failed),
            "invalid" => Ok(ObjectTaskStatus::Invalid),
            other => Err(UnknownObjectTaskStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = object_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ObjectTask {
    pub id: i32,
    pub articulum_id: i32,
    pub avito_item_id: String,
    pub status: String,
    pub worker_id: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectTask {
    pub fn status(&self) -> ObjectTaskStatus {
        self.status
            .parse()
            .expect("object_tasks.status contains a value outside ObjectTaskStatus")
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = object_tasks)]
pub struct NewObjectTask<'a> {
    pub articulum_id: i32,
    pub avito_item_id: &'a str,
}
