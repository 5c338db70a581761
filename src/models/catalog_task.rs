use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::catalog_tasks;

/// Lifecycle of a single catalog (search-results) crawl task. Unlike
/// `ArticulumState`, this is a worker-queue status, not a domain state: it
/// tracks one unit of work, not the parent articulum's overall progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogTaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Invalid,
}

impl CatalogTaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogTaskStatus::Pending => "pending",
            CatalogTaskStatus::Processing => "processing",
            CatalogTaskStatus::Completed => "completed",
            CatalogTaskStatus::Failed => "failed",
            CatalogTaskStatus::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for CatalogTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized catalog task status: {0}")]
pub struct UnknownCatalogTaskStatus(pub String);

impl std::str::FromStr for CatalogTaskStatus {
    type Err = UnknownCatalogTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CatalogTaskStatus::Pending),
            "processing" => Ok(CatalogTaskStatus::Processing),
            "completed" => Ok(CatalogTaskStatus::Completed),
            "failed" => Ok(CatalogTaskStatus::Failed),
            "invalid" => Ok(CatalogTaskStatus::Invalid),
            other => Err(UnknownCatalogTaskStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = catalog_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CatalogTask {
    pub id: i32,
    pub articulum_id: i32,
    pub status: String,
    pub checkpoint_page: i32,
    pub worker_id: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub wrong_page_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogTask {
    pub fn status(&self) -> CatalogTaskStatus {
        self.status
            .parse()
            .expect("catalog_tasks.status contains a value outside CatalogTaskStatus")
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = catalog_tasks)]
pub struct NewCatalogTask {
    pub articulum_id: i32,
}
