//! Queryable/insertable row types for the coordination engine's eight tables.

mod articulum;
mod catalog_task;
mod object_task;
mod proxy;
mod records;

pub use articulum::{Articulum, ArticulumState, NewArticulum};
pub use catalog_task::{CatalogTask, CatalogTaskStatus, NewCatalogTask};
pub use object_task::{NewObjectTask, ObjectTask, ObjectTaskStatus};
pub use proxy::{NewProxy, Proxy};
pub use records::{
    CatalogListing, NewCatalogListing, NewObjectData, NewValidationResult, ObjectData,
    ValidationResult, ValidationType,
};
