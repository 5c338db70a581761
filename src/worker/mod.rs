//! Worker runtimes and the process-level plumbing they share: a
//! heartbeat-emitting task wrapper, the cooperative page rendezvous, and
//! the browser/validation worker loops themselves.

pub mod browser_worker;
pub mod heartbeat;
pub mod rendezvous;
pub mod validation_worker;

use uuid::Uuid;

/// Mint an opaque worker identifier. Stable for the process lifetime of one
/// worker task/subprocess; stamped into `worker_id` columns on every row a
/// worker claims.
pub fn new_worker_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_carry_their_prefix() {
        let id = new_worker_id("browser");
        assert!(id.starts_with("browser-"));
    }
}
