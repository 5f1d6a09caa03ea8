//! Optimistic check that no instance-advancing command ran between enqueueing
//! a migration and applying it.

use crate::command::Command;
use crate::error::Rejection;
use crate::store::EngineStore;
use crate::types::Key;
use anyhow::Result;

/// Sequence to stamp on `command` at enqueue time. Only migrations carry one.
pub async fn stamp(store: &dyn EngineStore, command: &Command) -> Result<Option<u64>> {
    match command {
        Command::MigrateProcessInstance(migration) => {
            store.instance_sequence(migration.process_instance_key).await
        }
        _ => Ok(None),
    }
}

/// Compare the stamped sequence with the current one. An unstamped command
/// (instance unknown at enqueue time) is not checked here.
pub fn require_no_concurrent_command(
    process_instance_key: Key,
    observed: Option<u64>,
    current: Option<u64>,
) -> Result<(), Rejection> {
    match observed {
        Some(observed) if Some(observed) != current => Err(Rejection::invalid_state(format!(
            "Expected to migrate process instance '{}' but a concurrent command was executed on \
             the process instance. Please retry the migration.",
            process_instance_key
        ))),
        _ => Ok(()),
    }
}
