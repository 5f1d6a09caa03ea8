use crate::clock::Clock;
use crate::command::{Command, CommandEnvelope, CommandResponse};
use crate::engine;
use crate::error::ProcessingError;
use crate::events::{Intent, Record, RecordValue, RejectionRecord};
use crate::keys::KeyGenerator;
use crate::migration;
use crate::model::{ProcessModel, ProcessModelProvider};
use crate::store::{EngineStore, RecordWriter};
use crate::types::{Key, Timestamp};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Everything a handler needs while processing one command.
pub struct ProcessingContext<'a> {
    pub store: &'a dyn EngineStore,
    pub models: &'a dyn ProcessModelProvider,
    pub keys: &'a mut KeyGenerator,
    /// Frozen for the duration of the command.
    pub now: Timestamp,
    pub writer: RecordWriter<'a>,
    /// Commands to enqueue at the tail of the partition queue.
    pub follow_ups: Vec<Command>,
}

impl ProcessingContext<'_> {
    /// Model of a running instance. Deployed models are never removed, so a
    /// miss is an internal error.
    pub fn model(&self, process_definition_key: Key) -> Result<Arc<ProcessModel>> {
        self.models
            .model_by_key(process_definition_key)
            .ok_or_else(|| anyhow!("process definition {} is not deployed", process_definition_key))
    }
}

/// Outcome of one processed command.
#[derive(Debug)]
pub struct Processed {
    pub response: CommandResponse,
    pub follow_ups: Vec<Command>,
}

/// Applies commands for one partition. Owned by the partition worker, which
/// makes it the only writer to the partition's store.
pub struct CommandProcessor {
    store: Arc<dyn EngineStore>,
    models: Arc<dyn ProcessModelProvider>,
    clock: Arc<dyn Clock>,
    keys: KeyGenerator,
}

impl CommandProcessor {
    pub fn new(
        partition_id: u16,
        store: Arc<dyn EngineStore>,
        models: Arc<dyn ProcessModelProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            models,
            clock,
            keys: KeyGenerator::new(partition_id),
        }
    }

    pub fn partition_id(&self) -> u16 {
        self.keys.partition_id()
    }

    pub async fn process(&mut self, envelope: &CommandEnvelope) -> Result<Processed> {
        let store = self.store.as_ref();
        let mut ctx = ProcessingContext {
            store,
            models: self.models.as_ref(),
            keys: &mut self.keys,
            now: self.clock.now(),
            writer: RecordWriter::new(store, Some(envelope.request_id)),
            follow_ups: Vec::new(),
        };

        let command = &envelope.command;
        let result = match command {
            Command::MigrateProcessInstance(migration) => {
                migration::migrate(&mut ctx, migration, envelope.observed_sequence).await
            }
            other => engine::handle(&mut ctx, other).await,
        };

        match result {
            Ok(key) => {
                let follow_ups = std::mem::take(&mut ctx.follow_ups);
                let records = ctx.writer.into_records();
                debug!(command = command.name(), key, records = records.len(), "command processed");
                Ok(Processed {
                    response: CommandResponse::Accepted {
                        request_id: envelope.request_id,
                        key,
                        records,
                    },
                    follow_ups,
                })
            }
            Err(ProcessingError::Rejected(rejection)) => {
                warn!(
                    command = command.name(),
                    rejection_type = ?rejection.rejection_type,
                    reason = %rejection.reason,
                    "command rejected"
                );
                let process_instance_key = match command {
                    Command::MigrateProcessInstance(m) => Some(m.process_instance_key),
                    _ => None,
                };
                let mut writer = RecordWriter::new(store, Some(envelope.request_id));
                writer
                    .append(vec![Record::event(
                        command.routing_key().unwrap_or(-1),
                        Intent::Rejected,
                        RecordValue::CommandRejection(RejectionRecord {
                            command: command.name().to_string(),
                            process_instance_key,
                            rejection: rejection.clone(),
                        }),
                    )])
                    .await?;
                Ok(Processed {
                    response: CommandResponse::Rejected {
                        request_id: envelope.request_id,
                        command: command.name().to_string(),
                        rejection,
                    },
                    follow_ups: Vec::new(),
                })
            }
            Err(ProcessingError::Internal(e)) => {
                error!(command = command.name(), error = %e, "command processing failed");
                Err(e)
            }
        }
    }
}
