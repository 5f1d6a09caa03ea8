use crate::command::{Command, CommandResponse};
use crate::keys::partition_of;
use crate::partition::PartitionHandle;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Routes commands to partitions. Keyed commands go to the partition that
/// generated the key; new instances are spread round-robin; messages and
/// signals are offered to every partition, since any of them may hold a
/// matching subscription.
pub struct Broker {
    partitions: Vec<PartitionHandle>,
    next: AtomicUsize,
}

impl Broker {
    pub fn new(partitions: Vec<PartitionHandle>) -> Self {
        Self {
            partitions,
            next: AtomicUsize::new(0),
        }
    }

    pub fn partitions(&self) -> &[PartitionHandle] {
        &self.partitions
    }

    pub fn partition(&self, id: u16) -> Option<&PartitionHandle> {
        self.partitions.iter().find(|p| p.id() == id)
    }

    /// Responses of every partition the command was sent to.
    pub async fn submit(&self, command: Command) -> Result<Vec<CommandResponse>> {
        let targets = self.route(&command)?;
        let mut responses = Vec::with_capacity(targets.len());
        for partition in targets {
            responses.push(partition.submit(command.clone()).await?);
        }
        Ok(responses)
    }

    /// Queue `commands` in order as one batch of concurrent writes. Every
    /// command is stamped before the first one is sent, so a migration
    /// fails the concurrency check when an earlier command of the batch
    /// advances its instance. Responses are returned in batch order.
    pub async fn submit_batch(&self, commands: Vec<Command>) -> Result<Vec<Vec<CommandResponse>>> {
        let mut stamped = Vec::with_capacity(commands.len());
        for command in commands {
            let mut envelopes = Vec::new();
            for partition in self.route(&command)? {
                envelopes.push((partition, partition.stamp(command.clone()).await?));
            }
            stamped.push(envelopes);
        }

        let mut pending = Vec::with_capacity(stamped.len());
        for envelopes in stamped {
            let replies = envelopes
                .into_iter()
                .map(|(partition, envelope)| {
                    partition.send(envelope).map(|reply| (partition, reply))
                })
                .collect::<Result<Vec<_>>>()?;
            pending.push(replies);
        }

        let mut responses = Vec::with_capacity(pending.len());
        for replies in pending {
            let mut command_responses = Vec::with_capacity(replies.len());
            for (partition, reply) in replies {
                command_responses.push(partition.response(reply).await?);
            }
            responses.push(command_responses);
        }
        Ok(responses)
    }

    fn route(&self, command: &Command) -> Result<Vec<&PartitionHandle>> {
        if self.partitions.is_empty() {
            return Err(anyhow!("no partitions running"));
        }
        match (command, command.routing_key()) {
            (_, Some(key)) => {
                let id = partition_of(key);
                let partition = self
                    .partition(id)
                    .ok_or_else(|| anyhow!("key {} belongs to unknown partition {}", key, id))?;
                debug!(command = command.name(), partition = id, "routed by key");
                Ok(vec![partition])
            }
            (Command::PublishMessage { .. } | Command::BroadcastSignal { .. }, None) => {
                Ok(self.partitions.iter().collect())
            }
            (_, None) => {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.partitions.len();
                Ok(vec![&self.partitions[idx]])
            }
        }
    }
}
