//! One partition: an ordered command queue drained by a single worker task,
//! plus a timer checker feeding due timers back into the queue.

use crate::clock::Clock;
use crate::command::{Command, CommandEnvelope, CommandResponse};
use crate::migration::guard;
use crate::model::ProcessModelProvider;
use crate::processor::CommandProcessor;
use crate::store::EngineStore;
use crate::types::Key;
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

type Reply = oneshot::Sender<Result<CommandResponse>>;

/// Completes once the partition has processed the command.
pub type ResponseReceiver = oneshot::Receiver<Result<CommandResponse>>;

struct Submission {
    envelope: CommandEnvelope,
    /// `None` for follow-ups and timer triggers nobody waits on.
    reply: Option<Reply>,
}

/// Cheap, cloneable entry point to a running partition.
#[derive(Clone)]
pub struct PartitionHandle {
    id: u16,
    sender: mpsc::UnboundedSender<Submission>,
    store: Arc<dyn EngineStore>,
}

impl PartitionHandle {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    /// Submit one command and wait for its response.
    pub async fn submit(&self, command: Command) -> Result<CommandResponse> {
        let reply = self.enqueue(command).await?;
        self.response(reply).await
    }

    /// Stamp and queue one command without waiting for it.
    pub async fn enqueue(&self, command: Command) -> Result<ResponseReceiver> {
        let envelope = self.stamp(command).await?;
        self.send(envelope)
    }

    /// Queue `commands` back to back. Every migration is stamped before the
    /// first command is sent, so the batch behaves like commands written
    /// together by concurrent clients.
    pub async fn submit_batch(&self, commands: Vec<Command>) -> Result<Vec<CommandResponse>> {
        let mut envelopes = Vec::with_capacity(commands.len());
        for command in commands {
            envelopes.push(self.stamp(command).await?);
        }
        let replies = envelopes
            .into_iter()
            .map(|envelope| self.send(envelope))
            .collect::<Result<Vec<_>>>()?;

        let mut responses = Vec::with_capacity(replies.len());
        for reply in replies {
            responses.push(self.response(reply).await?);
        }
        Ok(responses)
    }

    /// Wrap `command` in an envelope. Migrations carry the instance sequence
    /// as it is now.
    pub async fn stamp(&self, command: Command) -> Result<CommandEnvelope> {
        let mut envelope = CommandEnvelope::new(command);
        envelope.observed_sequence = guard::stamp(self.store.as_ref(), &envelope.command).await?;
        Ok(envelope)
    }

    /// Queue a stamped envelope and return the receiver of its response.
    pub fn send(&self, envelope: CommandEnvelope) -> Result<ResponseReceiver> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(Submission {
                envelope,
                reply: Some(reply),
            })
            .map_err(|_| anyhow!("partition {} is shut down", self.id))?;
        Ok(receiver)
    }

    /// Wait for the response behind `reply`.
    pub async fn response(&self, reply: ResponseReceiver) -> Result<CommandResponse> {
        reply
            .await
            .map_err(|_| anyhow!("partition {} dropped the command", self.id))?
    }
}

/// A running partition. Dropping it leaves the tasks running until
/// [`Partition::shutdown`] or the runtime ends.
pub struct Partition {
    handle: PartitionHandle,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    timers: JoinHandle<()>,
}

impl Partition {
    pub fn start(
        id: u16,
        store: Arc<dyn EngineStore>,
        models: Arc<dyn ProcessModelProvider>,
        clock: Arc<dyn Clock>,
        timer_check_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = PartitionHandle {
            id,
            sender: sender.clone(),
            store: store.clone(),
        };

        let processor = CommandProcessor::new(id, store.clone(), models, clock.clone());
        let worker = tokio::spawn(
            run_worker(processor, receiver, sender.clone(), shutdown_rx.clone())
                .instrument(info_span!("partition", id)),
        );
        let timers = tokio::spawn(
            run_timer_checker(store, clock, sender, timer_check_interval, shutdown_rx)
                .instrument(info_span!("timers", id)),
        );
        info!(partition = id, "partition started");

        Self {
            handle,
            shutdown,
            worker,
            timers,
        }
    }

    pub fn handle(&self) -> PartitionHandle {
        self.handle.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.worker.await?;
        self.timers.await?;
        info!(partition = self.handle.id, "partition stopped");
        Ok(())
    }
}

async fn run_worker(
    mut processor: CommandProcessor,
    mut receiver: mpsc::UnboundedReceiver<Submission>,
    sender: mpsc::UnboundedSender<Submission>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let submission = tokio::select! {
            _ = shutdown.changed() => break,
            next = receiver.recv() => match next {
                Some(submission) => submission,
                None => break,
            },
        };

        let result = processor.process(&submission.envelope).await;
        let response = match result {
            Ok(processed) => {
                for command in processed.follow_ups {
                    debug!(command = command.name(), "follow-up queued");
                    let follow_up = Submission {
                        envelope: CommandEnvelope::new(command),
                        reply: None,
                    };
                    if sender.send(follow_up).is_err() {
                        error!("partition queue closed while queueing a follow-up");
                    }
                }
                Ok(processed.response)
            }
            Err(e) => Err(e),
        };
        if let Some(reply) = submission.reply {
            // The submitter may have stopped waiting.
            let _ = reply.send(response);
        }
    }
}

async fn run_timer_checker(
    store: Arc<dyn EngineStore>,
    clock: Arc<dyn Clock>,
    sender: mpsc::UnboundedSender<Submission>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // Timers already queued; a timer is queued once while it stays due.
    let mut queued: HashSet<Key> = HashSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let due = match store.due_timers(clock.now()).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to read due timers");
                continue;
            }
        };
        let due_keys: HashSet<Key> = due.iter().map(|t| t.key).collect();
        queued.retain(|key| due_keys.contains(key));

        for timer in due {
            if !queued.insert(timer.key) {
                continue;
            }
            debug!(timer_key = timer.key, element_id = %timer.catch_event_id, "timer due");
            let submission = Submission {
                envelope: CommandEnvelope::new(Command::TriggerTimer { timer_key: timer.key }),
                reply: None,
            };
            if sender.send(submission).is_err() {
                return;
            }
        }
    }
}
