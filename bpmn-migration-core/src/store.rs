use crate::events::Record;
use crate::expression::VariableScope;
use crate::subscription::Subscription;
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence trait for all partition state.
///
/// State changes only through [`EngineStore::append`]: every record is
/// logged and applied in one step, so the log and the state never diverge.
/// Reads are point lookups by key and range scans keyed by process instance
/// or owning scope.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // ── Element instances ──

    async fn element_instance(&self, key: Key) -> Result<Option<ElementInstance>>;

    /// Direct children of `flow_scope_key`, ordered by key.
    async fn children(&self, process_instance_key: Key, flow_scope_key: Key)
        -> Result<Vec<ElementInstance>>;

    /// Every active element instance of a process instance, ordered by key.
    async fn process_instance_elements(&self, process_instance_key: Key)
        -> Result<Vec<ElementInstance>>;

    /// Current command sequence of a process instance; `None` once the
    /// instance is gone.
    async fn instance_sequence(&self, process_instance_key: Key) -> Result<Option<u64>>;

    // ── Joining gateways ──

    async fn taken_sequence_flows(&self, flow_scope_key: Key) -> Result<Vec<TakenSequenceFlow>>;

    // ── Jobs ──

    async fn job(&self, key: Key) -> Result<Option<Job>>;
    async fn process_instance_jobs(&self, process_instance_key: Key) -> Result<Vec<Job>>;

    // ── Incidents ──

    async fn incident(&self, key: Key) -> Result<Option<Incident>>;
    /// The open process incident of an element instance.
    async fn element_incident(&self, element_instance_key: Key) -> Result<Option<Incident>>;
    async fn job_incident(&self, job_key: Key) -> Result<Option<Incident>>;
    async fn process_instance_incidents(&self, process_instance_key: Key) -> Result<Vec<Incident>>;

    // ── Subscriptions ──

    async fn subscription(&self, key: Key) -> Result<Option<Subscription>>;
    async fn scope_subscriptions(&self, scope_key: Key) -> Result<Vec<Subscription>>;
    async fn process_instance_subscriptions(&self, process_instance_key: Key)
        -> Result<Vec<Subscription>>;

    /// Message-side registrations matching a published message.
    async fn message_subscriptions(&self, message_name: &str, correlation_key: &str)
        -> Result<Vec<Subscription>>;
    async fn signal_subscriptions(&self, signal_name: &str) -> Result<Vec<Subscription>>;
    async fn due_timers(&self, now: Timestamp) -> Result<Vec<Subscription>>;

    // ── Variables ──

    async fn local_variables(&self, scope_key: Key) -> Result<Vec<VariableRecord>>;

    // ── Record stream (append-only) ──

    /// Assign positions, apply and log `records` atomically. Returns the
    /// positioned records.
    async fn append(&self, records: Vec<Record>) -> Result<Vec<Record>>;
    async fn read_records(&self, from_position: u64) -> Result<Vec<Record>>;
}

/// Variables visible from `element_instance_key`, walking up the flow scopes.
pub async fn variable_scope(
    store: &dyn EngineStore,
    element_instance_key: Key,
) -> Result<VariableScope> {
    let mut chain = Vec::new();
    let mut next = Some(element_instance_key);
    while let Some(key) = next {
        match store.element_instance(key).await? {
            Some(instance) => {
                next = instance.flow_scope_key;
                chain.push(key);
            }
            None => break,
        }
    }

    let mut scope = VariableScope::new();
    for key in chain.into_iter().rev() {
        for variable in store.local_variables(key).await? {
            scope.insert(variable.name, variable.value);
        }
    }
    Ok(scope)
}

/// Appends on behalf of one command, stamping its request id on every record.
pub struct RecordWriter<'a> {
    store: &'a dyn EngineStore,
    request_id: Option<Uuid>,
    written: Vec<Record>,
}

impl<'a> RecordWriter<'a> {
    pub fn new(store: &'a dyn EngineStore, request_id: Option<Uuid>) -> Self {
        Self {
            store,
            request_id,
            written: Vec::new(),
        }
    }

    pub async fn append(&mut self, mut records: Vec<Record>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &mut records {
            record.request_id = self.request_id;
        }
        let appended = self.store.append(records).await?;
        self.written.extend(appended);
        Ok(())
    }

    pub fn written(&self) -> &[Record] {
        &self.written
    }

    pub fn into_records(self) -> Vec<Record> {
        self.written
    }
}
