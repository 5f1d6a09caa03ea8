use super::{element_record, Engine};
use crate::events::{Intent, Record, RecordValue};
use crate::model::Attachment;
use crate::subscription::{Subscription, SubscriptionPayload};
use crate::types::*;
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use tracing::{debug, warn};

impl Engine<'_, '_> {
    /// Continue the process after the event of `subscription` occurred.
    pub(crate) async fn trigger(
        &mut self,
        subscription: &Subscription,
        variables: &Variables,
    ) -> Result<()> {
        if let SubscriptionPayload::Compensation { .. } = subscription.payload {
            warn!(
                subscription_key = subscription.key,
                "compensation subscriptions are not triggered directly"
            );
            return Ok(());
        }
        let Some(owner) = self.instance(subscription.scope_key).await? else {
            debug!(subscription_key = subscription.key, "subscription owner is gone");
            return Ok(());
        };
        if owner.state != ElementState::Activated {
            debug!(
                subscription_key = subscription.key,
                state = ?owner.state,
                "subscription owner is not waiting"
            );
            return Ok(());
        }

        let model = self.model(subscription.process_definition_key)?;
        let catch_event = model
            .catch_event(&subscription.catch_event_id)
            .ok_or_else(|| {
                anyhow!(
                    "catch event '{}' missing from its definition",
                    subscription.catch_event_id
                )
            })?
            .clone();
        let element = model
            .element(&catch_event.id)
            .ok_or_else(|| anyhow!("element '{}' missing from its definition", catch_event.id))?
            .clone();

        match catch_event.attachment {
            Attachment::Boundary => {
                let interrupting = subscription
                    .stored_interrupting()
                    .unwrap_or(catch_event.interrupting);
                let scope_key = owner
                    .flow_scope_key
                    .ok_or_else(|| anyhow!("boundary host {} has no flow scope", owner.key))?;
                if interrupting {
                    self.terminate(owner.key).await?;
                }
                self.propagate_variables(scope_key, variables).await?;
                if let Some(scope) = self.instance(scope_key).await? {
                    self.activate(&scope, &element).await?;
                }
            }
            Attachment::Own if catch_event.host_element_id != catch_event.id => {
                // The event-based gateway is decided: its other events are void.
                let scope_key = owner
                    .flow_scope_key
                    .ok_or_else(|| anyhow!("event-based gateway {} has no flow scope", owner.key))?;
                self.close_subscriptions(owner.key).await?;
                let mut gateway = owner.clone();
                self.transition(&mut gateway, ElementState::Completed, Intent::ElementCompleted)
                    .await?;
                self.propagate_variables(scope_key, variables).await?;
                if let Some(scope) = self.instance(scope_key).await? {
                    self.activate(&scope, &element).await?;
                }
            }
            Attachment::Own => {
                self.propagate_variables(owner.key, variables).await?;
                self.queue_complete(owner.key);
            }
            Attachment::EventSubProcessStart => {
                if catch_event.interrupting {
                    for child in self
                        .ctx
                        .store
                        .children(owner.process_instance_key, owner.key)
                        .await?
                    {
                        self.terminate(child.key).await?;
                    }
                    self.close_subscriptions(owner.key).await?;
                }
                self.propagate_variables(owner.key, variables).await?;
                let event_sub_process_id = element
                    .flow_scope_id
                    .as_deref()
                    .ok_or_else(|| {
                        anyhow!("start event '{}' has no event sub-process", element.id)
                    })?;
                let event_sub_process = model
                    .element(event_sub_process_id)
                    .ok_or_else(|| {
                        anyhow!("element '{}' missing from its definition", event_sub_process_id)
                    })?
                    .clone();
                self.activate(&owner, &event_sub_process).await?;
            }
        }
        Ok(())
    }

    /// Terminate `key` and everything below it, called process instances
    /// included. Children go before their scopes.
    pub(crate) async fn terminate(&mut self, key: Key) -> Result<()> {
        let mut subtree = Vec::new();
        let mut queue = VecDeque::from([key]);
        while let Some(next) = queue.pop_front() {
            let Some(instance) = self.instance(next).await? else { continue };
            for child in self
                .ctx
                .store
                .children(instance.process_instance_key, instance.key)
                .await?
            {
                queue.push_back(child.key);
            }
            if let Some(called) = instance.called_process_instance_key {
                queue.push_back(called);
            }
            subtree.push(instance);
        }

        for mut instance in subtree.into_iter().rev() {
            self.close_subscriptions(instance.key).await?;

            let mut records = Vec::new();
            if let Some(job_key) = instance.job_key {
                if let Some(job) = self.ctx.store.job(job_key).await? {
                    if let Some(incident) = self.ctx.store.job_incident(job_key).await? {
                        records.push(resolved(incident));
                    }
                    records.push(Record::event(job.key, Intent::Canceled, RecordValue::Job(job)));
                }
            }
            if let Some(incident) = self.ctx.store.element_incident(instance.key).await? {
                records.push(resolved(incident));
            }
            instance.state = ElementState::Terminated;
            records.push(element_record(Intent::ElementTerminated, &instance));
            self.emit(records).await?;
        }
        Ok(())
    }
}

fn resolved(incident: Incident) -> Record {
    Record::event(incident.key, Intent::Resolved, RecordValue::Incident(incident))
}
