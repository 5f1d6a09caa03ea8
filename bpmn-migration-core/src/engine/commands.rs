use super::Engine;
use crate::command::Command;
use crate::error::{ProcessingError, Rejection};
use crate::events::{Intent, MessageRecord, Record, RecordValue, SignalRecord};
use crate::expression;
use crate::processor::ProcessingContext;
use crate::store::variable_scope;
use crate::subscription::{Subscription, SubscriptionPayload};
use crate::types::*;
use tracing::{debug, info};

/// Handle every command except migration.
pub async fn handle(
    ctx: &mut ProcessingContext<'_>,
    command: &Command,
) -> Result<Key, ProcessingError> {
    match command {
        Command::CreateProcessInstance {
            bpmn_process_id,
            version,
            variables,
        } => create_process_instance(ctx, bpmn_process_id, *version, variables).await,
        Command::CompleteJob { job_key, variables } => complete_job(ctx, *job_key, variables).await,
        Command::FailJob {
            job_key,
            retries,
            error_message,
        } => fail_job(ctx, *job_key, *retries, error_message.clone()).await,
        Command::ResolveIncident { incident_key } => resolve_incident(ctx, *incident_key).await,
        Command::TriggerTimer { timer_key } => trigger_timer(ctx, *timer_key).await,
        Command::PublishMessage {
            name,
            correlation_key,
            variables,
        } => publish_message(ctx, name, correlation_key, variables).await,
        Command::CorrelateMessage {
            subscription_key,
            message_name,
            variables,
        } => correlate_message(ctx, *subscription_key, message_name, variables).await,
        Command::BroadcastSignal {
            signal_name,
            variables,
        } => broadcast_signal(ctx, signal_name, variables).await,
        Command::SetVariables {
            scope_key,
            variables,
        } => set_variables(ctx, *scope_key, variables).await,
        Command::MigrateProcessInstance(_) => Err(anyhow::anyhow!(
            "migrations are not lifecycle commands"
        )
        .into()),
    }
}

// ── Process instances ──

async fn create_process_instance(
    ctx: &mut ProcessingContext<'_>,
    bpmn_process_id: &str,
    version: Option<u32>,
    variables: &Variables,
) -> Result<Key, ProcessingError> {
    let model = match version {
        Some(version) => ctx.models.model_by_version(bpmn_process_id, version),
        None => ctx.models.latest_by_id(bpmn_process_id),
    }
    .ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to find process definition with process ID '{}', but none found",
            bpmn_process_id
        ))
    })?;

    let mut engine = Engine::new(ctx);
    let key = engine.create_process_instance(&model, variables, None).await?;
    engine.run().await?;
    info!(
        process_instance_key = key,
        bpmn_process_id,
        version = model.version(),
        "process instance created"
    );
    Ok(key)
}

// ── Jobs ──

async fn complete_job(
    ctx: &mut ProcessingContext<'_>,
    job_key: Key,
    variables: &Variables,
) -> Result<Key, ProcessingError> {
    let job = ctx.store.job(job_key).await?.ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to complete job with key '{}', but no such job was found",
            job_key
        ))
    })?;
    if job.state == JobState::Failed {
        return Err(Rejection::invalid_state(format!(
            "Expected to complete job with key '{}', but it is in state 'FAILED'",
            job_key
        ))
        .into());
    }

    let mut engine = Engine::new(ctx);
    engine
        .emit(vec![Record::event(job.key, Intent::Completed, RecordValue::Job(job.clone()))])
        .await?;
    engine
        .propagate_variables(job.element_instance_key, variables)
        .await?;
    engine.queue_complete(job.element_instance_key);
    engine.run().await?;
    Ok(job_key)
}

async fn fail_job(
    ctx: &mut ProcessingContext<'_>,
    job_key: Key,
    retries: u32,
    error_message: Option<String>,
) -> Result<Key, ProcessingError> {
    let mut job = ctx.store.job(job_key).await?.ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to fail job with key '{}', but no such job was found",
            job_key
        ))
    })?;
    if job.state == JobState::Failed {
        return Err(Rejection::invalid_state(format!(
            "Expected to fail job with key '{}', but it is in state 'FAILED'",
            job_key
        ))
        .into());
    }

    job.retries = retries;
    job.error_message = error_message.clone();
    job.state = if retries == 0 { JobState::Failed } else { JobState::Activatable };

    let mut engine = Engine::new(ctx);
    engine
        .emit(vec![Record::event(job.key, Intent::Failed, RecordValue::Job(job.clone()))])
        .await?;
    if retries == 0 {
        if let Some(instance) = engine.instance(job.element_instance_key).await? {
            let message = error_message.unwrap_or_else(|| "No more retries left.".to_string());
            engine
                .raise_incident(&instance, IncidentErrorType::JobNoRetries, message, Some(job.key))
                .await?;
        }
    }
    Ok(job_key)
}

// ── Incidents ──

async fn resolve_incident(
    ctx: &mut ProcessingContext<'_>,
    incident_key: Key,
) -> Result<Key, ProcessingError> {
    let incident = ctx.store.incident(incident_key).await?.ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to resolve incident with key '{}', but no such incident was found",
            incident_key
        ))
    })?;

    let mut engine = Engine::new(ctx);
    engine
        .emit(vec![Record::event(
            incident.key,
            Intent::Resolved,
            RecordValue::Incident(incident.clone()),
        )])
        .await?;

    match incident.job_key {
        Some(job_key) => {
            // The job becomes workable again with at least one retry.
            if let Some(mut job) = engine.ctx.store.job(job_key).await? {
                job.retries = job.retries.max(1);
                job.state = JobState::Activatable;
                let updated = Record::event(job.key, Intent::RetriesUpdated, RecordValue::Job(job));
                engine.emit(vec![updated]).await?;
            }
        }
        None => {
            if let Some(instance) = engine.instance(incident.element_instance_key).await? {
                match instance.state {
                    ElementState::Activating => engine.queue_open(instance.key),
                    ElementState::Activated => engine.queue_complete(instance.key),
                    _ => {}
                }
            }
        }
    }
    engine.run().await?;
    Ok(incident_key)
}

// ── Timers, messages and signals ──

async fn trigger_timer(
    ctx: &mut ProcessingContext<'_>,
    timer_key: Key,
) -> Result<Key, ProcessingError> {
    let timer = ctx
        .store
        .subscription(timer_key)
        .await?
        .filter(|s| matches!(s.payload, SubscriptionPayload::Timer { .. }))
        .ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to trigger timer with key '{}', but no such timer was found",
                timer_key
            ))
        })?;

    let mut engine = Engine::new(ctx);
    engine
        .emit(vec![Record::event(timer.key, Intent::Triggered, RecordValue::Timer(timer.clone()))])
        .await?;
    engine.trigger(&timer, &Variables::new()).await?;
    engine.run().await?;
    debug!(timer_key, element_id = %timer.catch_event_id, "timer triggered");
    Ok(timer_key)
}

/// Publishing correlates through follow-up commands, one per matching
/// subscription. Messages without a subscription are not buffered.
async fn publish_message(
    ctx: &mut ProcessingContext<'_>,
    name: &str,
    correlation_key: &str,
    variables: &Variables,
) -> Result<Key, ProcessingError> {
    let key = ctx.keys.next_key();
    let message = MessageRecord {
        name: name.to_string(),
        correlation_key: correlation_key.to_string(),
        variables: variables.clone(),
    };
    ctx.writer
        .append(vec![Record::event(key, Intent::Published, RecordValue::Message(message))])
        .await?;

    for subscription in ctx.store.message_subscriptions(name, correlation_key).await? {
        ctx.follow_ups.push(Command::CorrelateMessage {
            subscription_key: subscription.key,
            message_name: name.to_string(),
            variables: variables.clone(),
        });
    }
    Ok(key)
}

async fn correlate_message(
    ctx: &mut ProcessingContext<'_>,
    subscription_key: Key,
    message_name: &str,
    variables: &Variables,
) -> Result<Key, ProcessingError> {
    let subscription = ctx
        .store
        .subscription(subscription_key)
        .await?
        .filter(|s| s.message_name() == Some(message_name))
        .ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to correlate message with name '{}' to subscription with key '{}', but \
                 no such subscription was found",
                message_name, subscription_key
            ))
        })?;

    let mut engine = Engine::new(ctx);
    engine
        .emit(vec![
            Record::event(
                subscription.key,
                Intent::Correlated,
                RecordValue::MessageSubscription(subscription.clone()),
            ),
            Record::event(
                subscription.key,
                Intent::Correlated,
                RecordValue::ProcessMessageSubscription(subscription.clone()),
            ),
        ])
        .await?;
    engine.trigger(&subscription, variables).await?;
    engine.run().await?;
    Ok(subscription_key)
}

async fn broadcast_signal(
    ctx: &mut ProcessingContext<'_>,
    signal_name: &str,
    variables: &Variables,
) -> Result<Key, ProcessingError> {
    let key = ctx.keys.next_key();
    let subscriptions = ctx.store.signal_subscriptions(signal_name).await?;

    let mut engine = Engine::new(ctx);
    engine
        .emit(vec![Record::event(
            key,
            Intent::Broadcasted,
            RecordValue::Signal(SignalRecord {
                signal_name: signal_name.to_string(),
                variables: variables.clone(),
            }),
        )])
        .await?;
    for subscription in subscriptions {
        // An earlier trigger may have closed it.
        if engine.ctx.store.subscription(subscription.key).await?.is_none() {
            continue;
        }
        engine
            .emit(vec![Record::event(
                subscription.key,
                Intent::Triggered,
                RecordValue::SignalSubscription(subscription.clone()),
            )])
            .await?;
        engine.trigger(&subscription, variables).await?;
        engine.run().await?;
    }
    Ok(key)
}

// ── Variables ──

/// Set local variables on `scope_key`, then fire the conditional events of
/// the instance whose condition became true.
async fn set_variables(
    ctx: &mut ProcessingContext<'_>,
    scope_key: Key,
    variables: &Variables,
) -> Result<Key, ProcessingError> {
    let scope = ctx.store.element_instance(scope_key).await?.ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to update variables for element with key '{}', but no such element was found",
            scope_key
        ))
    })?;

    let mut engine = Engine::new(ctx);
    engine.set_local_variables(&scope, variables).await?;

    let conditionals: Vec<Subscription> = engine
        .ctx
        .store
        .process_instance_subscriptions(scope.process_instance_key)
        .await?
        .into_iter()
        .filter(|s| matches!(s.payload, SubscriptionPayload::Conditional { .. }))
        .collect();
    for subscription in conditionals {
        let SubscriptionPayload::Conditional {
            condition,
            variable_names,
            ..
        } = &subscription.payload
        else {
            continue;
        };
        if !variable_names.is_empty() && !variable_names.iter().any(|n| variables.contains_key(n)) {
            continue;
        }
        if engine.ctx.store.subscription(subscription.key).await?.is_none() {
            continue;
        }
        let visible = variable_scope(engine.ctx.store, subscription.scope_key).await?;
        match expression::evaluate_condition(condition, &visible) {
            Ok(true) => {
                engine
                    .emit(vec![Record::event(
                        subscription.key,
                        Intent::Triggered,
                        RecordValue::ConditionalSubscription(subscription.clone()),
                    )])
                    .await?;
                engine.trigger(&subscription, &Variables::new()).await?;
                engine.run().await?;
            }
            Ok(false) => {}
            Err(e) => {
                debug!(subscription_key = subscription.key, error = %e, "condition not evaluable")
            }
        }
    }
    Ok(scope_key)
}
