//! Command handling infrastructure.

use std::marker::PhantomData;

use common::{AggregateId, UserId};
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Attempts made by [`CommandHandler::execute`] before a conflict is surfaced.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Trait for commands that can be executed against an aggregate.
///
/// Commands represent an intention to perform an action. They may be rejected
/// if the aggregate's current state doesn't allow the action.
pub trait Command: Send + Sync {
    /// The type of aggregate this command targets.
    type Aggregate: Aggregate;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Handler for executing commands against aggregates.
///
/// The handler loads the aggregate by replaying its stream, runs the command
/// to produce events, and appends them with an optimistic version check. When
/// another writer got there first, the aggregate is reloaded and the command
/// re-validated against the fresh state, up to `max_attempts` times.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    max_attempts: u32,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            _phantom: PhantomData,
        }
    }

    /// Sets how many times a conflicting command is attempted.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a default instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.id().is_some() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Executes a command on behalf of `actor` and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either a list of events to apply, or an error. It may run more than once.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        actor: UserId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 1;
        loop {
            match self.try_execute(aggregate_id, actor, &command_fn).await {
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    metrics::counter!("command_conflict_retries_total").increment(1);
                    tracing::warn!(
                        %aggregate_id,
                        aggregate_type = A::aggregate_type(),
                        attempt,
                        "version conflict, reloading"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_execute<F>(
        &self,
        aggregate_id: AggregateId,
        actor: UserId,
        command_fn: &F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, actor, current_version, &events)?;

        let options = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };

        let new_version = self.store.append(envelopes, options).await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Builds event envelopes from domain events.
    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        actor: UserId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .actor(actor)
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}
