//! Lifecycle hooks: `<identity>:<create|update|delete>:<before|after>` -> ordered listeners.
//!
//! Dispatch is sequential and awaited. The first failing listener aborts the
//! remaining ones and its error aborts the mutation that emitted the event.

use crate::adapter::Adapter;
use crate::error::AdapterError;
use crate::schema::Record;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use sqlx::PgConnection;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// Parsed event name. The identity is lower-cased like registry identities.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventName {
    pub identity: String,
    pub operation: Operation,
    pub phase: Phase,
}

impl EventName {
    pub fn new(identity: &str, operation: Operation, phase: Phase) -> Self {
        EventName {
            identity: identity.to_lowercase(),
            operation,
            phase,
        }
    }
}

impl FromStr for EventName {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AdapterError::InvalidEvent(s.to_string());
        let mut parts = s.split(':');
        let (Some(identity), Some(op), Some(phase), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if identity.trim().is_empty() {
            return Err(invalid());
        }
        let operation = match op {
            "create" => Operation::Create,
            "update" => Operation::Update,
            "delete" => Operation::Delete,
            _ => return Err(invalid()),
        };
        let phase = match phase {
            "before" => Phase::Before,
            "after" => Phase::After,
            _ => return Err(invalid()),
        };
        Ok(EventName::new(identity.trim(), operation, phase))
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.identity, self.operation.as_str(), self.phase.as_str())
    }
}

/// Payload handed to listeners.
#[derive(Clone, Copy, Debug)]
pub enum LifecycleEvent<'a> {
    /// Sanitized data about to be inserted.
    BeforeCreate { data: &'a Record },
    AfterCreate { record: &'a Record },
    /// Current row and the patch as the caller supplied it.
    BeforeUpdate { old: &'a Record, patch: &'a Record },
    AfterUpdate { old: &'a Record, new: &'a Record },
    /// Row about to be deleted; `None` when no row has that id.
    BeforeDelete { old: Option<&'a Record> },
    AfterDelete { old: Option<&'a Record> },
}

impl LifecycleEvent<'_> {
    pub fn operation(&self) -> Operation {
        match self {
            LifecycleEvent::BeforeCreate { .. } | LifecycleEvent::AfterCreate { .. } => Operation::Create,
            LifecycleEvent::BeforeUpdate { .. } | LifecycleEvent::AfterUpdate { .. } => Operation::Update,
            LifecycleEvent::BeforeDelete { .. } | LifecycleEvent::AfterDelete { .. } => Operation::Delete,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            LifecycleEvent::BeforeCreate { .. }
            | LifecycleEvent::BeforeUpdate { .. }
            | LifecycleEvent::BeforeDelete { .. } => Phase::Before,
            _ => Phase::After,
        }
    }
}

/// What a listener sees: the adapter (for follow-up reads and writes), the
/// transaction of the emitting mutation when there is one, and the payload.
pub struct HookContext<'a> {
    pub adapter: &'a Adapter,
    pub identity: &'a str,
    pub tx: Option<&'a mut PgConnection>,
    pub event: LifecycleEvent<'a>,
}

#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn handle(&self, ctx: HookContext<'_>) -> Result<(), AdapterError>;
}

struct FnListener<F>(F);

#[async_trait]
impl<F> LifecycleListener for FnListener<F>
where
    F: for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<(), AdapterError>> + Send + Sync,
{
    async fn handle(&self, ctx: HookContext<'_>) -> Result<(), AdapterError> {
        (self.0)(ctx).await
    }
}

/// Wrap a closure returning a boxed future as a listener.
pub fn listener_fn<F>(f: F) -> Arc<dyn LifecycleListener>
where
    F: for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<(), AdapterError>> + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

#[derive(Default)]
pub struct HookTable {
    listeners: RwLock<HashMap<EventName, Vec<Arc<dyn LifecycleListener>>>>,
}

impl HookTable {
    pub fn add(&self, event: EventName, listener: Arc<dyn LifecycleListener>) {
        self.listeners.write().entry(event).or_default().push(listener);
    }

    pub fn count(&self, event: &EventName) -> usize {
        self.listeners.read().get(event).map(Vec::len).unwrap_or(0)
    }

    fn snapshot(&self, event: &EventName) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners.read().get(event).cloned().unwrap_or_default()
    }

    /// Run every listener for the event in registration order.
    pub async fn emit(
        &self,
        adapter: &Adapter,
        identity: &str,
        mut tx: Option<&mut PgConnection>,
        event: LifecycleEvent<'_>,
    ) -> Result<(), AdapterError> {
        let name = EventName::new(identity, event.operation(), event.phase());
        let listeners = self.snapshot(&name);
        if listeners.is_empty() {
            return Ok(());
        }
        tracing::debug!(event = %name, listeners = listeners.len(), "dispatch");
        for listener in listeners {
            let ctx = HookContext {
                adapter,
                identity,
                tx: tx.as_deref_mut(),
                event,
            };
            if let Err(e) = listener.handle(ctx).await {
                tracing::warn!(event = %name, error = %e, "listener failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.listeners.read();
        let mut names: Vec<String> = guard.keys().map(ToString::to_string).collect();
        names.sort();
        f.debug_struct("HookTable").field("events", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_names() {
        let name: EventName = "AccessRight:update:before".parse().unwrap();
        assert_eq!(name.identity, "accessright");
        assert_eq!(name.operation, Operation::Update);
        assert_eq!(name.phase, Phase::Before);
        assert_eq!(name.to_string(), "accessright:update:before");
    }

    #[test]
    fn rejects_malformed_event_names() {
        for bad in ["door", "door:create", "door:insert:before", "door:create:during", ":create:after", "a:create:after:x"] {
            assert!(
                matches!(bad.parse::<EventName>(), Err(AdapterError::InvalidEvent(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn events_know_their_slot() {
        let rec = Record::new();
        let ev = LifecycleEvent::AfterUpdate { old: &rec, new: &rec };
        assert_eq!(ev.operation(), Operation::Update);
        assert_eq!(ev.phase(), Phase::After);
        let ev = LifecycleEvent::BeforeDelete { old: None };
        assert_eq!(ev.operation(), Operation::Delete);
        assert_eq!(ev.phase(), Phase::Before);
    }

    #[test]
    fn table_keeps_registration_order_per_event() {
        let table = HookTable::default();
        let name: EventName = "door:create:after".parse().unwrap();
        table.add(name.clone(), listener_fn(|_ctx| Box::pin(async { Ok(()) })));
        table.add(name.clone(), listener_fn(|_ctx| Box::pin(async { Ok(()) })));
        assert_eq!(table.count(&name), 2);
        assert_eq!(table.count(&"door:create:before".parse().unwrap()), 0);
    }
}
