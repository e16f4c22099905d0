//! Typed event bus (§4.5, §9): replaces the teacher's single-purpose
//! `HookEvent` webhook dispatch with an ordered subscriber registry that any
//! number of listeners (UI, logger, webhook) can attach to. Emission
//! iterates a snapshot so listeners may unsubscribe during dispatch.

use crate::model::{IterationStatus, SessionStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum Event {
    EngineStarted { session_id: String },
    EngineStopped { reason: String },
    EnginePaused,
    EngineResumed,
    EngineWarning { message: String },

    IterationStarted { iteration: u32, task_id: String },
    IterationCompleted { iteration: u32, task_id: String, status: IterationStatus },
    IterationFailed { iteration: u32, task_id: String, error: String },
    IterationRetrying { iteration: u32, task_id: String, attempt: u32 },
    IterationSkipped { iteration: u32, task_id: String },
    IterationRateLimited { iteration: u32, task_id: String, retry_after_ms: Option<u64> },

    TaskSelected { task_id: String },
    TaskActivated { task_id: String },
    TaskCompleted { task_id: String },

    AgentOutput { task_id: String, line: String },
    AgentSwitched { new_agent: String },
    AgentAllLimited,
    AgentRecoveryAttempted { success: bool },

    AllComplete { total_tasks: u32, total_iterations: u32 },
    TasksRefreshed,

    SessionStatusChanged { status: SessionStatus },
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Ordered mapping from subscription id to listener closure (§9).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

pub struct Subscription {
    id: u64,
    bus: EventBus,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.bus.remove(self.id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().push((id, Arc::new(listener)));
        Subscription { id, bus: self.clone() }
    }

    fn remove(&self, id: u64) {
        self.inner.lock().unwrap().retain(|(existing, _)| *existing != id);
    }

    /// Emit in subscription order. Listeners are cloned (cheap `Arc` bumps)
    /// into a snapshot before the lock is released, so a listener that
    /// unsubscribes mid-dispatch doesn't affect this emission and can't
    /// deadlock re-entering `subscribe`/`emit`.
    pub fn emit(&self, event: Event) {
        let snapshot: Vec<Listener> =
            self.inner.lock().unwrap().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_to_subscribers_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().unwrap().push(2));

        bus.emit(Event::EngineStarted { session_id: "s1".into() });

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::EnginePaused);
        sub.unsubscribe();
        bus.emit(Event::EnginePaused);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
