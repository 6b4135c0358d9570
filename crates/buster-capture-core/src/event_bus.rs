//! Synchronous publish/subscribe bus.
//!
//! Listeners run in registration order. A listener that returns an error or
//! panics is logged and skipped; the remaining listeners for the same emit
//! still run and the emitter never sees the fault.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::{EventBusError, ListenerError};

pub type ListenerResult = Result<(), ListenerError>;

type Callback<P> = Box<dyn FnMut(&P) -> ListenerResult + Send>;

/// Handle returned on registration; used to look up or remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener<P> {
    id: ListenerId,
    once: bool,
    callback: Callback<P>,
}

// ─── Bind Targets ────────────────────────────────────────────────

/// An object whose named handlers can be bound to events in bulk.
///
/// `HANDLERS` is the static dispatch table: every name `call` accepts.
pub trait EventTarget<P>: Send + 'static {
    const HANDLERS: &'static [&'static str];

    fn call(&mut self, handler: &str, payload: &P) -> ListenerResult;
}

/// How [`EventBus::bind`] maps events onto a target's handlers.
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    /// Every handler, bound to the event of the same name.
    All,
    /// The listed handlers, each bound to the event of the same name.
    Handlers(&'a [&'a str]),
    /// Explicit `(event, handler)` pairs. Closures are registered with
    /// [`EventBus::on`] instead.
    Map(&'a [(&'a str, &'a str)]),
}

// ─── Event Bus ───────────────────────────────────────────────────

pub struct EventBus<P> {
    listeners: HashMap<String, Vec<Listener<P>>>,
    next_id: u64,
    /// Listener errors and panics swallowed so far.
    faults: u64,
}

impl<P: 'static> EventBus<P> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 0,
            faults: 0,
        }
    }

    pub fn on<F>(&mut self, event: &str, listener: F) -> ListenerId
    where
        F: FnMut(&P) -> ListenerResult + Send + 'static,
    {
        self.add(event, Box::new(listener), false)
    }

    /// Register a listener that is removed after its first invocation.
    pub fn once<F>(&mut self, event: &str, listener: F) -> ListenerId
    where
        F: FnMut(&P) -> ListenerResult + Send + 'static,
    {
        self.add(event, Box::new(listener), true)
    }

    /// Remove a listener. Returns `false` if it was not registered for `event`.
    pub fn off(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        before != list.len()
    }

    pub fn has_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners
            .get(event)
            .is_some_and(|list| list.iter().any(|l| l.id == id))
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Invoke every listener registered for `event`, in registration order.
    pub fn emit(&mut self, event: &str, payload: &P) {
        let Some(list) = self.listeners.get_mut(event) else {
            return;
        };

        for listener in list.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (listener.callback)(payload)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.faults += 1;
                    tracing::warn!(event, error = %err, "event listener failed");
                }
                Err(panic) => {
                    self.faults += 1;
                    tracing::error!(
                        event,
                        "event listener panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        list.retain(|l| !l.once);
    }

    /// Bind a shared target's handlers as listeners.
    ///
    /// Fails without registering anything if a requested handler is not in
    /// the target's dispatch table.
    pub fn bind<T>(
        &mut self,
        target: &Arc<Mutex<T>>,
        binding: Binding<'_>,
    ) -> Result<Vec<ListenerId>, EventBusError>
    where
        T: EventTarget<P>,
    {
        let pairs: Vec<(String, &'static str)> = match binding {
            Binding::All => <T as EventTarget<P>>::HANDLERS
                .iter()
                .map(|h| ((*h).to_owned(), *h))
                .collect(),
            Binding::Handlers(names) => names
                .iter()
                .map(|name| Ok(((*name).to_owned(), lookup_handler::<P, T>(name, name)?)))
                .collect::<Result<_, EventBusError>>()?,
            Binding::Map(pairs) => pairs
                .iter()
                .map(|(event, name)| {
                    Ok(((*event).to_owned(), lookup_handler::<P, T>(event, name)?))
                })
                .collect::<Result<_, EventBusError>>()?,
        };

        let ids = pairs
            .into_iter()
            .map(|(event, handler)| {
                let target = Arc::clone(target);
                self.on(&event, move |payload: &P| {
                    let mut guard = target.lock().map_err(|_| {
                        ListenerError::new(format!("{handler}: target lock poisoned"))
                    })?;
                    guard.call(handler, payload)
                })
            })
            .collect();

        Ok(ids)
    }

    fn add(&mut self, event: &str, callback: Callback<P>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(event.to_owned())
            .or_default()
            .push(Listener { id, once, callback });
        id
    }
}

impl<P: 'static> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts: Vec<(&str, usize)> = self
            .listeners
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("EventBus")
            .field("listeners", &counts)
            .field("faults", &self.faults)
            .finish()
    }
}

fn lookup_handler<P, T: EventTarget<P>>(
    event: &str,
    name: &str,
) -> Result<&'static str, EventBusError> {
    <T as EventTarget<P>>::HANDLERS
        .iter()
        .copied()
        .find(|h| *h == name)
        .ok_or_else(|| EventBusError::UnknownHandler {
            event: event.to_owned(),
            handler: name.to_owned(),
        })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ─── Tests ───────────────────────────────────────────────────────
