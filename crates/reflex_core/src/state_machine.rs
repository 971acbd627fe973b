//! Named-state engine with enter/exit notifications.
//!
//! States are an ordered, immutable list of unique names bound to indices
//! `0..N`. Moving to a different state fires, in order:
//! 1. exit subscribers of the old state, then the "exit any" event,
//! 2. the current-index update (and the `is_state` booleans),
//! 3. enter subscribers of the new state, then the "enter any" event.
//!
//! Setting the state that is already current does nothing. A transition
//! requested from inside a subscriber is queued and applied, in request
//! order, once the running transition has finished.
//! Every lookup by name or index fails fast with
//! [`ReflexError::InvalidArgument`].

use crate::error::ReflexError;
use crate::event::{event_fn, EventCell, EventSource, SharedEventSink, SharedEventSource};
use crate::signal::{BooleanCell, BooleanInput, DiscreteCell, DiscreteInput, Poll, Sink};
use crate::subscribers::Subscription;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A reference to a state, by position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRef {
    Index(usize),
    Name(String),
}

impl From<usize> for StateRef {
    fn from(index: usize) -> Self {
        StateRef::Index(index)
    }
}

impl From<&str> for StateRef {
    fn from(name: &str) -> Self {
        StateRef::Name(name.to_string())
    }
}

impl From<String> for StateRef {
    fn from(name: String) -> Self {
        StateRef::Name(name)
    }
}

struct StateSlot {
    name: String,
    on_enter: EventCell,
    on_exit: EventCell,
    is_current: Arc<BooleanCell>,
}

pub struct StateMachine {
    states: Vec<StateSlot>,
    by_name: HashMap<String, usize>,
    current: Mutex<usize>,
    /// Serializes transitions across threads. Reentrant so a subscriber may
    /// itself request a transition, which lands in `pending`.
    transition: ReentrantMutex<()>,
    in_transition: AtomicBool,
    pending: Mutex<VecDeque<(usize, Option<usize>)>>,
    index_cell: Arc<DiscreteCell>,
    on_enter_any: EventCell,
    on_exit_any: EventCell,
}

impl StateMachine {
    /// Build a machine over `names`, starting in `initial`.
    ///
    /// Fails if `names` is empty, contains duplicates, or `initial` does not
    /// resolve.
    pub fn new<S: AsRef<str>>(initial: impl Into<StateRef>, names: &[S]) -> Result<Arc<Self>, ReflexError> {
        if names.is_empty() {
            return Err(ReflexError::invalid("state machine needs at least one state"));
        }
        let mut by_name = HashMap::with_capacity(names.len());
        let mut states = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if by_name.insert(name.to_string(), index).is_some() {
                return Err(ReflexError::invalid(format!("duplicate state name: {:?}", name)));
            }
            states.push(StateSlot {
                name: name.to_string(),
                on_enter: EventCell::named(format!("enter {}", name)),
                on_exit: EventCell::named(format!("exit {}", name)),
                is_current: BooleanCell::shared(false),
            });
        }

        let mut machine = Self {
            states,
            by_name,
            current: Mutex::new(0),
            transition: ReentrantMutex::new(()),
            in_transition: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            index_cell: DiscreteCell::shared(0),
            on_enter_any: EventCell::named("enter any state"),
            on_exit_any: EventCell::named("exit any state"),
        };
        let start = machine.resolve(&initial.into())?;
        *machine.current.get_mut() = start;
        // No subscribers exist yet, so these writes cannot fail.
        let _ = machine.states[start].is_current.set(true);
        let _ = machine.index_cell.set(start as i64);
        Ok(Arc::new(machine))
    }

    fn resolve(&self, state: &StateRef) -> Result<usize, ReflexError> {
        match state {
            StateRef::Index(index) => self.check_index(*index),
            StateRef::Name(name) => self.state_index(name),
        }
    }

    fn check_index(&self, index: usize) -> Result<usize, ReflexError> {
        if index < self.states.len() {
            Ok(index)
        } else {
            Err(ReflexError::invalid(format!(
                "state index {} out of range 0..{}",
                index,
                self.states.len()
            )))
        }
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn state_index(&self, name: &str) -> Result<usize, ReflexError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ReflexError::invalid(format!("unknown state: {:?}", name)))
    }

    pub fn state_name(&self, index: usize) -> Result<&str, ReflexError> {
        let index = self.check_index(index)?;
        Ok(&self.states[index].name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|s| s.name.as_str())
    }

    /// Index of the current state.
    pub fn state(&self) -> usize {
        *self.current.lock()
    }

    pub fn state_name_current(&self) -> &str {
        &self.states[self.state()].name
    }

    pub fn is_state(&self, target: impl Into<StateRef>) -> Result<bool, ReflexError> {
        let target = self.resolve(&target.into())?;
        Ok(self.state() == target)
    }

    /// Observable index of the current state.
    pub fn state_input(&self) -> DiscreteInput {
        self.index_cell.clone()
    }

    /// Move to `target`, firing exit-of-old strictly before enter-of-new.
    ///
    /// A lookup failure leaves the machine untouched. Subscriber faults are
    /// returned once the transition has completed; the first fault wins and
    /// later subscribers of the failing event are skipped.
    pub fn set_state(&self, target: impl Into<StateRef>) -> Result<(), ReflexError> {
        let target = self.resolve(&target.into())?;
        self.transition_to(target, None)
    }

    fn transition_to(&self, target: usize, required_from: Option<usize>) -> Result<(), ReflexError> {
        let _serial = self.transition.lock();
        if self.in_transition.load(Ordering::Acquire) {
            // Only the thread running the transition can get here.
            self.pending.lock().push_back((target, required_from));
            return Ok(());
        }
        let _running = TransitionGuard::enter(self);

        let mut first_fault = self.apply(target, required_from).err();
        loop {
            let next = self.pending.lock().pop_front();
            let Some((target, required_from)) = next else {
                break;
            };
            if let Err(e) = self.apply(target, required_from) {
                first_fault.get_or_insert(e);
            }
        }

        match first_fault {
            Some(e) => Err(ReflexError::Callback(e)),
            None => Ok(()),
        }
    }

    fn apply(&self, target: usize, required_from: Option<usize>) -> anyhow::Result<()> {
        let old = self.state();
        if old == target {
            return Ok(());
        }
        if let Some(from) = required_from {
            if old != from {
                return Ok(());
            }
        }

        let old_slot = &self.states[old];
        let new_slot = &self.states[target];

        let mut first_fault = old_slot.on_exit.fire().and_then(|_| self.on_exit_any.fire()).err();

        *self.current.lock() = target;
        tracing::trace!("state {} -> {}", old_slot.name, new_slot.name);

        for result in [
            old_slot.is_current.set(false),
            new_slot.is_current.set(true),
            self.index_cell.set(target as i64),
        ] {
            if let Err(e) = result {
                first_fault.get_or_insert(e);
            }
        }

        if let Err(e) = new_slot.on_enter.fire().and_then(|_| self.on_enter_any.fire()) {
            first_fault.get_or_insert(e);
        }

        match first_fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// A boolean that is true exactly while `target` is the current state.
    pub fn is_state_input(&self, target: impl Into<StateRef>) -> Result<BooleanInput, ReflexError> {
        let target = self.resolve(&target.into())?;
        Ok(self.states[target].is_current.clone())
    }

    pub fn on_enter_state(&self, state: impl Into<StateRef>, target: SharedEventSink) -> Result<Subscription, ReflexError> {
        let index = self.resolve(&state.into())?;
        Ok(self.states[index].on_enter.on_event(target))
    }

    pub fn on_exit_state(&self, state: impl Into<StateRef>, target: SharedEventSink) -> Result<Subscription, ReflexError> {
        let index = self.resolve(&state.into())?;
        Ok(self.states[index].on_exit.on_event(target))
    }

    /// Notified after entering any state.
    pub fn on_enter_any(&self, target: SharedEventSink) -> Subscription {
        self.on_enter_any.on_event(target)
    }

    /// Notified before leaving any state.
    pub fn on_exit_any(&self, target: SharedEventSink) -> Subscription {
        self.on_exit_any.on_event(target)
    }

    /// Fires each time the machine moves from `from` to `to`.
    ///
    /// The returned subscription detaches the source from the machine.
    pub fn on_transition(
        self: &Arc<Self>,
        from: impl Into<StateRef>,
        to: impl Into<StateRef>,
    ) -> Result<(SharedEventSource, Subscription), ReflexError> {
        let from = self.resolve(&from.into())?;
        let to = self.resolve(&to.into())?;
        let out = Arc::new(EventCell::named(format!(
            "transition {} -> {}",
            self.states[from].name, self.states[to].name
        )));
        let left_from = Arc::new(Mutex::new(false));
        let on_leave = {
            let left_from = Arc::clone(&left_from);
            self.states[from].on_exit.on_event(event_fn(move || {
                *left_from.lock() = true;
                Ok(())
            }))
        };
        let on_leave_other = {
            let left_from = Arc::clone(&left_from);
            let machine = Arc::downgrade(self);
            self.on_exit_any.on_event(event_fn(move || {
                if let Some(machine) = machine.upgrade() {
                    if machine.state() != from {
                        *left_from.lock() = false;
                    }
                }
                Ok(())
            }))
        };
        let on_arrive = {
            let target = Arc::clone(&out);
            self.states[to].on_enter.on_event(Arc::new(move || {
                if std::mem::take(&mut *left_from.lock()) {
                    target.fire()
                } else {
                    Ok(())
                }
            }))
        };
        Ok((out, Subscription::all(vec![on_leave, on_leave_other, on_arrive])))
    }

    /// A sink that moves to `target` when fired, whatever the current state.
    pub fn set_state_event(self: &Arc<Self>, target: impl Into<StateRef>) -> Result<SharedEventSink, ReflexError> {
        let target = self.resolve(&target.into())?;
        let machine = Arc::downgrade(self);
        Ok(Arc::new(move || match machine.upgrade() {
            Some(machine) => machine.transition_to(target, None).map_err(anyhow::Error::from),
            None => Ok(()),
        }))
    }

    /// A sink that moves `from` -> `to` when fired, and does nothing unless
    /// the machine is currently in `from`.
    pub fn transition_event(
        self: &Arc<Self>,
        from: impl Into<StateRef>,
        to: impl Into<StateRef>,
    ) -> Result<SharedEventSink, ReflexError> {
        let from = self.resolve(&from.into())?;
        let to = self.resolve(&to.into())?;
        let machine = Arc::downgrade(self);
        Ok(Arc::new(move || match machine.upgrade() {
            Some(machine) => machine.transition_to(to, Some(from)).map_err(anyhow::Error::from),
            None => Ok(()),
        }))
    }

    /// Jump to `target` whenever `when` fires, regardless of the current state.
    pub fn set_state_when<S: EventSource + ?Sized>(
        self: &Arc<Self>,
        target: impl Into<StateRef>,
        when: &S,
    ) -> Result<Subscription, ReflexError> {
        Ok(when.on_event(self.set_state_event(target)?))
    }

    /// Move `from` -> `to` whenever `when` fires while in `from`.
    pub fn set_state_when_from<S: EventSource + ?Sized>(
        self: &Arc<Self>,
        from: impl Into<StateRef>,
        to: impl Into<StateRef>,
        when: &S,
    ) -> Result<Subscription, ReflexError> {
        Ok(when.on_event(self.transition_event(from, to)?))
    }
}

/// Marks a transition as running until dropped, even if a subscriber panics.
struct TransitionGuard<'a> {
    machine: &'a StateMachine,
}

impl<'a> TransitionGuard<'a> {
    fn enter(machine: &'a StateMachine) -> Self {
        machine.in_transition.store(true, Ordering::Release);
        Self { machine }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.machine.pending.lock().clear();
        self.machine.in_transition.store(false, Ordering::Release);
    }
}

impl Poll<i64> for StateMachine {
    fn get(&self) -> i64 {
        self.state() as i64
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.names().collect::<Vec<_>>())
            .field("current", &self.state_name_current())
            .finish()
    }
}
