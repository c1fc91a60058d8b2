use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use eventtree_dispatch::{Dispatcher, HandlerId};

use crate::builtin::{ChooseReplacement, ConnectCondition, DisconnectCondition, ResolveTriggers};
use crate::condition::Condition;
use crate::error::EventError;
use crate::event::{EventKind, EventNode, EventRef};
use crate::ids::{ConditionId, EventId, Timestamp};

pub(crate) type ReplacementThunk<T> =
    Box<dyn FnOnce(&mut Session, EventId, ConditionId) -> Result<<T as EventKind>::Output, EventError>>;

/// A pending deferred action, captured in full (including which `Trigger`
/// fired and against which event) when a `Triggered` event enqueues it.
/// Type-erased because the queue holds triggers of arbitrarily many
/// concrete event types at once.
pub(crate) type QueuedTrigger = Box<dyn FnOnce(&mut Session) -> Result<(), EventError>>;

/// Process-wide state: the event arena and log, the trigger queue, the
/// condition dispatch table, and the replacement-chooser policy.
///
/// Constructed once per logical run and held by the caller (`let mut
/// session = Session::new();`) — never a process global.
pub struct Session {
    pub(crate) dispatcher: Dispatcher<Session, EventError>,
    pub(crate) arena: Vec<EventNode>,
    pub(crate) event_log: Vec<EventId>,
    pub(crate) trigger_queue: VecDeque<QueuedTrigger>,
    pub(crate) condition_timestamps: HashMap<ConditionId, Timestamp>,
    chooser: Box<dyn Fn(&Session, &[ConditionId]) -> ConditionId>,
}

fn default_chooser(session: &Session, candidates: &[ConditionId]) -> ConditionId {
    *candidates
        .iter()
        .min_by_key(|id| session.condition_timestamps.get(id).copied().unwrap_or(0))
        .expect("choose_replacement called with no candidates")
}

impl Session {
    pub fn new() -> Self {
        Self::with_chooser(default_chooser)
    }

    /// Construct a `Session` with a custom replacement-chooser policy,
    /// substituted for the default "smallest `time_stamp` wins" rule.
    pub fn with_chooser(
        chooser: impl Fn(&Session, &[ConditionId]) -> ConditionId + 'static,
    ) -> Self {
        Session {
            dispatcher: Dispatcher::new(),
            arena: Vec::new(),
            event_log: Vec::new(),
            trigger_queue: VecDeque::new(),
            condition_timestamps: HashMap::new(),
            chooser: Box::new(chooser),
        }
    }

    pub fn get_time_stamp(&self) -> Timestamp {
        self.event_log.len()
    }

    pub fn event_log_len(&self) -> usize {
        self.event_log.len()
    }

    pub fn pending_trigger_count(&self) -> usize {
        self.trigger_queue.len()
    }

    pub(crate) fn node(&self, id: EventId) -> &EventNode {
        &self.arena[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: EventId) -> &mut EventNode {
        &mut self.arena[id.0]
    }

    fn alloc(
        &mut self,
        type_name: &'static str,
        parent: Option<EventId>,
        source: Option<Rc<dyn Any>>,
        replaced_by: HashSet<ConditionId>,
        value: Box<dyn Any>,
    ) -> EventId {
        let id = EventId(self.arena.len());
        self.arena.push(EventNode {
            type_name,
            parent,
            children: Vec::new(),
            source,
            replaced_by,
            value: Some(value),
            logged: false,
        });
        id
    }

    /// Register `weak` under `signal`, recording this registration's
    /// connect-time `time_stamp`. Used by every condition's `connect`.
    pub(crate) fn connect_handler(
        &mut self,
        signal: &str,
        weak: std::rc::Weak<eventtree_dispatch::Handler<Session, EventError>>,
    ) -> (HandlerId, Timestamp) {
        let id = self.dispatcher.connect(signal, weak);
        let stamp = self.get_time_stamp();
        self.condition_timestamps.insert(ConditionId::from(id), stamp);
        (id, stamp)
    }

    pub(crate) fn disconnect_handler(&mut self, signal: &str, id: HandlerId) {
        self.dispatcher.disconnect(signal, id);
        self.condition_timestamps.remove(&ConditionId::from(id));
    }

    /// Check the event's value record out of its arena slot, run `f` with
    /// `&mut Session` and the checked-out `&mut T`, then put it back.
    ///
    /// This is what lets `setup`/`check`/`payload` take `&mut Session`
    /// *and* operate on the event's own value at the same time without
    /// aliasing the arena slot the value still logically belongs to.
    pub(crate) fn with_checked_out<T: EventKind, R>(
        &mut self,
        id: EventId,
        f: impl FnOnce(&mut Session, &mut T) -> R,
    ) -> R {
        let mut value = self.arena[id.0]
            .value
            .take()
            .expect("event value missing (checked out re-entrantly?)")
            .downcast::<T>()
            .expect("EventRef<T> type mismatch with the arena slot");
        let result = f(self, &mut value);
        self.arena[id.0].value = Some(value);
        result
    }

    /// Send `signal` in Dispatcher registration order, returning every
    /// handler's non-null result alongside the id of the handler that
    /// produced it.
    pub(crate) fn dispatcher_send(
        &mut self,
        signal: &str,
        payload: &mut dyn Any,
    ) -> Result<Vec<(HandlerId, Box<dyn Any>)>, EventError> {
        let snapshot = self.dispatcher.snapshot(signal);
        let mut results = Vec::new();
        let mut dead = Vec::new();
        for (handler_id, weak) in snapshot {
            let Some(handler) = weak.upgrade() else {
                dead.push(handler_id);
                continue;
            };
            if let Some(value) = handler(self, payload)? {
                results.push((handler_id, value));
            }
        }
        for handler_id in dead {
            self.dispatcher.disconnect(signal, handler_id);
        }
        Ok(results)
    }

    /// `dispatcher_send` with the resolving event's id as payload — the
    /// shape every pipeline phase sends (`_try_`, `_pre_respond_`, the
    /// bare class-name notify signal).
    pub(crate) fn dispatcher_send_id(
        &mut self,
        signal: &str,
        id: EventId,
    ) -> Result<Vec<(HandlerId, Box<dyn Any>)>, EventError> {
        let mut payload = id;
        self.dispatcher_send(signal, &mut payload)
    }

    /// `dispatcher_send` with no meaningful payload: attribute-modifier
    /// handlers carry everything they need in their own closure and
    /// never fail, so this exists purely to collect which modifiers are
    /// currently connected under `signal`.
    pub(crate) fn dispatcher_send_plain(&mut self, signal: &str) -> Vec<(HandlerId, Box<dyn Any>)> {
        self.dispatcher_send(signal, &mut ())
            .expect("attribute modifier handlers are infallible")
    }

    /// Reactions fire in `time_stamp` order, not Dispatcher registration
    /// order, so the snapshot is sorted before any handler runs (unlike
    /// `dispatcher_send_id`, which only ever reports results after the
    /// fact).
    fn resolve_reactions(&mut self, type_name: &str, id: EventId, post: bool) -> Result<(), EventError> {
        let prefix = if post { "_post_react_" } else { "_react_" };
        let signal = format!("{prefix}{type_name}");
        let mut snapshot = self.dispatcher.snapshot(&signal);
        snapshot.sort_by_key(|(handler_id, _)| {
            self.condition_timestamps
                .get(&ConditionId::from(*handler_id))
                .copied()
                .unwrap_or(0)
        });

        let mut dead = Vec::new();
        let mut payload = id;
        for (handler_id, weak) in snapshot {
            let Some(handler) = weak.upgrade() else {
                dead.push(handler_id);
                continue;
            };
            handler(self, &mut payload)?;
        }
        for handler_id in dead {
            self.dispatcher.disconnect(&signal, handler_id);
        }
        Ok(())
    }

    fn notify_finished(&mut self, _id: EventId, _success: bool) {
        // No external observer hook is exposed today; reserved for the
        // day a domain wants event_finished-style notification. Kept as
        // its own step (rather than folded into the payload-error arm)
        // because the nine-step lifecycle names it as a distinct point.
    }

    /// Construct and fully resolve a root event in one call — the
    /// library's main entry point.
    pub fn resolve_event<T: EventKind>(
        &mut self,
        value: T,
        source: Option<Rc<dyn Any>>,
        parent: Option<EventId>,
    ) -> Result<T::Output, EventError> {
        self.resolve(value, source, parent, HashSet::new())
    }

    /// The nine-step resolution pipeline (§4.3), shared by
    /// `resolve_event` and every spawn form.
    pub(crate) fn resolve<T: EventKind>(
        &mut self,
        value: T,
        source: Option<Rc<dyn Any>>,
        parent: Option<EventId>,
        replaced_by: HashSet<ConditionId>,
    ) -> Result<T::Output, EventError> {
        let id = self.alloc(T::NAME, parent, source, replaced_by, Box::new(value));
        if let Some(p) = parent {
            self.node_mut(p).children.push(id);
        }
        let event_ref: EventRef<T> = EventRef::new(id);

        // 1. setup
        let setup_result =
            self.with_checked_out::<T, _>(id, |session, value| value.setup(session, event_ref));
        if let Err(e) = setup_result {
            self.node_mut(id).value = None;
            return Err(e);
        }

        // 2. replacement search
        let signal = format!("_try_{}", T::NAME);
        let mut found = self.dispatcher_send_id(&signal, id)?;
        found.retain(|(handler_id, _)| {
            !self
                .node(id)
                .replaced_by
                .contains(&ConditionId::from(*handler_id))
        });

        // 3. replacement application
        if !found.is_empty() {
            let chosen = if found.len() == 1 {
                found.remove(0)
            } else {
                let candidates: Vec<ConditionId> =
                    found.iter().map(|(h, _)| ConditionId::from(*h)).collect();
                let picked = self.choose_replacement(candidates)?;
                let idx = found
                    .iter()
                    .position(|(h, _)| ConditionId::from(*h) == picked)
                    .expect("chooser returned a candidate that was not offered");
                found.remove(idx)
            };
            let (handler_id, thunk_any) = chosen;
            let thunk = thunk_any
                .downcast::<ReplacementThunk<T>>()
                .expect("replacement thunk type mismatch");
            // The original event is simply never pushed to `event_log`;
            // its value record is left in the arena (the thunk still
            // needs to read it) but it never becomes a logged event.
            return (*thunk)(self, id, ConditionId::from(handler_id));
        }

        // 4. check
        let check_result =
            self.with_checked_out::<T, _>(id, |session, value| value.check(session, event_ref));
        if let Err(e) = check_result {
            self.node_mut(id).value = None;
            return Err(e);
        }

        // 5. log
        self.event_log.push(id);
        self.node_mut(id).logged = true;

        // 6. pre-reactions
        self.resolve_reactions(T::NAME, id, false)?;

        // 7. pre-respond
        self.dispatcher_send_id(&format!("_pre_respond_{}", T::NAME), id)?;

        // 8. payload
        let payload_result =
            self.with_checked_out::<T, _>(id, |session, value| value.payload(session, event_ref));

        match payload_result {
            Ok(output) => {
                // 9. post-reactions & notify
                self.resolve_reactions(T::NAME, id, true)?;
                self.dispatcher_send_id(T::NAME, id)?;
                Ok(output)
            }
            Err(e) => {
                self.notify_finished(id, false);
                Err(e)
            }
        }
    }

    /// Resolve a `ChooseReplacement` event to pick among `candidates`
    /// (§4.2). Itself goes through the pipeline, so the choice is
    /// observable/replaceable like any other event.
    pub fn choose_replacement(
        &mut self,
        candidates: Vec<ConditionId>,
    ) -> Result<ConditionId, EventError> {
        self.resolve_event(ChooseReplacement { candidates }, None, None)
    }

    pub(crate) fn default_choose(&self, candidates: &[ConditionId]) -> ConditionId {
        (self.chooser)(self, candidates)
    }

    /// Drain the trigger queue via a `ResolveTriggers` built-in event
    /// (§3.1), invoking each queued trigger's resolve callback in FIFO
    /// order. Returns the number of triggers drained.
    pub fn resolve_triggers(&mut self) -> Result<usize, EventError> {
        self.resolve_event(ResolveTriggers, None, None)
    }

    pub(crate) fn enqueue_trigger(&mut self, thunk: QueuedTrigger) {
        self.trigger_queue.push_back(thunk);
    }

    pub(crate) fn drain_trigger_queue(&mut self) -> Result<usize, EventError> {
        let mut drained = 0;
        while let Some(thunk) = self.trigger_queue.pop_front() {
            thunk(self)?;
            drained += 1;
        }
        Ok(drained)
    }

    /// Construct `condition` (detached) and immediately resolve a
    /// `ConnectCondition` event for it, returning the still-owned handle.
    pub fn create_condition<C: Condition + 'static>(
        &mut self,
        condition: Rc<C>,
        parent: Option<EventId>,
    ) -> Result<Rc<C>, EventError> {
        self.connect_condition(condition.clone(), parent)?;
        Ok(condition)
    }

    pub fn connect_condition(
        &mut self,
        condition: Rc<dyn Condition>,
        parent: Option<EventId>,
    ) -> Result<(), EventError> {
        self.resolve_event(ConnectCondition { condition }, None, parent)
    }

    pub fn disconnect_condition(
        &mut self,
        condition: Rc<dyn Condition>,
        parent: Option<EventId>,
    ) -> Result<(), EventError> {
        self.resolve_event(DisconnectCondition { condition }, None, parent)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
