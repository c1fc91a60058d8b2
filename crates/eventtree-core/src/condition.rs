use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use eventtree_dispatch::{Handler, HandlerId};

use crate::error::EventError;
use crate::event::{EventKind, EventRef};
use crate::ids::{ConditionId, EventId, Timestamp};
use crate::session::{ReplacementThunk, Session};

/// A persistent observer bound to the Dispatcher under a derived signal
/// name. Implementors are always held behind an `Rc` (so a `Weak` can be
/// registered with the Dispatcher without the Dispatcher owning the
/// condition) and constructed via `Rc::new_cyclic` so that the handler
/// closures they register can hold a `Weak<Self>` back to themselves.
pub trait Condition {
    fn connect(&self, session: &mut Session);
    fn disconnect(&self, session: &mut Session);
    /// `None` before the first connect, or after a disconnect.
    fn time_stamp(&self) -> Option<Timestamp>;
}

/// Shared bookkeeping for "one signal, one handler" conditions: tracks the
/// live `HandlerId`/owning `Rc<Handler>`/connect-time `time_stamp`, and
/// guards against double-connect. Every concrete condition kind below
/// composes one (or, for `Continuous`, two) of these rather than
/// re-deriving the same connect/disconnect bookkeeping per kind.
pub(crate) struct ConditionCore {
    signal: String,
    state: RefCell<CoreState>,
}

#[derive(Default)]
struct CoreState {
    handler_id: Option<HandlerId>,
    handler: Option<Rc<Handler<Session, EventError>>>,
    time_stamp: Option<Timestamp>,
}

impl ConditionCore {
    fn new(signal: impl Into<String>) -> Self {
        ConditionCore {
            signal: signal.into(),
            state: RefCell::new(CoreState::default()),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().handler.is_some()
    }

    fn connect(&self, session: &mut Session, handler: Rc<Handler<Session, EventError>>) {
        let mut state = self.state.borrow_mut();
        if state.handler.is_some() {
            return;
        }
        let (id, stamp) = session.connect_handler(&self.signal, Rc::downgrade(&handler));
        state.handler_id = Some(id);
        state.handler = Some(handler);
        state.time_stamp = Some(stamp);
    }

    fn disconnect(&self, session: &mut Session) {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.handler_id.take() {
            session.disconnect_handler(&self.signal, id);
        }
        state.handler = None;
        state.time_stamp = None;
    }

    fn time_stamp(&self) -> Option<Timestamp> {
        self.state.borrow().time_stamp
    }
}

fn downcast_event_id<T: EventKind>(payload: &mut dyn Any) -> EventRef<T> {
    let id = *payload
        .downcast_ref::<EventId>()
        .expect("condition handler invoked with a non-EventId payload");
    EventRef::new(id)
}

/// Substitutes an alternative event for the one about to resolve.
///
/// `delayed` and `single_attempt` fold in the reference taxonomy's
/// `DelayedReplacement`/`SingleAttemptReplacement` variants as
/// constructor flags rather than separate wrapper types, since both only
/// change *when* the same condition disconnects itself.
pub struct Replacement<T: EventKind + Clone> {
    core: ConditionCore,
    condition: Box<dyn Fn(&Session, EventRef<T>) -> bool>,
    replace_fn: Box<dyn Fn(&Session, EventRef<T>) -> T>,
    delayed: bool,
    single_attempt: bool,
    self_ref: Weak<Replacement<T>>,
}

impl<T: EventKind + Clone> Replacement<T> {
    pub fn new(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        replace_fn: impl Fn(&Session, EventRef<T>) -> T + 'static,
    ) -> Rc<Self> {
        Self::build(condition, replace_fn, false, false)
    }

    /// Disconnects itself the moment it is actually chosen and invoked,
    /// not merely offered (`DelayedReplacement`).
    pub fn delayed(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        replace_fn: impl Fn(&Session, EventRef<T>) -> T + 'static,
    ) -> Rc<Self> {
        Self::build(condition, replace_fn, true, false)
    }

    /// Disconnects itself as soon as its condition matches, before the
    /// chooser even runs, so it is offered at most once regardless of
    /// which replacement wins (`SingleAttemptReplacement`).
    pub fn single_attempt(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        replace_fn: impl Fn(&Session, EventRef<T>) -> T + 'static,
    ) -> Rc<Self> {
        Self::build(condition, replace_fn, false, true)
    }

    fn build(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        replace_fn: impl Fn(&Session, EventRef<T>) -> T + 'static,
        delayed: bool,
        single_attempt: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Replacement {
            core: ConditionCore::new(format!("_try_{}", T::NAME)),
            condition: Box::new(condition),
            replace_fn: Box::new(replace_fn),
            delayed,
            single_attempt,
            self_ref: weak.clone(),
        })
    }
}

impl<T: EventKind + Clone> Condition for Replacement<T> {
    fn connect(&self, session: &mut Session) {
        if self.core.is_connected() {
            return;
        }
        let weak = self.self_ref.clone();
        let handler: Rc<Handler<Session, EventError>> = Rc::new(move |session, payload| {
            let Some(this) = weak.upgrade() else {
                return Ok(None);
            };
            let event_ref = downcast_event_id::<T>(payload);
            if !(this.condition)(session, event_ref) {
                return Ok(None);
            }
            if this.single_attempt {
                this.disconnect(session);
            }
            let this_for_thunk = Rc::clone(&this);
            let thunk: ReplacementThunk<T> = Box::new(move |session, original_id, chosen_id| {
                if this_for_thunk.delayed {
                    this_for_thunk.disconnect(session);
                }
                let original_ref: EventRef<T> = EventRef::new(original_id);
                let new_value = (this_for_thunk.replace_fn)(session, original_ref);
                original_ref.replace_as_chosen(session, move |slot| *slot = new_value, chosen_id)
            });
            Ok(Some(Box::new(thunk) as Box<dyn Any>))
        });
        self.core.connect(session, handler);
    }

    fn disconnect(&self, session: &mut Session) {
        self.core.disconnect(session);
    }

    fn time_stamp(&self) -> Option<Timestamp> {
        self.core.time_stamp()
    }
}

macro_rules! reaction_like {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        pub struct $name<T: EventKind> {
            core: ConditionCore,
            condition: Box<dyn Fn(&Session, EventRef<T>) -> bool>,
            react: RefCell<Box<dyn FnMut(&mut Session, EventRef<T>)>>,
            self_ref: Weak<$name<T>>,
        }

        impl<T: EventKind> $name<T> {
            pub fn new(
                condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
                react: impl FnMut(&mut Session, EventRef<T>) + 'static,
            ) -> Rc<Self> {
                Rc::new_cyclic(|weak| $name {
                    core: ConditionCore::new(format!(concat!($prefix, "{}"), T::NAME)),
                    condition: Box::new(condition),
                    react: RefCell::new(Box::new(react)),
                    self_ref: weak.clone(),
                })
            }
        }

        impl<T: EventKind> Condition for $name<T> {
            fn connect(&self, session: &mut Session) {
                if self.core.is_connected() {
                    return;
                }
                let weak = self.self_ref.clone();
                let handler: Rc<Handler<Session, EventError>> = Rc::new(move |session, payload| {
                    let Some(this) = weak.upgrade() else {
                        return Ok(None);
                    };
                    let event_ref = downcast_event_id::<T>(payload);
                    if (this.condition)(session, event_ref) {
                        (this.react.borrow_mut())(session, event_ref);
                    }
                    Ok(None)
                });
                self.core.connect(session, handler);
            }

            fn disconnect(&self, session: &mut Session) {
                self.core.disconnect(session);
            }

            fn time_stamp(&self) -> Option<Timestamp> {
                self.core.time_stamp()
            }
        }
    };
}

reaction_like!(
    Reaction,
    "_react_",
    "Fires during the pre-respond reaction phase, ordered by `time_stamp`."
);
reaction_like!(
    PostReaction,
    "_post_react_",
    "Fires during the post-payload reaction phase, ordered by `time_stamp`."
);

macro_rules! response_like {
    ($name:ident, $signal:expr, $doc:literal) => {
        #[doc = $doc]
        pub struct $name<T: EventKind> {
            core: ConditionCore,
            condition: Box<dyn Fn(&Session, EventRef<T>) -> bool>,
            resolve: RefCell<Box<dyn FnMut(&mut Session, EventRef<T>) -> Result<(), EventError>>>,
            self_ref: Weak<$name<T>>,
        }

        impl<T: EventKind> $name<T> {
            pub fn new(
                condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
                resolve: impl FnMut(&mut Session, EventRef<T>) -> Result<(), EventError> + 'static,
            ) -> Rc<Self> {
                Rc::new_cyclic(|weak| $name {
                    core: ConditionCore::new($signal(T::NAME)),
                    condition: Box::new(condition),
                    resolve: RefCell::new(Box::new(resolve)),
                    self_ref: weak.clone(),
                })
            }
        }

        impl<T: EventKind> Condition for $name<T> {
            fn connect(&self, session: &mut Session) {
                if self.core.is_connected() {
                    return;
                }
                let weak = self.self_ref.clone();
                let handler: Rc<Handler<Session, EventError>> = Rc::new(move |session, payload| {
                    let Some(this) = weak.upgrade() else {
                        return Ok(None);
                    };
                    let event_ref = downcast_event_id::<T>(payload);
                    if (this.condition)(session, event_ref) {
                        (this.resolve.borrow_mut())(session, event_ref)?;
                    }
                    Ok(None)
                });
                self.core.connect(session, handler);
            }

            fn disconnect(&self, session: &mut Session) {
                self.core.disconnect(session);
            }

            fn time_stamp(&self) -> Option<Timestamp> {
                self.core.time_stamp()
            }
        }
    };
}

response_like!(
    Response,
    (|name: &str| name.to_string()),
    "Runs its `resolve` callback synchronously during the notify phase."
);
response_like!(
    PreResponse,
    (|name: &str| format!("_pre_respond_{name}")),
    "Same as `Response` but fires during the pre-respond phase."
);

/// Queues a deferred action rather than running it immediately: on a
/// matching fire, resolves a `Triggered` event that appends this
/// trigger's bound resolve callback to the session's trigger queue.
pub struct Trigger<T: EventKind> {
    core: ConditionCore,
    condition: Box<dyn Fn(&Session, EventRef<T>) -> bool>,
    resolve: Rc<RefCell<Box<dyn FnMut(&mut Session, EventRef<T>) -> Result<(), EventError>>>>,
    one_shot: bool,
    self_ref: Weak<Trigger<T>>,
}

impl<T: EventKind> Trigger<T> {
    pub fn new(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        resolve: impl FnMut(&mut Session, EventRef<T>) -> Result<(), EventError> + 'static,
    ) -> Rc<Self> {
        Self::build(condition, resolve, false)
    }

    /// One-shot latent variant (`DelayedTrigger`): disconnects itself
    /// after firing once.
    pub fn delayed(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        resolve: impl FnMut(&mut Session, EventRef<T>) -> Result<(), EventError> + 'static,
    ) -> Rc<Self> {
        Self::build(condition, resolve, true)
    }

    fn build(
        condition: impl Fn(&Session, EventRef<T>) -> bool + 'static,
        resolve: impl FnMut(&mut Session, EventRef<T>) -> Result<(), EventError> + 'static,
        one_shot: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Trigger {
            core: ConditionCore::new(T::NAME),
            condition: Box::new(condition),
            resolve: Rc::new(RefCell::new(Box::new(resolve))),
            one_shot,
            self_ref: weak.clone(),
        })
    }
}

impl<T: EventKind> Condition for Trigger<T> {
    fn connect(&self, session: &mut Session) {
        if self.core.is_connected() {
            return;
        }
        let weak = self.self_ref.clone();
        let handler: Rc<Handler<Session, EventError>> = Rc::new(move |session, payload| {
            let Some(this) = weak.upgrade() else {
                return Ok(None);
            };
            let event_ref = downcast_event_id::<T>(payload);
            if !(this.condition)(session, event_ref) {
                return Ok(None);
            }
            if this.one_shot {
                this.disconnect(session);
            }
            let resolve = Rc::clone(&this.resolve);
            let enqueue: crate::session::QueuedTrigger = Box::new(move |session| {
                (resolve.borrow_mut())(session, event_ref)
            });
            session.resolve_event(
                crate::builtin::Triggered {
                    enqueue: Some(enqueue),
                },
                None,
                None,
            )?;
            Ok(None)
        });
        self.core.connect(session, handler);
    }

    fn disconnect(&self, session: &mut Session) {
        self.core.disconnect(session);
    }

    fn time_stamp(&self) -> Option<Timestamp> {
        self.core.time_stamp()
    }
}

/// A read-through attribute modifier: connected under `_aa_<name>` and
/// picked up during attribute-read composition (§4.5), never during
/// ordinary event resolution.
pub struct StaticAttributeModification<O: 'static, V: 'static> {
    core: ConditionCore,
    resolve: Box<dyn Fn(&O, V) -> V>,
    self_ref: Weak<StaticAttributeModification<O, V>>,
}

impl<O: 'static, V: 'static> StaticAttributeModification<O, V> {
    pub fn new(name: &str, resolve: impl Fn(&O, V) -> V + 'static) -> Rc<Self> {
        Rc::new_cyclic(|weak| StaticAttributeModification {
            core: ConditionCore::new(format!("_aa_{name}")),
            resolve: Box::new(resolve),
            self_ref: weak.clone(),
        })
    }

    pub(crate) fn apply(&self, owner: &O, current: V) -> V {
        (self.resolve)(owner, current)
    }
}

impl<O: 'static, V: 'static> Condition for StaticAttributeModification<O, V> {
    fn connect(&self, session: &mut Session) {
        if self.core.is_connected() {
            return;
        }
        let weak = self.self_ref.clone();
        let handler: Rc<Handler<Session, EventError>> = Rc::new(move |_session, _payload| {
            let Some(this) = weak.upgrade() else {
                return Ok(None);
            };
            // Returns itself; `ProtectedAttribute::get` downcasts each
            // connected modifier back out, sorts by `time_stamp`, and
            // folds them over the base value.
            Ok(Some(Box::new(this) as Box<dyn Any>))
        });
        self.core.connect(session, handler);
    }

    fn disconnect(&self, session: &mut Session) {
        self.core.disconnect(session);
    }

    fn time_stamp(&self) -> Option<Timestamp> {
        self.core.time_stamp()
    }
}

/// Adds a termination trigger to any other condition (§4.4's `Continuous`
/// mix-in, rendered as composition over `dyn Condition` rather than an
/// inheritance mix-in): on connect, registers a second handler under `U`'s
/// bare signal alongside `inner`'s own; when that fires and
/// `terminate_condition` holds, disconnects both `inner` and itself.
pub struct Continuous<U: EventKind> {
    inner: Rc<dyn Condition>,
    terminate_condition: Box<dyn Fn(&Session, EventRef<U>) -> bool>,
    core: ConditionCore,
    self_ref: Weak<Continuous<U>>,
}

impl<U: EventKind> Continuous<U> {
    pub fn new(
        inner: Rc<dyn Condition>,
        terminate_condition: impl Fn(&Session, EventRef<U>) -> bool + 'static,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Continuous {
            inner,
            terminate_condition: Box::new(terminate_condition),
            core: ConditionCore::new(U::NAME),
            self_ref: weak.clone(),
        })
    }
}

impl<U: EventKind> Condition for Continuous<U> {
    fn connect(&self, session: &mut Session) {
        if self.core.is_connected() {
            return;
        }
        self.inner.connect(session);
        let weak = self.self_ref.clone();
        let handler: Rc<Handler<Session, EventError>> = Rc::new(move |session, payload| {
            let Some(this) = weak.upgrade() else {
                return Ok(None);
            };
            let event_ref = downcast_event_id::<U>(payload);
            if (this.terminate_condition)(session, event_ref) {
                this.disconnect(session);
            }
            Ok(None)
        });
        self.core.connect(session, handler);
    }

    fn disconnect(&self, session: &mut Session) {
        self.inner.disconnect(session);
        self.core.disconnect(session);
    }

    fn time_stamp(&self) -> Option<Timestamp> {
        self.core.time_stamp()
    }
}
