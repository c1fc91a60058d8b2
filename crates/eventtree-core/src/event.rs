use std::any::Any;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::EventError;
use crate::ids::{ConditionId, EventId};
use crate::session::Session;

/// One node in the session's event arena.
///
/// Owned by the [`Session`]; parents reference children by [`EventId`], and
/// children reference their parent the same way — the classic arena +
/// index resolution for a tree that would otherwise need cyclic owned
/// references.
pub(crate) struct EventNode {
    pub(crate) type_name: &'static str,
    pub(crate) parent: Option<EventId>,
    pub(crate) children: Vec<EventId>,
    pub(crate) source: Option<Rc<dyn Any>>,
    pub(crate) replaced_by: HashSet<ConditionId>,
    /// The event's typed value record. Taken (`Option::take`) for the
    /// duration of a `setup`/`check`/`payload` call so that call can also
    /// borrow `&mut Session` without aliasing the arena slot it lives in
    /// (see `Session::with_checked_out`); put back immediately after.
    pub(crate) value: Option<Box<dyn Any>>,
    pub(crate) logged: bool,
}

/// The trait domain event classes implement.
///
/// A concrete `EventKind` is a plain value struct holding the event's
/// arguments (what the reference implementation passes as `**kwargs`).
/// `setup` and `check` default to no-ops; only `payload` is required.
pub trait EventKind: Any + Sized + 'static {
    /// Stable identity used to derive every signal name this event
    /// participates in (`_try_NAME`, `_react_NAME`, bare `NAME`, ...).
    /// Replaces runtime class-name introspection from the reference
    /// implementation.
    const NAME: &'static str;

    /// What resolving this event produces.
    type Output: 'static;

    /// Runs first. An error here aborts the event before it is ever
    /// offered to replacement search: never logged, no later phase runs.
    fn setup(&mut self, _session: &mut Session, _this: EventRef<Self>) -> Result<(), EventError> {
        Ok(())
    }

    /// Runs after replacement search finds nothing to apply. An error
    /// here aborts the event the same way a setup error does.
    fn check(&mut self, _session: &mut Session, _this: EventRef<Self>) -> Result<(), EventError> {
        Ok(())
    }

    /// The event's actual effect. Runs after the event has already been
    /// logged, so a payload error still leaves the event in the log —
    /// only the post-reaction and notify phases are skipped.
    fn payload(
        &mut self,
        session: &mut Session,
        this: EventRef<Self>,
    ) -> Result<Self::Output, EventError>;
}

/// A typed, `Copy`able handle into the session's event arena.
///
/// Downcasts the arena slot's type-erased value record back to the
/// concrete `T` known at the call site; never stored across a `Session`'s
/// lifetime boundary, since `EventId`s are only ever valid for the
/// `Session` that produced them.
pub struct EventRef<T> {
    id: EventId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EventRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EventRef<T> {}

impl<T> std::fmt::Debug for EventRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRef").field("id", &self.id).finish()
    }
}

impl<T: EventKind> EventRef<T> {
    pub(crate) fn new(id: EventId) -> Self {
        EventRef {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(self) -> EventId {
        self.id
    }

    /// Read the event's current value record.
    ///
    /// Panics if called while the event is checked out (i.e. from inside
    /// its own `setup`/`check`/`payload` via some other handle — domain
    /// code should use the `&T`/`&mut T` it was already handed instead).
    pub fn get<'a>(self, session: &'a Session) -> &'a T {
        session.node(self.id)
            .value
            .as_ref()
            .expect("EventRef::get called while the event is checked out")
            .downcast_ref::<T>()
            .expect("EventRef<T> type mismatch with the arena slot")
    }

    pub fn source(self, session: &Session) -> Option<Rc<dyn Any>> {
        session.node(self.id).source.clone()
    }

    pub fn parent(self, session: &Session) -> Option<EventId> {
        session.node(self.id).parent
    }

    pub fn was_logged(self, session: &Session) -> bool {
        session.node(self.id).logged
    }
}

impl<T: EventKind + Clone> EventRef<T> {
    /// Same parent as self, inherited source, `replaced_by` carried over:
    /// the lineage-preserving form for "the same logical action,
    /// refined".
    pub fn depend_tree(
        self,
        session: &mut Session,
        patch: impl FnOnce(&mut T),
    ) -> Result<Option<T::Output>, EventError> {
        let mut value = self.get(session).clone();
        patch(&mut value);
        let source = self.source(session);
        let replaced_by = session.node(self.id).replaced_by.clone();
        session
            .resolve(value, source, Some(self.id), replaced_by)
            .map(Some)
    }

    /// Same as `depend_tree` but parented to `self`'s parent rather than
    /// to `self` — used when invoking a chosen Replacement's substitute.
    pub fn replace(
        self,
        session: &mut Session,
        patch: impl FnOnce(&mut T),
    ) -> Result<Option<T::Output>, EventError> {
        let mut value = self.get(session).clone();
        patch(&mut value);
        let source = self.source(session);
        let parent = self.parent(session);
        let replaced_by = session.node(self.id).replaced_by.clone();
        session.resolve(value, source, parent, replaced_by).map(Some)
    }

    /// Like `replace`, but also folds `chosen` into the new event's
    /// `replaced_by` before resolving it. Used by a Replacement's own
    /// thunk: `self` here is the *original*, aborted event, and `chosen`
    /// is the Replacement condition that just won the choice (§4.3 step
    /// 3b-c) — its id must be recorded before the substitute resolves so
    /// it cannot fire again on the same lineage.
    pub(crate) fn replace_as_chosen(
        self,
        session: &mut Session,
        patch: impl FnOnce(&mut T),
        chosen: ConditionId,
    ) -> Result<T::Output, EventError> {
        let mut value = self.get(session).clone();
        patch(&mut value);
        let source = self.source(session);
        let parent = self.parent(session);
        let mut replaced_by = session.node(self.id).replaced_by.clone();
        replaced_by.insert(chosen);
        session.resolve(value, source, parent, replaced_by)
    }

    /// `replace` with an empty patch: the straightforward "try again,
    /// unreplaced and unreplaceable a second time" re-resolution a
    /// `DelayedReplacement` uses once it has disconnected itself.
    pub fn replace_clone(self, session: &mut Session) -> Result<Option<T::Output>, EventError> {
        self.replace(session, |_| {})
    }

    /// Lineage-breaking: same parent, inherited source, but a *fresh*
    /// `replaced_by` — a logically new action, eligible for every
    /// Replacement again. Errors are swallowed into `None` rather than
    /// propagated.
    pub fn spawn_tree(self, session: &mut Session, patch: impl FnOnce(&mut T)) -> Option<T::Output> {
        let mut value = self.get(session).clone();
        patch(&mut value);
        let source = self.source(session);
        session
            .resolve(value, source, Some(self.id), HashSet::new())
            .ok()
    }
}

impl<T: EventKind> EventRef<T> {
    /// Cross-type, lineage-preserving: a freshly constructed `U`, no value
    /// merge, `replaced_by` copied from self. Parented to self, source
    /// inherited.
    pub fn depend_branch<U: EventKind>(
        self,
        session: &mut Session,
        value: U,
    ) -> Result<Option<U::Output>, EventError> {
        let source = self.source(session);
        let replaced_by = session.node(self.id).replaced_by.clone();
        session
            .resolve(value, source, Some(self.id), replaced_by)
            .map(Some)
    }

    /// Cross-type, lineage-breaking, errors swallowed: the `branch` spawn
    /// form.
    pub fn branch<U: EventKind>(self, session: &mut Session, value: U) -> Option<U::Output> {
        let source = self.source(session);
        session
            .resolve(value, source, Some(self.id), HashSet::new())
            .ok()
    }
}
