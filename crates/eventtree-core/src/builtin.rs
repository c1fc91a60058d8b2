use std::rc::Rc;

use crate::condition::Condition;
use crate::error::EventError;
use crate::event::{EventKind, EventRef};
use crate::ids::ConditionId;
use crate::session::{QueuedTrigger, Session};

/// Connects a condition. Itself runs through the resolution pipeline, so
/// connecting is as observable/replaceable as any domain event.
pub struct ConnectCondition {
    pub condition: Rc<dyn Condition>,
}

impl EventKind for ConnectCondition {
    const NAME: &'static str = "ConnectCondition";
    type Output = ();

    fn payload(&mut self, session: &mut Session, _this: EventRef<Self>) -> Result<(), EventError> {
        self.condition.connect(session);
        Ok(())
    }
}

pub struct DisconnectCondition {
    pub condition: Rc<dyn Condition>,
}

impl EventKind for DisconnectCondition {
    const NAME: &'static str = "DisconnectCondition";
    type Output = ();

    fn payload(&mut self, session: &mut Session, _this: EventRef<Self>) -> Result<(), EventError> {
        self.condition.disconnect(session);
        Ok(())
    }
}

/// Picks one Replacement among several that matched the same event. Runs
/// through the pipeline like any other event, so a domain can itself
/// observe or replace the choice.
pub struct ChooseReplacement {
    pub(crate) candidates: Vec<ConditionId>,
}

impl EventKind for ChooseReplacement {
    const NAME: &'static str = "ChooseReplacement";
    type Output = ConditionId;

    fn payload(
        &mut self,
        session: &mut Session,
        _this: EventRef<Self>,
    ) -> Result<ConditionId, EventError> {
        Ok(session.default_choose(&self.candidates))
    }
}

/// A fired Trigger's deferred action, queued rather than run immediately.
/// Its payload appends the bound resolve callback to
/// `session.trigger_queue`; `resolve_triggers()` drains it later.
pub struct Triggered {
    pub(crate) enqueue: Option<QueuedTrigger>,
}

impl EventKind for Triggered {
    const NAME: &'static str = "Triggered";
    type Output = ();

    fn payload(&mut self, session: &mut Session, _this: EventRef<Self>) -> Result<(), EventError> {
        if let Some(thunk) = self.enqueue.take() {
            session.enqueue_trigger(thunk);
        }
        Ok(())
    }
}

/// Drains the trigger queue FIFO (§3.1). Its own payload IS the drain, so
/// the drain itself is logged like `ConnectCondition`/`ChooseReplacement`.
pub struct ResolveTriggers;

impl EventKind for ResolveTriggers {
    const NAME: &'static str = "ResolveTriggers";
    type Output = usize;

    fn payload(&mut self, session: &mut Session, _this: EventRef<Self>) -> Result<usize, EventError> {
        session.drain_trigger_queue()
    }
}
