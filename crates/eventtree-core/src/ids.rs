use eventtree_dispatch::HandlerId;

/// The ordinal assigned to an event (on logging) or a condition (on
/// connect): the event log's length at that moment.
pub type Timestamp = usize;

/// A stable arena index into a [`Session`](crate::session::Session)'s event
/// nodes. Never reused; an `EventId` stays valid for the lifetime of the
/// `Session` that produced it, whether or not the event it names was ever
/// logged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EventId(pub(crate) usize);

/// Identifies one connected condition. A thin wrapper around the
/// Dispatcher's own `HandlerId`, which is already unique per registration —
/// sufficient for "fires at most once per lineage" bookkeeping, since
/// one-shot conditions (`DelayedTrigger`, `SingleAttemptReplacement`)
/// disconnect permanently rather than reconnecting under a new id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConditionId(pub(crate) HandlerId);

impl From<HandlerId> for ConditionId {
    fn from(id: HandlerId) -> Self {
        ConditionId(id)
    }
}
