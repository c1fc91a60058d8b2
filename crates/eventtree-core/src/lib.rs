//! An event-tree resolution engine: atomic events that can be replaced,
//! reacted to, and that spawn further dependent events, observed by
//! conditions bound through [`eventtree_dispatch::Dispatcher`].
//!
//! A [`Session`] owns the event arena, the trigger queue, and the
//! Dispatcher; domain code declares event classes by implementing
//! [`EventKind`] and connects [`Condition`]s (replacement, reaction,
//! trigger, response, attribute modification) that watch for them.

mod attribute;
mod builtin;
mod condition;
mod error;
mod event;
mod ids;
mod session;

pub use attribute::{Attributed, ProtectedAttribute};
pub use builtin::{ChooseReplacement, ConnectCondition, DisconnectCondition, ResolveTriggers, Triggered};
pub use condition::{
    Condition, Continuous, PostReaction, PreResponse, Reaction, Replacement, Response,
    StaticAttributeModification, Trigger,
};
pub use error::EventError;
pub use event::{EventKind, EventRef};
pub use ids::{ConditionId, EventId, Timestamp};
pub use session::Session;
