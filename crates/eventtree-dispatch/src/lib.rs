//! A generic, signal-keyed broadcast primitive.
//!
//! [`Dispatcher`] has no knowledge of events, conditions, or any other
//! domain concept built on top of it: it is a `HashMap` from string signal
//! to an ordered list of weakly-held handlers, with a `send` that snapshots
//! and invokes them. Everything event-tree-specific lives one layer up, in
//! `eventtree-core`.

mod dispatcher;

pub use dispatcher::{Dispatcher, Handler, HandlerId};
