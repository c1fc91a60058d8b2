use std::marker::PhantomData;
use std::rc::Rc;

use crate::condition::StaticAttributeModification;
use crate::ids::ConditionId;
use crate::session::Session;

/// A read-through wrapper over a base value (§4.5): a domain object's
/// `price` or `power` field, modifiable by any
/// [`StaticAttributeModification`] connected under this attribute's name.
///
/// `get` composes every connected modifier ordered by `time_stamp`
/// ascending — oldest connection first — folding each modifier's
/// `resolve(owner, current)` over the running value. Adding a modifier
/// mid-session only affects reads taken afterward.
pub struct ProtectedAttribute<O: 'static, V: Clone + 'static> {
    name: &'static str,
    base: V,
    _owner: PhantomData<fn(&O)>,
}

impl<O: 'static, V: Clone + 'static> ProtectedAttribute<O, V> {
    pub fn new(name: &'static str, base: V) -> Self {
        ProtectedAttribute {
            name,
            base,
            _owner: PhantomData,
        }
    }

    pub fn base(&self) -> &V {
        &self.base
    }

    pub fn get(&self, session: &mut Session, owner: &O) -> V {
        let signal = format!("_aa_{}", self.name);
        let mut found = session.dispatcher_send_plain(&signal);
        found.sort_by_key(|(handler_id, _)| {
            session
                .condition_timestamps
                .get(&ConditionId::from(*handler_id))
                .copied()
                .unwrap_or(0)
        });

        let mut current = self.base.clone();
        for (_, modifier_any) in found {
            let modifier = modifier_any
                .downcast::<Rc<StaticAttributeModification<O, V>>>()
                .expect("attribute modifier type mismatch");
            current = modifier.apply(owner, current);
        }
        current
    }
}

/// Marker for a domain type whose fields are exposed as
/// `ProtectedAttribute`s. The engine places no requirements on
/// implementors beyond being a session-bound value the domain owns;
/// this trait exists only to name the convention.
pub trait Attributed {}
