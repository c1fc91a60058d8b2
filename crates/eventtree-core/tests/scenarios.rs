//! End-to-end scenarios (S1-S6) over a small damage-dealing fixture.

use std::cell::RefCell;
use std::rc::Rc;

use eventtree_core::{
    Condition, EventError, EventKind, EventRef, ProtectedAttribute, Replacement, Session,
    StaticAttributeModification, Trigger,
};

#[derive(Clone)]
struct DealDamage {
    amount: i64,
    acc: Rc<RefCell<i64>>,
}

impl EventKind for DealDamage {
    const NAME: &'static str = "DealDamage";
    type Output = i64;

    fn payload(&mut self, _session: &mut Session, _this: EventRef<Self>) -> Result<i64, EventError> {
        *self.acc.borrow_mut() += self.amount;
        Ok(self.amount)
    }
}

fn deal(acc: &Rc<RefCell<i64>>, amount: i64) -> DealDamage {
    DealDamage {
        amount,
        acc: Rc::clone(acc),
    }
}

#[test]
fn s1_plain_event() {
    let mut session = Session::new();
    let acc = Rc::new(RefCell::new(0));

    session.resolve_event(deal(&acc, 5), None, None).unwrap();

    assert_eq!(session.event_log_len(), 1);
    assert_eq!(*acc.borrow(), 5);
}

#[test]
fn s2_single_delayed_replacement() {
    let mut session = Session::new();
    let acc = Rc::new(RefCell::new(0));

    let double = Replacement::<DealDamage>::delayed(
        |_session, _event| true,
        |session, event| {
            let mut v = event.get(session).clone();
            v.amount *= 2;
            v
        },
    );
    session.create_condition(double, None).unwrap();

    session.resolve_event(deal(&acc, 5), None, None).unwrap();
    assert_eq!(session.event_log_len(), 1, "only the replacement DealDamage(10) is logged");
    assert_eq!(*acc.borrow(), 10);

    // DelayedReplacement disconnects itself once chosen: a second
    // DealDamage is no longer eligible for doubling.
    session.resolve_event(deal(&acc, 5), None, None).unwrap();
    assert_eq!(*acc.borrow(), 15);
}

#[test]
fn s3_multiple_replacements_ordering() {
    let mut session = Session::new();
    let acc = Rc::new(RefCell::new(0));

    let double = Replacement::<DealDamage>::new(
        |_session, _event| true,
        |session, event| {
            let mut v = event.get(session).clone();
            v.amount *= 2;
            v
        },
    );
    session.create_condition(double, None).unwrap();

    let increase = Replacement::<DealDamage>::new(
        |_session, _event| true,
        |session, event| {
            let mut v = event.get(session).clone();
            v.amount += 1;
            v
        },
    );
    session.create_condition(increase, None).unwrap();

    session.resolve_event(deal(&acc, 10), None, None).unwrap();

    // DoubleDamage (earlier time_stamp) wins the first choice: 10 -> 20.
    // Its substitute is a fresh event with {double} in replaced_by, so
    // IncreaseDamage (not yet applied on this lineage) still fires: 20 -> 21.
    assert_eq!(*acc.borrow(), 21);
}

#[test]
fn s4_trigger_enqueue_and_drain() {
    let mut session = Session::new();
    let acc = Rc::new(RefCell::new(0));

    let bonus = Trigger::<DealDamage>::new(
        |_session, _event| true,
        |session, event| {
            event.spawn_tree(session, |v| v.amount = 2);
            Ok(())
        },
    );
    session.create_condition(bonus, None).unwrap();

    session.resolve_event(deal(&acc, 3), None, None).unwrap();
    assert_eq!(*acc.borrow(), 3, "the trigger only enqueues, it does not fire inline");
    assert_eq!(session.pending_trigger_count(), 1);

    let drained = session.resolve_triggers().unwrap();
    assert_eq!(drained, 1);
    assert_eq!(*acc.borrow(), 5);
    assert_eq!(session.pending_trigger_count(), 0);
}

struct Item {
    price: ProtectedAttribute<Item, i64>,
}

#[test]
fn s5_attribute_modification_fold_order() {
    let mut session = Session::new();
    let item = Item {
        price: ProtectedAttribute::new("price", 10),
    };

    let more_expensive =
        StaticAttributeModification::<Item, i64>::new("price", |_owner, v| v + 1);
    session.create_condition(more_expensive, None).unwrap();
    assert_eq!(item.price.get(&mut session, &item), 11);

    let free = StaticAttributeModification::<Item, i64>::new("price", |_owner, _v| 0);
    session.create_condition(free, None).unwrap();
    // +1 folds first (earlier time_stamp), then the override to 0.
    assert_eq!(item.price.get(&mut session, &item), 0);
}

#[test]
fn s5_attribute_modification_swapped_order() {
    let mut session = Session::new();
    let item = Item {
        price: ProtectedAttribute::new("price", 10),
    };

    let free = StaticAttributeModification::<Item, i64>::new("price", |_owner, _v| 0);
    session.create_condition(free, None).unwrap();

    let more_expensive =
        StaticAttributeModification::<Item, i64>::new("price", |_owner, v| v + 1);
    session.create_condition(more_expensive, None).unwrap();

    // Free folds first now (earlier time_stamp): 10 -> 0 -> 1.
    assert_eq!(item.price.get(&mut session, &item), 1);
}

#[test]
fn s6_lineage_preservation_depend_tree_vs_spawn_tree() {
    let nested_output = Rc::new(RefCell::new(None));

    // depend_tree: the nested event inherits replaced_by, so the
    // still-connected Replacement does not fire on it a second time.
    {
        let mut session = Session::new();
        let acc = Rc::new(RefCell::new(0));
        let nested_output = Rc::clone(&nested_output);

        let double = Replacement::<DealDamage>::new(
            |_session, _event| true,
            |session, event| {
                let mut v = event.get(session).clone();
                v.amount *= 2;
                v
            },
        );
        session.create_condition(double, None).unwrap();

        let capture = Trigger::<DealDamage>::new(
            |_session, _event| true,
            move |session, event| {
                let output = event.depend_tree(session, |v| v.amount = 99).unwrap();
                *nested_output.borrow_mut() = output;
                Ok(())
            },
        );
        session.create_condition(capture, None).unwrap();

        session.resolve_event(deal(&acc, 5), None, None).unwrap();
        session.resolve_triggers().unwrap();
    }
    assert_eq!(
        *nested_output.borrow(),
        Some(99),
        "depend_tree's child inherits replaced_by: the Replacement does not re-fire"
    );

    // spawn_tree: fresh replaced_by, so the Replacement is eligible again.
    let nested_output = Rc::new(RefCell::new(None));
    {
        let mut session = Session::new();
        let acc = Rc::new(RefCell::new(0));
        let nested_output = Rc::clone(&nested_output);

        let double = Replacement::<DealDamage>::new(
            |_session, _event| true,
            |session, event| {
                let mut v = event.get(session).clone();
                v.amount *= 2;
                v
            },
        );
        session.create_condition(double, None).unwrap();

        let capture = Trigger::<DealDamage>::new(
            |_session, _event| true,
            move |session, event| {
                let output = event.spawn_tree(session, |v| v.amount = 99);
                *nested_output.borrow_mut() = output;
                Ok(())
            },
        );
        session.create_condition(capture, None).unwrap();

        session.resolve_event(deal(&acc, 5), None, None).unwrap();
        session.resolve_triggers().unwrap();
    }
    assert_eq!(
        *nested_output.borrow(),
        Some(198),
        "spawn_tree's child gets a fresh replaced_by: the Replacement fires again"
    );
}
