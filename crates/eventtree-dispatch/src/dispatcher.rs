use std::any::Any;
use std::collections::HashMap;
use std::rc::Weak;

/// A handler registered under a signal.
///
/// Takes the dispatching context (the Session, one layer up) and a
/// type-erased payload, and returns a type-erased result. The concrete
/// payload/result types are agreed upon out of band by whoever registers
/// under a given signal name and whoever sends on it.
pub type Handler<Ctx, E> = dyn Fn(&mut Ctx, &mut dyn Any) -> Result<Option<Box<dyn Any>>, E>;

/// Identifies one registration. Stable for the lifetime of the registration,
/// never reused within a single `Dispatcher`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HandlerId(u64);

/// A keyed many-listener broadcast.
///
/// `Ctx` is the type handlers are invoked with (a `&mut Ctx`); `E` is the
/// error type a handler may fail with. Handlers are held by [`Weak`]
/// reference only — a `Dispatcher` never keeps a registered condition
/// alive. Disconnection, or the owner simply dropping its `Rc`, both make a
/// handler stop firing; the next [`Dispatcher::send`] silently drops dead
/// entries it encounters.
pub struct Dispatcher<Ctx, E> {
    handlers: HashMap<String, Vec<(HandlerId, Weak<Handler<Ctx, E>>)>>,
    next_id: u64,
}

impl<Ctx, E> Dispatcher<Ctx, E> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register `handler` under `signal`. Handlers have no identity to
    /// compare by, so callers (conditions) are responsible for not calling
    /// this twice for the same logical registration; each condition tracks
    /// its own connected/disconnected state for that reason.
    pub fn connect(&mut self, signal: &str, handler: Weak<Handler<Ctx, E>>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(signal.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove the registration `id` under `signal`. Silent if absent.
    pub fn disconnect(&mut self, signal: &str, id: HandlerId) {
        if let Some(list) = self.handlers.get_mut(signal) {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Copy out the current registration list for `signal`.
    ///
    /// Callers whose context *is* the struct embedding this `Dispatcher`
    /// (e.g. `Session`) cannot hand both `&mut self.dispatcher` and
    /// `&mut self` to a single call without aliasing; they instead call
    /// `snapshot` (a short-lived `&self` borrow) to get an owned list, let
    /// that borrow end, and then invoke handlers against `&mut self`
    /// directly. This is also what makes the "handlers connected during a
    /// send are not invoked by that send" guarantee free: a registration
    /// added after the snapshot was taken simply isn't in it.
    pub fn snapshot(&self, signal: &str) -> Vec<(HandlerId, Weak<Handler<Ctx, E>>)> {
        self.handlers.get(signal).cloned().unwrap_or_default()
    }

    /// Invoke every live handler registered under `signal`, in registration
    /// order, collecting their non-null return values.
    ///
    /// Convenience wrapper around [`snapshot`](Self::snapshot) for callers
    /// whose `Ctx` does not alias this `Dispatcher` itself. On the first
    /// handler error, the error is returned immediately; results collected
    /// up to that point are discarded (the engine never relies on partial
    /// results under failure).
    pub fn send(
        &mut self,
        signal: &str,
        ctx: &mut Ctx,
        payload: &mut dyn Any,
    ) -> Result<Vec<(HandlerId, Box<dyn Any>)>, E> {
        let snapshot = self.snapshot(signal);

        let mut results = Vec::new();
        let mut dead = Vec::new();
        for (id, weak) in snapshot {
            let Some(handler) = weak.upgrade() else {
                dead.push(id);
                continue;
            };
            if let Some(value) = handler(ctx, payload)? {
                results.push((id, value));
            }
        }
        if !dead.is_empty() {
            if let Some(list) = self.handlers.get_mut(signal) {
                list.retain(|(id, _)| !dead.contains(id));
            }
        }
        Ok(results)
    }
}

impl<Ctx, E> Default for Dispatcher<Ctx, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counter(RefCell<i64>);

    fn make_adder(counter: &Rc<Counter>, amount: i64) -> Rc<Handler<(), String>> {
        let counter = Rc::clone(counter);
        Rc::new(move |_ctx: &mut (), _payload: &mut dyn Any| {
            *counter.0.borrow_mut() += amount;
            Ok(None)
        })
    }

    #[test]
    fn send_invokes_handlers_in_registration_order() {
        let mut dispatcher: Dispatcher<(), String> = Dispatcher::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = ();

        let handlers: Vec<Rc<Handler<(), String>>> = (0..3)
            .map(|i| {
                let order = Rc::clone(&order);
                Rc::new(move |_ctx: &mut (), _payload: &mut dyn Any| {
                    order.borrow_mut().push(i);
                    Ok(None)
                }) as Rc<Handler<(), String>>
            })
            .collect();
        for handler in &handlers {
            dispatcher.connect("ping", Rc::downgrade(handler));
        }

        dispatcher.send("ping", &mut ctx, &mut ()).unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn dropped_handler_is_skipped_and_pruned() {
        let mut dispatcher: Dispatcher<(), String> = Dispatcher::new();
        let counter = Rc::new(Counter::default());
        let mut ctx = ();

        {
            let handler = make_adder(&counter, 1);
            dispatcher.connect("tick", Rc::downgrade(&handler));
            // handler dropped here; dispatcher only ever held a Weak
        }

        let results = dispatcher.send("tick", &mut ctx, &mut ()).unwrap();
        assert!(results.is_empty());
        assert_eq!(*counter.0.borrow(), 0);
    }

    #[test]
    fn disconnect_removes_handler_before_next_send() {
        let mut dispatcher: Dispatcher<(), String> = Dispatcher::new();
        let counter = Rc::new(Counter::default());
        let handler = make_adder(&counter, 5);
        let mut ctx = ();

        let id = dispatcher.connect("tick", Rc::downgrade(&handler));
        dispatcher.send("tick", &mut ctx, &mut ()).unwrap();
        assert_eq!(*counter.0.borrow(), 5);

        dispatcher.disconnect("tick", id);
        dispatcher.send("tick", &mut ctx, &mut ()).unwrap();
        assert_eq!(*counter.0.borrow(), 5);
    }

    #[test]
    fn snapshot_taken_before_a_send_excludes_later_registrations() {
        let mut dispatcher: Dispatcher<(), String> = Dispatcher::new();
        let first = make_adder(&Rc::new(Counter::default()), 1);
        dispatcher.connect("go", Rc::downgrade(&first));

        let snapshot = dispatcher.snapshot("go");
        assert_eq!(snapshot.len(), 1);

        // Registered after the snapshot was taken: must not appear in it,
        // even though it's now live in the dispatcher's own table.
        let second = make_adder(&Rc::new(Counter::default()), 2);
        dispatcher.connect("go", Rc::downgrade(&second));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(dispatcher.snapshot("go").len(), 2);
    }

    #[test]
    fn handler_connecting_a_new_registration_takes_effect_next_send_only() {
        // Models the real Session::send pattern: the dispatcher's own
        // `send` is used here because `Ctx = Counter` does not alias the
        // `Dispatcher` itself, so no split-borrow is required.
        let mut dispatcher: Dispatcher<Counter, String> = Dispatcher::new();
        let late: Rc<Handler<Counter, String>> =
            Rc::new(|ctx: &mut Counter, _payload: &mut dyn Any| {
                *ctx.0.borrow_mut() += 100;
                Ok(None)
            });
        let late_weak = Rc::downgrade(&late);

        let registrar: Rc<Handler<Counter, String>> = Rc::new(move |ctx: &mut Counter, _: &mut dyn Any| {
            *ctx.0.borrow_mut() += 1;
            Ok(None)
        });
        dispatcher.connect("go", Rc::downgrade(&registrar));

        let mut ctx = Counter::default();
        dispatcher.send("go", &mut ctx, &mut ()).unwrap();
        assert_eq!(*ctx.0.borrow(), 1);

        dispatcher.connect("go", late_weak);
        dispatcher.send("go", &mut ctx, &mut ()).unwrap();
        assert_eq!(*ctx.0.borrow(), 1 + 1 + 100);
    }

    #[test]
    fn first_error_short_circuits_and_propagates() {
        let mut dispatcher: Dispatcher<(), String> = Dispatcher::new();
        let calls = Rc::new(RefCell::new(0));
        let mut ctx = ();

        let ok: Rc<Handler<(), String>> = {
            let calls = Rc::clone(&calls);
            Rc::new(move |_ctx: &mut (), _payload: &mut dyn Any| {
                *calls.borrow_mut() += 1;
                Ok(None)
            })
        };
        let failing: Rc<Handler<(), String>> =
            Rc::new(|_ctx: &mut (), _payload: &mut dyn Any| Err("boom".to_string()));
        let never_runs: Rc<Handler<(), String>> = {
            let calls = Rc::clone(&calls);
            Rc::new(move |_ctx: &mut (), _payload: &mut dyn Any| {
                *calls.borrow_mut() += 1;
                Ok(None)
            })
        };

        dispatcher.connect("x", Rc::downgrade(&ok));
        dispatcher.connect("x", Rc::downgrade(&failing));
        dispatcher.connect("x", Rc::downgrade(&never_runs));

        let err = dispatcher.send("x", &mut ctx, &mut ()).unwrap_err();
        assert_eq!(err, "boom");
        assert_eq!(*calls.borrow(), 1);
    }
}
