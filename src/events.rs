//! Named pub/sub dispatcher. One map from event name to an ordered list of
//! subscribers; `once` subscribers are removed before they're invoked so a
//! handler that resubscribes itself under the same name doesn't immediately
//! re-fire.
//!
//! Per the design note on the dynamic event bus: this is the "map from event
//! name to list of subscribers" option, since the session emits dozens of
//! distinct event names (`join<channel>`, `who<target>`, …) that are built at
//! runtime from channel/target names and don't fit a small closed enum.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{HandlerPanicMessage, SessionError};

pub type Handler = Box<dyn FnMut(&[Value]) + 'static>;

/// An emitted argument. Handlers downcast via the accessor methods; this
/// keeps the bus untyped (it really is just forwarding whatever the protocol
/// handler or command API produced) without resorting to `Any`.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
    None,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(l: Vec<String>) -> Self {
        Value::List(l)
    }
}

struct Subscription {
    handler: Handler,
    once: bool,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<String, Vec<Subscription>>,
    /// Every `emit` call, regardless of subscriber count. The connection
    /// loop drains this after each frame/command to forward events to
    /// whatever's outside the single-threaded session context (an external
    /// consumer is just another subscriber, but one that lives on a
    /// different task and so can't be a plain closure here).
    log: Vec<(String, Vec<Value>)>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn drain_log(&mut self) -> Vec<(String, Vec<Value>)> {
        std::mem::take(&mut self.log)
    }

    pub fn on(&mut self, name: impl Into<String>, handler: impl FnMut(&[Value]) + 'static) {
        self.subscribers
            .entry(name.into())
            .or_default()
            .push(Subscription {
                handler: Box::new(handler),
                once: false,
            });
    }

    pub fn once(&mut self, name: impl Into<String>, handler: impl FnMut(&[Value]) + 'static) {
        self.subscribers
            .entry(name.into())
            .or_default()
            .push(Subscription {
                handler: Box::new(handler),
                once: true,
            });
    }

    /// Removes the *first* subscriber registered for `name`. The bus has no
    /// handler identity to compare against (closures aren't `PartialEq`), so
    /// this is the one corner of the contract real callers rarely need;
    /// `once` is the common unsubscribe path.
    pub fn off_all(&mut self, name: &str) {
        self.subscribers.remove(name);
    }

    /// Fire `name`'s subscribers, in registration order, with `args`.
    /// `once` subscribers are spliced out before being invoked. A handler
    /// that panics is caught so later handlers (and later frames) still run;
    /// the panic is re-raised as a `SessionError` unless `requested_disconnect`
    /// is set, matching the "don't interrupt dispatch, except during an
    /// already-intentional shutdown" policy.
    pub fn emit(
        &mut self,
        name: &str,
        args: &[Value],
        requested_disconnect: bool,
    ) -> Result<(), SessionError> {
        self.log.push((name.to_owned(), args.to_vec()));

        let Some(subs) = self.subscribers.get_mut(name) else {
            return Ok(());
        };
        let mut keep = Vec::with_capacity(subs.len());
        let mut panic_msg = None;
        for mut sub in subs.drain(..) {
            let result = catch_unwind(AssertUnwindSafe(|| (sub.handler)(args)));
            if let Err(payload) = result {
                let message = panic_payload_message(payload);
                log::error!("event handler for `{name}` panicked: {message}");
                if panic_msg.is_none() {
                    panic_msg = Some(message);
                }
            }
            if !sub.once {
                keep.push(sub);
            }
        }
        *self.subscribers.entry(name.to_owned()).or_default() = keep;

        match panic_msg {
            Some(message) if !requested_disconnect => Err(SessionError::HandlerPanic {
                event: name.to_owned(),
                message,
            }),
            _ => Ok(()),
        }
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers.get(name).map_or(0, Vec::len)
    }
}

fn panic_payload_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        HandlerPanicMessage("non-string panic payload".to_owned()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        let o1 = order.clone();
        bus.on("ping", move |_| o1.borrow_mut().push(1));
        let o2 = order.clone();
        bus.on("ping", move |_| o2.borrow_mut().push(2));
        bus.emit("ping", &[], false).unwrap();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn once_fires_exactly_one_time() {
        let count = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let c = count.clone();
        bus.once("registered", move |_| *c.borrow_mut() += 1);
        bus.emit("registered", &[], false).unwrap();
        bus.emit("registered", &[], false).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn unknown_event_name_is_a_silent_noop() {
        let mut bus = EventBus::new();
        assert!(bus.emit("nothing-subscribed", &[], false).is_ok());
    }

    #[test]
    fn handler_panic_is_reraised_unless_shutting_down() {
        let mut bus = EventBus::new();
        bus.on("boom", |_| panic!("handler bug"));
        assert!(bus.emit("boom", &[], false).is_err());

        let mut bus = EventBus::new();
        bus.on("boom", |_| panic!("handler bug"));
        assert!(bus.emit("boom", &[], true).is_ok());
    }

    #[test]
    fn later_handlers_still_run_after_an_earlier_panic() {
        let ran = Rc::new(RefCell::new(false));
        let mut bus = EventBus::new();
        bus.on("boom", |_| panic!("first handler bug"));
        let r = ran.clone();
        bus.on("boom", move |_| *r.borrow_mut() = true);
        let _ = bus.emit("boom", &[], false);
        assert!(*ran.borrow());
    }
}
