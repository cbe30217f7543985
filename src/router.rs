//! Serialized dispatch of inbound messages to per-event handlers.

use log::*;
use static_assertions::assert_impl_all;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::message::{EventId, Message};
use crate::sync::lock;

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

struct Queue {
    pending: VecDeque<Message>,
    draining: bool,
}

/// Maps event ids to handlers and runs them one message at a time.
///
/// A message dispatched while a handler is running, whether re-entrantly from that handler
/// or from another thread, is queued and run by the draining thread after the current
/// handler returns, in arrival order.
pub struct EventRouter {
    handlers: RwLock<HashMap<EventId, Handler>>,
    queue: Mutex<Queue>,
}

assert_impl_all!(EventRouter: Send, Sync);

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Sets the handler for `id`, replacing any previous one.
    pub fn register(&self, id: EventId, handler: impl Fn(&Message) + Send + Sync + 'static) {
        let prev = self.handlers.write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(handler));
        if prev.is_some() {
            debug!("replaced handler for {}", id);
        }
    }

    pub fn unregister(&self, id: EventId) {
        self.handlers.write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn dispatch(&self, message: Message) {
        {
            let mut q = lock(&self.queue);
            q.pending.push_back(message);
            if q.draining {
                trace!("queued message while draining ({} pending)", q.pending.len());
                return;
            }
            q.draining = true;
        }

        let _reset = ResetOnPanic(self);
        loop {
            let message = {
                let mut q = lock(&self.queue);
                match q.pending.pop_front() {
                    Some(m) => m,
                    None => {
                        q.draining = false;
                        return;
                    }
                }
            };
            self.deliver(&message);
        }
    }

    fn deliver(&self, message: &Message) {
        let id = match EventId::from_code(message.tag) {
            Some(id) => id,
            None => {
                warn!("dropping message with unknown id {}: {:?}", message.tag, message.args);
                return;
            }
        };
        let handler = self.handlers.read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned();
        match handler {
            Some(handler) => {
                trace!("dispatching {}", id);
                handler(message);
            }
            None => warn!("dropping {} with no handler: {:?}", id, message.args),
        }
    }
}

// Keeps the router usable if a handler panics mid-drain.
struct ResetOnPanic<'a>(&'a EventRouter);

impl Drop for ResetOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            lock(&self.0.queue).draining = false;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Weak;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(id: EventId, n: i64) -> Message {
        Message::event(id, Some(crate::value::Value::Int(n)))
    }

    fn arg(m: &Message) -> i64 {
        m.args.as_ref().and_then(|v| v.as_i64()).unwrap()
    }

    #[test]
    fn reentrant_dispatch_is_queued() {
        let router = Arc::new(EventRouter::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let depth = Arc::new(AtomicUsize::new(0));

        {
            let weak: Weak<EventRouter> = Arc::downgrade(&router);
            let log = log.clone();
            let depth = depth.clone();
            router.register(EventId::ServicesDiscovered, move |m| {
                assert_eq!(depth.fetch_add(1, Ordering::SeqCst), 0, "handlers overlapped");
                let n = arg(m);
                log.lock().unwrap().push(n);
                if n == 0 {
                    let router = weak.upgrade().unwrap();
                    router.dispatch(msg(EventId::ServicesDiscovered, 1));
                    router.dispatch(msg(EventId::ServicesDiscovered, 2));
                    // Not delivered yet.
                    assert_eq!(*log.lock().unwrap(), vec![0]);
                }
                depth.fetch_sub(1, Ordering::SeqCst);
            });
        }

        router.dispatch(msg(EventId::ServicesDiscovered, 0));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);

        router.dispatch(msg(EventId::ServicesDiscovered, 3));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unhandled_and_unknown_are_dropped() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            router.register(EventId::StateChanged, move |_| { hits.fetch_add(1, Ordering::SeqCst); });
        }
        router.dispatch(Message::new(9999, None));
        router.dispatch(msg(EventId::PeripheralConnected, 0));
        router.dispatch(msg(EventId::StateChanged, 5));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_replaces() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in &["first", "second"] {
            let log = log.clone();
            let name = *name;
            router.register(EventId::StateChanged, move |_| log.lock().unwrap().push(name));
        }
        router.dispatch(msg(EventId::StateChanged, 0));
        assert_eq!(*log.lock().unwrap(), vec!["second"]);

        router.unregister(EventId::StateChanged);
        router.dispatch(msg(EventId::StateChanged, 0));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn survives_panicking_handler() {
        let router = Arc::new(EventRouter::new());
        router.register(EventId::StateChanged, |m| if arg(m) == 0 { panic!("boom") });
        let r = router.clone();
        let res = thread::spawn(move || r.dispatch(msg(EventId::StateChanged, 0))).join();
        assert!(res.is_err());

        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            router.register(EventId::PeripheralConnected, move |_| { hits.fetch_add(1, Ordering::SeqCst); });
        }
        router.dispatch(msg(EventId::PeripheralConnected, 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
