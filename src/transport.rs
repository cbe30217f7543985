//! The outbound half of the daemon connection.
//!
//! Opening the channel, encoding messages for the wire and reconnecting are up to the
//! implementor. Inbound messages are fed back through
//! [`Dispatcher::dispatch`](../adapter/struct.Dispatcher.html#method.dispatch) on the
//! transport's delivery thread, in arrival order.

use crate::error::Error;
use crate::message::Message;

pub trait Transport: Send + Sync {
    /// Queues `message` for delivery to the daemon. Must not block waiting for a response.
    fn send(&self, message: Message) -> Result<(), Error>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, message: Message) -> Result<(), Error> {
        (**self).send(message)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, message: Message) -> Result<(), Error> {
        (**self).send(message)
    }
}

#[cfg(test)]
pub(in crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::adapter::{AdapterSession, AdapterSessionBuilder, Dispatcher};
    use crate::error::ErrorKind;
    use crate::message::{CommandId, EventId, key};
    use crate::value::Value;

    /// Records every sent message on a channel so the test can play the daemon.
    pub struct Loopback {
        sent: Mutex<mpsc::Sender<Message>>,
        broken: AtomicBool,
    }

    impl Loopback {
        pub fn new() -> (Self, mpsc::Receiver<Message>) {
            let (tx, rx) = mpsc::channel();
            (Self {
                sent: Mutex::new(tx),
                broken: AtomicBool::new(false),
            }, rx)
        }
    }

    impl Transport for Loopback {
        fn send(&self, message: Message) -> Result<(), Error> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::Transport, "loopback closed"));
            }
            let _ = self.sent.lock().unwrap().send(message);
            Ok(())
        }
    }

    pub struct Daemon {
        pub sent: mpsc::Receiver<Message>,
        pub dispatcher: Dispatcher,
        pub transport: std::sync::Arc<Loopback>,
    }

    impl Daemon {
        pub fn recv(&self) -> Message {
            self.sent.recv_timeout(Duration::from_secs(5)).expect("no message sent")
        }

        pub fn expect(&self, id: CommandId) -> Value {
            let m = self.recv();
            assert_eq!(m.tag, id.code(), "unexpected command {:?}", m);
            m.args.unwrap_or_else(|| dict! {})
        }

        pub fn assert_idle(&self) {
            if let Ok(m) = self.sent.recv_timeout(Duration::from_millis(50)) {
                panic!("unexpected command {:?}", m);
            }
        }

        pub fn reply(&self, id: EventId, args: Value) {
            self.dispatcher.dispatch(id.code(), Some(args));
        }

        pub fn set_broken(&self, broken: bool) {
            self.transport.broken.store(broken, Ordering::SeqCst);
        }
    }

    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Returns a session that has not been initialized yet.
    pub fn adapter() -> (AdapterSession, Daemon) {
        init_logging();
        let (transport, sent) = Loopback::new();
        let transport = std::sync::Arc::new(transport);
        let adapter = AdapterSessionBuilder::new()
            .name("test")
            .build(transport.clone());
        let dispatcher = adapter.dispatcher();
        (adapter, Daemon {
            sent,
            dispatcher,
            transport,
        })
    }

    /// Returns an initialized session with the adapter powered on.
    pub fn powered_on() -> (AdapterSession, Daemon) {
        let (adapter, daemon) = adapter();
        let init = {
            let adapter = adapter.clone();
            thread::spawn(move || adapter.init())
        };
        daemon.expect(CommandId::Init);
        daemon.reply(EventId::StateChanged, dict! { key::STATE => 5 });
        init.join().unwrap().unwrap();
        (adapter, daemon)
    }
}
