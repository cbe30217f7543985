use log::*;
use static_assertions::assert_impl_all;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::AdapterState;
use crate::command;
use crate::error::Error;
use crate::message::{CommandId, EventId, Message, key};
use crate::router::EventRouter;
use crate::sync::lock;
use crate::transport::Transport;
use crate::uuid::Uuid;
use crate::value::Value;

const DEVICE_EVENTS: &[EventId] = &[
    EventId::PeripheralConnected,
    EventId::PeripheralDisconnected,
    EventId::ServicesDiscovered,
    EventId::CharacteristicsDiscovered,
    EventId::CharacteristicValue,
    EventId::CharacteristicWritten,
    EventId::NotificationStateChanged,
    EventId::DescriptorsDiscovered,
    EventId::DescriptorValue,
    EventId::DescriptorWritten,
];

/// Receiver of the events addressed to one remote device.
pub(in crate) trait DeviceHandler: Send + Sync {
    fn handle_event(&self, id: EventId, args: Option<&Value>);

    /// The adapter became permanently unavailable.
    fn adapter_lost(&self, error: &Error);
}

pub struct AdapterSessionBuilder {
    name: Option<String>,
    show_power_alert: bool,
    client_type: i64,
    timeout: Option<Duration>,
}

impl AdapterSessionBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            show_power_alert: false,
            client_type: 0,
            timeout: None,
        }
    }

    /// Client name reported to the daemon. Defaults to `rs-<unix time>`.
    pub fn name(&mut self, v: impl Into<String>) -> &mut Self {
        self.name = Some(v.into());
        self
    }

    pub fn show_power_alert(&mut self, v: bool) -> &mut Self {
        self.show_power_alert = v;
        self
    }

    pub fn client_type(&mut self, v: i64) -> &mut Self {
        self.client_type = v;
        self
    }

    /// Initial operation timeout of the GATT sessions created on this adapter.
    pub fn timeout(&mut self, v: Duration) -> &mut Self {
        self.timeout = Some(v);
        self
    }

    pub fn build(&self, transport: impl Transport + 'static) -> AdapterSession {
        let name = self.name.clone().unwrap_or_else(|| {
            let secs = SystemTime::now().duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("rs-{}", secs)
        });
        AdapterSession::build(Inner {
            transport: Box::new(transport),
            router: EventRouter::new(),
            status: Mutex::new(Status {
                state: AdapterState::Unknown,
                ready: false,
                terminated: false,
            }),
            status_changed: Condvar::new(),
            exclusive: Mutex::new(()),
            devices: Mutex::new(HashMap::new()),
            name,
            show_power_alert: self.show_power_alert,
            client_type: self.client_type,
            timeout: self.timeout,
        })
    }
}

assert_impl_all!(AdapterSessionBuilder: Send, Sync);

struct Status {
    state: AdapterState,
    // Powered on at least once.
    ready: bool,
    terminated: bool,
}

struct Inner {
    transport: Box<dyn Transport>,
    router: EventRouter,
    status: Mutex<Status>,
    status_changed: Condvar,
    exclusive: Mutex<()>,
    devices: Mutex<HashMap<Uuid, Weak<dyn DeviceHandler>>>,
    name: String,
    show_power_alert: bool,
    client_type: i64,
    timeout: Option<Duration>,
}

impl Inner {
    fn on_state_changed(&self, message: &Message) {
        let new_state = message.args.as_ref()
            .and_then(|a| a.get(key::STATE))
            .and_then(Value::as_i64)
            .and_then(AdapterState::from_i64);
        let new_state = match new_state {
            Some(v) => v,
            None => {
                warn!("state change without a valid state: {:?}", message.args);
                return;
            }
        };

        let lost = {
            let mut st = lock(&self.status);
            debug!("adapter state {:?} -> {:?}", st.state, new_state);
            st.state = new_state;
            if new_state == AdapterState::PoweredOn {
                st.ready = true;
            }
            let lost = !st.terminated && new_state.is_fatal(st.ready);
            if lost {
                st.terminated = true;
            }
            self.status_changed.notify_all();
            lost
        };

        if lost {
            error!("bluetooth adapter unavailable: {:?}", new_state);
            let error = Error::adapter_unavailable(format!("bluetooth adapter is {:?}", new_state));
            for device in self.attached_devices() {
                device.adapter_lost(&error);
            }
        }
    }

    fn route_device_event(&self, id: EventId, message: &Message) {
        let args = message.args.as_ref();
        let device_id = args.and_then(|a| a.get(key::DEVICE_UUID)).and_then(Value::as_uuid);
        let device = {
            let devices = lock(&self.devices);
            match device_id {
                Some(device_id) => devices.get(&device_id).and_then(Weak::upgrade),
                // Only unambiguous without the id.
                None if devices.len() == 1 => devices.values().next().and_then(Weak::upgrade),
                None => None,
            }
        };
        match device {
            Some(device) => device.handle_event(id, args),
            None => warn!("dropping {} for unattached device {:?}", id, device_id),
        }
    }

    fn attached_devices(&self) -> Vec<Arc<dyn DeviceHandler>> {
        lock(&self.devices).values().filter_map(Weak::upgrade).collect()
    }
}

/// Handle through which the transport delivers inbound messages.
///
/// Holds the session weakly, so the transport may keep it for as long as it likes.
#[derive(Clone)]
pub struct Dispatcher(Weak<Inner>);

assert_impl_all!(Dispatcher: Send, Sync);

impl Dispatcher {
    /// Must be called once per inbound message, in arrival order.
    pub fn dispatch(&self, tag: u32, args: Option<Value>) {
        self.dispatch_message(Message::new(tag, args));
    }

    pub fn dispatch_message(&self, message: Message) {
        match self.0.upgrade() {
            Some(inner) => inner.router.dispatch(message),
            None => debug!("session dropped, ignoring message {}", message.tag),
        }
    }

    /// Unwraps a `{kCBMsgId, kCBMsgArgs}` dictionary and dispatches it.
    pub fn dispatch_envelope(&self, envelope: &Value) -> Result<(), Error> {
        self.dispatch_message(Message::from_envelope(envelope)?);
        Ok(())
    }
}

/// Connection to the Bluetooth daemon.
///
/// Owns the event router and the adapter power state. Every command except the initial
/// handshake is refused with `AdapterUnavailable` unless the adapter is powered on.
#[derive(Clone)]
pub struct AdapterSession(Arc<Inner>);

assert_impl_all!(AdapterSession: Send, Sync);

impl AdapterSession {
    pub fn new(transport: impl Transport + 'static) -> Self {
        AdapterSessionBuilder::new().build(transport)
    }

    fn build(inner: Inner) -> Self {
        let inner = Arc::new(inner);

        let weak = Arc::downgrade(&inner);
        inner.router.register(EventId::StateChanged, move |m| {
            if let Some(inner) = weak.upgrade() {
                inner.on_state_changed(m);
            }
        });
        for &id in DEVICE_EVENTS {
            let weak = Arc::downgrade(&inner);
            inner.router.register(id, move |m| {
                if let Some(inner) = weak.upgrade() {
                    inner.route_device_event(id, m);
                }
            });
        }

        Self(inner)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher(Arc::downgrade(&self.0))
    }

    /// Sends the init handshake and blocks until the adapter is powered on.
    ///
    /// Fails with `AdapterUnavailable` if the adapter reports it is unsupported,
    /// unauthorized or powered off before coming up.
    pub fn init(&self) -> Result<(), Error> {
        self.init0(None)
    }

    pub fn init_timeout(&self, timeout: Duration) -> Result<(), Error> {
        self.init0(Some(timeout))
    }

    pub fn state(&self) -> AdapterState {
        lock(&self.0.status).state
    }

    pub fn is_powered_on(&self) -> bool {
        self.state() == AdapterState::PoweredOn
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Operation timeout new GATT sessions start with.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.0.timeout
    }

    /// Sends a command, failing without touching the transport if the adapter isn't ready.
    pub fn send(&self, id: CommandId, args: Option<Value>) -> Result<(), Error> {
        self.check_ready()?;
        self.send_ungated(id, args)
    }

    /// Sets the handler for an event id, replacing the previous one. Device events are
    /// routed to [`GattSession`](../gatt/struct.GattSession.html)s by default.
    pub fn register_handler(&self, id: EventId, handler: impl Fn(&Message) + Send + Sync + 'static) {
        self.0.router.register(id, handler);
    }

    /// Runs `f` holding the session-wide exclusive lock, for callers that need several
    /// send and wait pairs to go out without interleaving. Not re-entrant.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = lock(&self.0.exclusive);
        f()
    }

    pub(in crate) fn send_ungated(&self, id: CommandId, args: Option<Value>) -> Result<(), Error> {
        debug!("sending {}", id);
        self.0.transport.send(Message::command(id, args))
    }

    pub(in crate) fn check_ready(&self) -> Result<(), Error> {
        let st = lock(&self.0.status);
        if st.terminated {
            Err(Error::adapter_unavailable(format!("bluetooth adapter is {:?}", st.state)))
        } else if st.state != AdapterState::PoweredOn {
            Err(Error::adapter_unavailable(format!("bluetooth adapter is not powered on ({:?})", st.state)))
        } else {
            Ok(())
        }
    }

    pub(in crate) fn attach(&self, device: Uuid, handler: Weak<dyn DeviceHandler>) {
        let mut devices = lock(&self.0.devices);
        devices.retain(|_, h| h.strong_count() > 0);
        if devices.insert(device, handler).is_some() {
            warn!("replacing session attached for device {}", device);
        }
    }

    /// Forgets sessions that have been dropped.
    pub(in crate) fn prune(&self) {
        lock(&self.0.devices).retain(|_, h| h.strong_count() > 0);
    }

    fn init0(&self, timeout: Option<Duration>) -> Result<(), Error> {
        if lock(&self.0.status).terminated {
            return Err(Error::adapter_unavailable("bluetooth adapter is unavailable"));
        }

        command::Init {
            name: self.0.name.clone(),
            show_power_alert: self.0.show_power_alert,
            client_type: self.0.client_type,
        }.dispatch_ungated(self)?;

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = lock(&self.0.status);
        loop {
            if st.terminated {
                return Err(Error::adapter_unavailable(format!("bluetooth adapter is {:?}", st.state)));
            }
            if st.state == AdapterState::PoweredOn {
                info!("bluetooth adapter ready");
                return Ok(());
            }
            st = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::timeout());
                    }
                    self.0.status_changed.wait_timeout(st, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.0.status_changed.wait(st).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crate::error::ErrorKind;
    use crate::transport::testing::*;

    fn state(daemon: &Daemon, s: i64) {
        daemon.reply(EventId::StateChanged, dict! { key::STATE => s });
    }

    #[test]
    fn init_payload() {
        let (adapter, daemon) = adapter();
        let init = thread::spawn(move || adapter.init());
        let args = daemon.expect(CommandId::Init);
        assert_eq!(args, dict! {
            key::NAME => "test",
            key::OPTIONS => dict! { key::INIT_SHOW_POWER_ALERT => 0 },
            key::TYPE => 0,
        });
        state(&daemon, 5);
        init.join().unwrap().unwrap();
    }

    #[test]
    fn init_waits_through_transient_states() {
        let (adapter, daemon) = adapter();
        let init = {
            let adapter = adapter.clone();
            thread::spawn(move || adapter.init())
        };
        daemon.expect(CommandId::Init);
        state(&daemon, 0);
        state(&daemon, 1);
        state(&daemon, 5);
        init.join().unwrap().unwrap();
        assert!(adapter.is_powered_on());
    }

    #[test]
    fn init_fails_when_unauthorized() {
        let (adapter, daemon) = adapter();
        let init = {
            let adapter = adapter.clone();
            thread::spawn(move || adapter.init())
        };
        daemon.expect(CommandId::Init);
        state(&daemon, 0);
        state(&daemon, 3);
        let err = init.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdapterUnavailable);

        // A later power-on doesn't revive the session.
        state(&daemon, 5);
        let err = adapter.send(CommandId::StartScan, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdapterUnavailable);
        assert_eq!(adapter.init().unwrap_err().kind(), ErrorKind::AdapterUnavailable);
        daemon.assert_idle();
    }

    #[test]
    fn init_timeout() {
        let (adapter, daemon) = adapter();
        let err = adapter.init_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        daemon.expect(CommandId::Init);
    }

    #[test]
    fn commands_gated_on_power() {
        let (adapter, daemon) = powered_on();
        adapter.send(CommandId::StopScan, None).unwrap();
        daemon.expect(CommandId::StopScan);

        // Cycling the adapter is not fatal.
        state(&daemon, 4);
        let err = adapter.send(CommandId::StopScan, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdapterUnavailable);
        daemon.assert_idle();

        state(&daemon, 5);
        adapter.send(CommandId::StopScan, None).unwrap();
        daemon.expect(CommandId::StopScan);
    }

    #[test]
    fn transport_errors_propagate() {
        let (adapter, daemon) = powered_on();
        daemon.set_broken(true);
        let err = adapter.send(CommandId::StopScan, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn custom_handler() {
        let (adapter, daemon) = powered_on();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            adapter.register_handler(EventId::PeripheralDiscovered, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        daemon.reply(EventId::PeripheralDiscovered, dict! {});
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn envelope_dispatch() {
        let (adapter, daemon) = adapter();
        daemon.dispatcher.dispatch_envelope(&dict! {
            key::ID => 6,
            key::ARGS => dict! { key::STATE => 4 },
        }).unwrap();
        assert_eq!(adapter.state(), AdapterState::PoweredOff);
        assert!(daemon.dispatcher.dispatch_envelope(&dict! {}).is_err());
    }

    #[test]
    fn exclusive_section() {
        let (adapter, daemon) = powered_on();
        let r = adapter.exclusive(|| {
            adapter.send(CommandId::StartScan, None)?;
            adapter.send(CommandId::StopScan, None)
        });
        r.unwrap();
        daemon.expect(CommandId::StartScan);
        daemon.expect(CommandId::StopScan);
    }

    #[test]
    fn dispatcher_outliving_session() {
        let (adapter, daemon) = adapter();
        drop(adapter);
        state(&daemon, 5);
    }
}
