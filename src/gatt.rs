//! GATT client session for one remote device.

pub mod characteristic;
pub mod descriptor;
pub mod service;

use log::*;
use static_assertions::assert_impl_all;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::adapter::{AdapterSession, DeviceHandler};
use crate::command::{self, Command};
use crate::error::{self, Error};
use crate::message::{EventId, key};
use crate::sync::{self, Operation, Receiver, Slot, lock};
use crate::uuid::Uuid;
use crate::value::Value;

use self::characteristic::{CharacteristicRef, WriteKind};
use self::descriptor::DescriptorRef;
use self::service::ServiceRef;

fn field<T>(v: &Value, key: &str, f: impl FnOnce(&Value) -> Option<T>) -> Result<T, Error> {
    let raw = v.get(key).ok_or_else(|| Error::protocol(format!("missing {}", key)))?;
    f(raw).ok_or_else(|| Error::protocol(format!("bad {}: {:?}", key, raw)))
}

/// Decodes the list under `key`. A missing list is empty unless `required`.
fn decode_list<T>(args: &Value, key: &str, required: bool, decode: impl Fn(&Value) -> Result<T, Error>)
    -> Result<Vec<T>, Error>
{
    let list = match args.get(key) {
        Some(v) => v.as_list().ok_or_else(|| Error::protocol(format!("{} is not a list", key)))?,
        None if required => return Err(Error::protocol(format!("missing {}", key))),
        None => return Ok(Vec::new()),
    };
    list.into_iter().map(decode).collect()
}

/// Attribute handle a response is about, if it names one.
fn handle_of(args: Option<&Value>, key: &str) -> Option<u16> {
    args.and_then(|a| a.get(key)).and_then(Value::as_u16)
}

/// Checks the payload of a response for an ATT error, then decodes it.
fn response<T>(id: EventId, args: Option<&Value>, decode: impl FnOnce(&Value) -> Result<T, Error>)
    -> Result<T, Error>
{
    let args = args.ok_or_else(|| Error::protocol(format!("{} without payload", id)))?;
    error::result(args, || decode(args))
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    notify_on_connection: bool,
    notify_on_disconnection: bool,
    notify_on_notification: bool,
    blocking: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            notify_on_connection: false,
            notify_on_disconnection: true,
            notify_on_notification: false,
            blocking: true,
        }
    }
}

impl ConnectOptions {
    /// Ask the system to alert the user when the device connects while the app is suspended.
    pub fn notify_on_connection(mut self, v: bool) -> Self {
        self.notify_on_connection = v;
        self
    }

    pub fn notify_on_disconnection(mut self, v: bool) -> Self {
        self.notify_on_disconnection = v;
        self
    }

    pub fn notify_on_notification(mut self, v: bool) -> Self {
        self.notify_on_notification = v;
        self
    }

    /// Whether `connect` waits for the connection to be established. When `false` the
    /// call returns right after the request is sent and the state stays `Connecting`
    /// until the daemon reports back.
    pub fn blocking(mut self, v: bool) -> Self {
        self.blocking = v;
        self
    }

    pub(in crate) fn to_options_dict(&self) -> Value {
        dict! {
            key::CONNECT_NOTIFY_ON_CONNECTION => self.notify_on_connection as i64,
            key::CONNECT_NOTIFY_ON_DISCONNECTION => self.notify_on_disconnection as i64,
            key::CONNECT_NOTIFY_ON_NOTIFICATION => self.notify_on_notification as i64,
        }
    }
}

/// Any attribute that can be read or written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Attribute {
    Service(ServiceRef),
    Characteristic(CharacteristicRef),
    Descriptor(DescriptorRef),
}

impl From<ServiceRef> for Attribute {
    fn from(v: ServiceRef) -> Self {
        Self::Service(v)
    }
}

impl From<&ServiceRef> for Attribute {
    fn from(v: &ServiceRef) -> Self {
        Self::Service(*v)
    }
}

impl From<CharacteristicRef> for Attribute {
    fn from(v: CharacteristicRef) -> Self {
        Self::Characteristic(v)
    }
}

impl From<&CharacteristicRef> for Attribute {
    fn from(v: &CharacteristicRef) -> Self {
        Self::Characteristic(*v)
    }
}

impl From<DescriptorRef> for Attribute {
    fn from(v: DescriptorRef) -> Self {
        Self::Descriptor(v)
    }
}

impl From<&DescriptorRef> for Attribute {
    fn from(v: &DescriptorRef) -> Self {
        Self::Descriptor(*v)
    }
}

/// A value pushed by the device for a subscribed characteristic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    handle: u16,
    characteristic: Option<CharacteristicRef>,
    value: Vec<u8>,
}

assert_impl_all!(Notification: Send, Sync);

impl Notification {
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The characteristic the handle belongs to, if it was discovered or subscribed
    /// through this session.
    pub fn characteristic(&self) -> Option<&CharacteristicRef> {
        self.characteristic.as_ref()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }
}

type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

#[derive(Default)]
struct Discovered {
    services: Vec<ServiceRef>,
    characteristics: Vec<CharacteristicRef>,
    descriptors: Vec<DescriptorRef>,
}

struct Inner {
    adapter: AdapterSession,
    device: Uuid,
    state: Mutex<ConnectionState>,
    timeout: Mutex<Option<Duration>>,
    // Serializes connect and disconnect.
    connection: Mutex<()>,
    connected: Slot<()>,
    disconnected: Slot<()>,
    services: Operation<Vec<ServiceRef>>,
    characteristics: Operation<Vec<CharacteristicRef>>,
    descriptors: Operation<Vec<DescriptorRef>>,
    // Characteristic and descriptor reads share one slot, as do writes.
    read: Operation<Vec<u8>>,
    write: Operation<()>,
    notify: Operation<()>,
    discovered: Mutex<Discovered>,
    subscriptions: Mutex<Vec<CharacteristicRef>>,
    on_notification: RwLock<Option<NotificationHandler>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn timeout(&self) -> Option<Duration> {
        *lock(&self.timeout)
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(Error::not_connected())
        }
    }

    fn characteristic_cmd(&self, characteristic: &CharacteristicRef) -> command::Characteristic {
        command::Characteristic {
            device: self.device,
            handle: characteristic.handle(),
            value_handle: characteristic.value_handle(),
        }
    }

    /// Sends `command` and waits for the response on `op`, with at most one request of
    /// the kind in flight. `handles` are the attribute handles the request is about.
    fn request<T, C: Command>(&self, op: &Operation<T>, handles: &[u16], command: C) -> Result<T, Error> {
        let _guard = op.lock();
        self.ensure_connected()?;
        let ticket = op.slot.arm_for(handles);
        // A disconnect that slipped in before arming has already failed the slot.
        let sent = self.ensure_connected().and_then(|_| command.dispatch(&self.adapter));
        if let Err(e) = sent {
            op.slot.withdraw(ticket);
            return Err(e);
        }
        op.slot.wait(ticket, self.timeout())
    }

    fn fail_pending(&self, error: &Error) {
        self.connected.fail(error.clone());
        self.services.slot.fail(error.clone());
        self.characteristics.slot.fail(error.clone());
        self.descriptors.slot.fail(error.clone());
        self.read.slot.fail(error.clone());
        self.write.slot.fail(error.clone());
        self.notify.slot.fail(error.clone());
    }

    fn on_connected(&self, args: Option<&Value>) {
        let result = args.map_or(Ok(()), |a| error::result(a, || Ok(())));
        {
            let mut state = lock(&self.state);
            if *state != ConnectionState::Connecting {
                debug!("{}: ignoring connect event in state {:?}", self.device, *state);
                return;
            }
            *state = match result {
                Ok(()) => ConnectionState::Connected,
                Err(_) => ConnectionState::Disconnected,
            };
        }
        match &result {
            Ok(()) => info!("{}: connected", self.device),
            Err(e) => warn!("{}: connection failed: {}", self.device, e),
        }
        self.connected.complete(None, result);
    }

    fn on_disconnected(&self) {
        let prev = std::mem::replace(&mut *lock(&self.state), ConnectionState::Disconnected);
        match prev {
            ConnectionState::Connected => warn!("{}: disconnected by peer", self.device),
            ConnectionState::Connecting => warn!("{}: connection attempt failed", self.device),
            ConnectionState::Disconnecting => info!("{}: disconnected", self.device),
            ConnectionState::Disconnected => debug!("{}: spurious disconnect event", self.device),
        }
        lock(&self.subscriptions).clear();
        self.disconnected.complete(None, Ok(()));
        self.fail_pending(&Error::peer_disconnected());
    }

    fn on_characteristic_value(&self, args: Option<&Value>) {
        // Without the flag the value is a read response.
        let is_notification = args
            .and_then(|a| a.get(key::IS_NOTIFICATION))
            .map_or(false, |v| v.as_bool().unwrap_or(true));
        if is_notification {
            if let Some(args) = args {
                self.on_notification(args);
            }
        } else {
            let handle = handle_of(args, key::CHARACTERISTIC_HANDLE);
            self.read.slot.complete(handle, response(EventId::CharacteristicValue, args, |a| {
                field(a, key::DATA, |v| v.as_bytes().map(|b| b.to_vec()))
            }));
        }
    }

    fn on_notification(&self, args: &Value) {
        let handle = args.get(key::CHARACTERISTIC_HANDLE).and_then(Value::as_u16);
        let value = args.get(key::DATA).and_then(Value::as_bytes);
        let (handle, value) = match (handle, value) {
            (Some(h), Some(v)) => (h, v.to_vec()),
            _ => {
                warn!("{}: dropping malformed notification: {:?}", self.device, args);
                return;
            }
        };

        let characteristic = lock(&self.subscriptions).iter()
            .find(|c| c.has_handle(handle))
            .copied()
            .or_else(|| lock(&self.discovered).characteristics.iter()
                .find(|c| c.has_handle(handle))
                .copied());

        let handler = self.on_notification.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(Notification {
                handle,
                characteristic,
                value,
            }),
            None => debug!("{}: no notification handler, dropping value for handle {}", self.device, handle),
        }
    }
}

impl DeviceHandler for Inner {
    fn handle_event(&self, id: EventId, args: Option<&Value>) {
        trace!("{}: {} {:?}", self.device, id, args);
        match id {
            EventId::PeripheralConnected => self.on_connected(args),
            EventId::PeripheralDisconnected => self.on_disconnected(),
            EventId::ServicesDiscovered => {
                self.services.slot.complete(None, response(id, args, |a| {
                    decode_list(a, key::SERVICES, false, ServiceRef::from_value)
                }));
            }
            EventId::CharacteristicsDiscovered => {
                let handle = handle_of(args, key::SERVICE_START_HANDLE);
                self.characteristics.slot.complete(handle, response(id, args, |a| {
                    decode_list(a, key::CHARACTERISTICS, true, CharacteristicRef::from_value)
                }));
            }
            EventId::DescriptorsDiscovered => {
                let handle = handle_of(args, key::CHARACTERISTIC_HANDLE);
                self.descriptors.slot.complete(handle, response(id, args, |a| {
                    decode_list(a, key::DESCRIPTORS, true, DescriptorRef::from_value)
                }));
            }
            EventId::CharacteristicValue => self.on_characteristic_value(args),
            EventId::DescriptorValue => {
                let handle = handle_of(args, key::DESCRIPTOR_HANDLE);
                self.read.slot.complete(handle, response(id, args, |a| {
                    field(a, key::DATA, |v| v.as_bytes().map(|b| b.to_vec()))
                }));
            }
            EventId::CharacteristicWritten => {
                let handle = handle_of(args, key::CHARACTERISTIC_HANDLE);
                self.write.slot.complete(handle, response(id, args, |_| Ok(())));
            }
            EventId::DescriptorWritten => {
                let handle = handle_of(args, key::DESCRIPTOR_HANDLE);
                self.write.slot.complete(handle, response(id, args, |_| Ok(())));
            }
            EventId::NotificationStateChanged => {
                let handle = handle_of(args, key::CHARACTERISTIC_HANDLE);
                self.notify.slot.complete(handle, response(id, args, |_| Ok(())));
            }
            EventId::StateChanged | EventId::PeripheralDiscovered => {
                debug!("{}: ignoring {}", self.device, id);
            }
        }
    }

    fn adapter_lost(&self, error: &Error) {
        *lock(&self.state) = ConnectionState::Disconnected;
        lock(&self.subscriptions).clear();
        self.disconnected.fail(error.clone());
        self.fail_pending(error);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.adapter.prune();
    }
}

/// GATT client session with one remote device.
///
/// Every operation blocks until the daemon answers, the device disconnects, or the session
/// timeout elapses. At most one operation of each kind is in flight: a second caller waits
/// for the first to resolve before its request goes out. Operations of different kinds may
/// overlap.
#[derive(Clone)]
pub struct GattSession(Arc<Inner>);

assert_impl_all!(GattSession: Send, Sync);

impl GattSession {
    /// Creates a session for `device` and attaches it to `adapter` so it receives the
    /// device's events. A later session for the same device replaces this one.
    pub fn new(adapter: &AdapterSession, device: Uuid) -> Self {
        let inner = Arc::new(Inner {
            adapter: adapter.clone(),
            device,
            state: Mutex::new(ConnectionState::Disconnected),
            timeout: Mutex::new(adapter.default_timeout()),
            connection: Mutex::new(()),
            connected: Slot::new(),
            disconnected: Slot::new(),
            services: Operation::new(),
            characteristics: Operation::new(),
            descriptors: Operation::new(),
            read: Operation::new(),
            write: Operation::new(),
            notify: Operation::new(),
            discovered: Mutex::new(Discovered::default()),
            subscriptions: Mutex::new(Vec::new()),
            on_notification: RwLock::new(None),
        });
        let handler: Arc<dyn DeviceHandler> = inner.clone();
        adapter.attach(device, Arc::downgrade(&handler));
        Self(inner)
    }

    pub fn device_id(&self) -> Uuid {
        self.0.device
    }

    pub fn state(&self) -> ConnectionState {
        self.0.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Limits how long each operation waits for the daemon. `None` waits indefinitely.
    /// Starts out as the adapter's default timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *lock(&self.0.timeout) = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.0.timeout()
    }

    pub fn connect(&self) -> Result<(), Error> {
        self.connect_with_options(&ConnectOptions::default())
    }

    /// Connects to the device. Succeeds immediately if already connected.
    ///
    /// If the attempt times out the pending connection is cancelled and the session is left
    /// disconnected.
    pub fn connect_with_options(&self, options: &ConnectOptions) -> Result<(), Error> {
        let inner = &*self.0;
        let _guard = lock(&inner.connection);

        let send = {
            let mut state = lock(&inner.state);
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnecting => {
                    return Err(Error::new(error::ErrorKind::NotConnected, "disconnect in progress"));
                }
                // A non-blocking connect is still pending.
                ConnectionState::Connecting => false,
                ConnectionState::Disconnected => {
                    *state = ConnectionState::Connecting;
                    true
                }
            }
        };

        let ticket = if options.blocking {
            Some(inner.connected.arm())
        } else {
            None
        };

        if send {
            info!("{}: connecting", inner.device);
            let sent = command::Connect {
                device: inner.device,
                options,
            }.dispatch(&inner.adapter);
            if let Err(e) = sent {
                if let Some(ticket) = ticket {
                    inner.connected.withdraw(ticket);
                }
                *lock(&inner.state) = ConnectionState::Disconnected;
                return Err(e);
            }
        } else if let Some(ticket) = ticket {
            let state = inner.state();
            if state != ConnectionState::Connecting {
                inner.connected.withdraw(ticket);
                return if state == ConnectionState::Connected {
                    Ok(())
                } else {
                    Err(Error::peer_disconnected())
                };
            }
        }

        let ticket = match ticket {
            Some(v) => v,
            None => return Ok(()),
        };
        match inner.connected.wait(ticket, inner.timeout()) {
            Err(e) if e.kind() == error::ErrorKind::Timeout => {
                let cancel = {
                    let mut state = lock(&inner.state);
                    match *state {
                        // Confirmed just as the wait ran out.
                        ConnectionState::Connected => return Ok(()),
                        ConnectionState::Connecting => {
                            *state = ConnectionState::Disconnected;
                            true
                        }
                        _ => false,
                    }
                };
                if cancel {
                    warn!("{}: connect timed out, cancelling", inner.device);
                    if let Err(e) = (command::Disconnect { device: inner.device }).dispatch(&inner.adapter) {
                        warn!("{}: couldn't cancel connection: {}", inner.device, e);
                    }
                }
                // Connect events are only taken while connecting, so the cancelled attempt
                // is never answered through the slot.
                inner.connected.forget();
                Err(e)
            }
            r => r,
        }
    }

    /// Disconnects and waits for the daemon to confirm. Succeeds immediately if not connected.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.disconnect0(true)
    }

    /// Requests a disconnect without waiting for the confirmation.
    pub fn start_disconnect(&self) -> Result<(), Error> {
        self.disconnect0(false)
    }

    /// Discovers all primary services of the device.
    pub fn discover_services(&self) -> Result<Vec<ServiceRef>, Error> {
        self.discover_services_with_uuids(&[])
    }

    /// Discovers the primary services matching `uuids`, or all of them if `uuids` is empty.
    pub fn discover_services_with_uuids(&self, uuids: &[Uuid]) -> Result<Vec<ServiceRef>, Error> {
        let inner = &*self.0;
        let services = inner.request(&inner.services, &[], command::DiscoverServices {
            device: inner.device,
            uuids,
        })?;
        debug!("{}: discovered {} services", inner.device, services.len());
        lock(&inner.discovered).services = services.clone();
        Ok(services)
    }

    /// Discovers the characteristics declared in the handle range.
    pub fn discover_characteristics(&self, start_handle: u16, end_handle: u16)
        -> Result<Vec<CharacteristicRef>, Error>
    {
        self.discover_characteristics_with_uuids(start_handle, end_handle, &[])
    }

    pub fn discover_characteristics_with_uuids(&self, start_handle: u16, end_handle: u16, uuids: &[Uuid])
        -> Result<Vec<CharacteristicRef>, Error>
    {
        let inner = &*self.0;
        let characteristics = inner.request(&inner.characteristics, &[start_handle], command::DiscoverCharacteristics {
            device: inner.device,
            start_handle,
            end_handle,
            uuids,
        })?;
        debug!("{}: discovered {} characteristics in {}..={}",
            inner.device, characteristics.len(), start_handle, end_handle);
        lock(&inner.discovered).characteristics = characteristics.clone();
        Ok(characteristics)
    }

    /// Discovers every characteristic of `service`.
    pub fn discover_service_characteristics(&self, service: &ServiceRef)
        -> Result<Vec<CharacteristicRef>, Error>
    {
        self.discover_characteristics(service.start_handle(), service.end_handle())
    }

    pub fn discover_descriptors(&self, characteristic: &CharacteristicRef)
        -> Result<Vec<DescriptorRef>, Error>
    {
        let inner = &*self.0;
        let descriptors = inner.request(&inner.descriptors, &characteristic.handles(),
            command::DiscoverDescriptors(inner.characteristic_cmd(characteristic)))?;
        lock(&inner.discovered).descriptors = descriptors.clone();
        Ok(descriptors)
    }

    /// Result of the last successful service discovery.
    pub fn services(&self) -> Vec<ServiceRef> {
        lock(&self.0.discovered).services.clone()
    }

    /// Result of the last successful characteristic discovery.
    pub fn characteristics(&self) -> Vec<CharacteristicRef> {
        lock(&self.0.discovered).characteristics.clone()
    }

    /// Result of the last successful descriptor discovery.
    pub fn descriptors(&self) -> Vec<DescriptorRef> {
        lock(&self.0.discovered).descriptors.clone()
    }

    /// Reads the value of a characteristic or descriptor.
    pub fn read(&self, attribute: impl Into<Attribute>) -> Result<Vec<u8>, Error> {
        let inner = &*self.0;
        match attribute.into() {
            Attribute::Characteristic(c) => {
                inner.request(&inner.read, &c.handles(), command::ReadCharacteristic(inner.characteristic_cmd(&c)))
            }
            Attribute::Descriptor(d) => {
                inner.request(&inner.read, &[d.handle()], command::ReadDescriptor {
                    device: inner.device,
                    handle: d.handle(),
                })
            }
            Attribute::Service(s) => Err(Error::invalid_attribute(format!("can't read service {}", s.uuid()))),
        }
    }

    /// Writes the value of a characteristic or descriptor.
    ///
    /// With `with_response` set to `false` a characteristic write is sent without waiting
    /// for anything. Descriptor writes always wait for the confirmation.
    pub fn write(&self, attribute: impl Into<Attribute>, value: &[u8], with_response: bool) -> Result<(), Error> {
        let inner = &*self.0;
        match attribute.into() {
            Attribute::Characteristic(c) => {
                let kind = if with_response {
                    WriteKind::WithResponse
                } else {
                    WriteKind::WithoutResponse
                };
                let cmd = command::WriteCharacteristic {
                    characteristic: inner.characteristic_cmd(&c),
                    value: value.to_vec(),
                    kind,
                };
                if with_response {
                    inner.request(&inner.write, &c.handles(), cmd)
                } else {
                    inner.ensure_connected()?;
                    cmd.dispatch(&inner.adapter)
                }
            }
            Attribute::Descriptor(d) => {
                inner.request(&inner.write, &[d.handle()], command::WriteDescriptor {
                    device: inner.device,
                    handle: d.handle(),
                    value: value.to_vec(),
                })
            }
            Attribute::Service(s) => Err(Error::invalid_attribute(format!("can't write service {}", s.uuid()))),
        }
    }

    /// Writes a characteristic value without waiting for a confirmation.
    /// Descriptors can't be written this way.
    pub fn write_without_response(&self, attribute: impl Into<Attribute>, value: &[u8]) -> Result<(), Error> {
        match attribute.into() {
            Attribute::Characteristic(c) => self.write(c, value, false),
            Attribute::Descriptor(d) => Err(Error::invalid_attribute(
                format!("descriptor {} can only be written with a response", d.uuid()))),
            Attribute::Service(s) => Err(Error::invalid_attribute(format!("can't write service {}", s.uuid()))),
        }
    }

    /// Subscribes to value changes of `characteristic`, which must support notifications
    /// or indications. Values are delivered to the handler set with
    /// [`on_notification`](#method.on_notification).
    pub fn enable_notifications(&self, characteristic: &CharacteristicRef) -> Result<(), Error> {
        self.set_notify(characteristic, true)
    }

    pub fn disable_notifications(&self, characteristic: &CharacteristicRef) -> Result<(), Error> {
        self.set_notify(characteristic, false)
    }

    /// Sets the notification handler, replacing the previous one. The handler runs on the
    /// transport's delivery thread and must not block on this session.
    pub fn on_notification(&self, handler: impl Fn(Notification) + Send + Sync + 'static) {
        *self.0.on_notification.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    /// Replaces the notification handler with one feeding the returned channel.
    pub fn notifications(&self) -> Receiver<Notification> {
        let (tx, rx) = sync::channel();
        let tx = Mutex::new(tx);
        self.on_notification(move |n| {
            let _ = lock(&tx).send(n);
        });
        rx
    }

    /// Characteristics with notifications currently enabled.
    pub fn subscriptions(&self) -> Vec<CharacteristicRef> {
        lock(&self.0.subscriptions).clone()
    }

    fn set_notify(&self, characteristic: &CharacteristicRef, enabled: bool) -> Result<(), Error> {
        if !characteristic.properties().can_subscribe() {
            return Err(Error::invalid_attribute(
                format!("characteristic {} supports neither notify nor indicate", characteristic.uuid())));
        }
        let inner = &*self.0;
        inner.request(&inner.notify, &characteristic.handles(), command::SetNotifyValue {
            characteristic: inner.characteristic_cmd(characteristic),
            enabled,
        })?;

        let mut subscriptions = lock(&inner.subscriptions);
        subscriptions.retain(|c| c != characteristic);
        if enabled {
            subscriptions.push(*characteristic);
        }
        Ok(())
    }

    fn disconnect0(&self, block: bool) -> Result<(), Error> {
        let inner = &*self.0;
        let _guard = lock(&inner.connection);

        let prev = {
            let mut state = lock(&inner.state);
            let prev = *state;
            match prev {
                ConnectionState::Disconnected => return Ok(()),
                ConnectionState::Disconnecting => {}
                ConnectionState::Connecting | ConnectionState::Connected => {
                    *state = ConnectionState::Disconnecting;
                }
            }
            prev
        };

        let ticket = if block {
            Some(inner.disconnected.arm())
        } else {
            None
        };

        if prev != ConnectionState::Disconnecting {
            info!("{}: disconnecting", inner.device);
            if let Err(e) = (command::Disconnect { device: inner.device }).dispatch(&inner.adapter) {
                if let Some(ticket) = ticket {
                    inner.disconnected.withdraw(ticket);
                }
                let mut state = lock(&inner.state);
                if *state == ConnectionState::Disconnecting {
                    *state = prev;
                }
                return Err(e);
            }
        } else if let Some(ticket) = ticket {
            if inner.state() != ConnectionState::Disconnecting {
                inner.disconnected.withdraw(ticket);
                return Ok(());
            }
        }

        let ticket = match ticket {
            Some(v) => v,
            None => return Ok(()),
        };
        let r = inner.disconnected.wait(ticket, inner.timeout());
        if let Err(e) = &r {
            if e.kind() == error::ErrorKind::Timeout {
                warn!("{}: no disconnect confirmation, dropping the link locally", inner.device);
                *lock(&inner.state) = ConnectionState::Disconnected;
                lock(&inner.subscriptions).clear();
                inner.fail_pending(&Error::peer_disconnected());
            }
        }
        r
    }
}
