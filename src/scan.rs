use log::*;
use static_assertions::assert_impl_all;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::adapter::AdapterSession;
use crate::command::{self, Command};
use crate::error::Error;
use crate::message::{EventId, Message, key};
use crate::sync::lock;
use crate::uuid::Uuid;
use crate::value::Value;

#[derive(Clone, Debug)]
pub struct ScanOptions {
    allow_duplicates: bool,
    service_uuids: Vec<Uuid>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            allow_duplicates: true,
            service_uuids: Vec::new(),
        }
    }
}

impl ScanOptions {
    /// Report every advertisement rather than once per device. On by default so that
    /// partial advertisements can be merged.
    pub fn allow_duplicates(mut self, v: bool) -> Self {
        self.allow_duplicates = v;
        self
    }

    /// Only report devices advertising one of these services. Empty means all devices.
    pub fn services(mut self, uuids: &[Uuid]) -> Self {
        self.service_uuids.extend_from_slice(uuids);
        self
    }

    pub(in crate) fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    pub(in crate) fn to_options_dict(&self) -> Value {
        dict! {
            key::SCAN_ALLOW_DUPLICATES => self.allow_duplicates as i64,
        }
    }
}

assert_impl_all!(ScanOptions: Send, Sync);

/// The fields of a single advertisement event. Absent fields are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdvertisementData {
    local_name: Option<String>,
    service_uuids: Option<Vec<Uuid>>,
    manufacturer_data: Option<Vec<u8>>,
    tx_power_level: Option<i32>,
    connectable: Option<bool>,
    rssi: Option<i32>,
}

impl AdvertisementData {
    pub(in crate) fn from_args(args: &Value) -> Self {
        let empty = Value::Dict(Default::default());
        let ad = args.get(key::ADVERTISEMENT_DATA).unwrap_or(&empty);

        // The advertised name wins over the name the daemon remembers for the device.
        let local_name = ad.get(key::ADV_LOCAL_NAME)
            .or_else(|| ad.get(key::NAME))
            .or_else(|| args.get(key::NAME))
            .and_then(Value::as_str)
            .map(|v| v.to_owned());
        let service_uuids = ad.get(key::ADV_SERVICE_UUIDS)
            .and_then(Value::as_list)
            .map(|list| list.into_iter()
                .filter_map(|v| {
                    let uuid = v.as_uuid();
                    if uuid.is_none() {
                        warn!("skipping malformed service UUID {:?}", v);
                    }
                    uuid
                })
                .collect());
        let manufacturer_data = ad.get(key::ADV_MANUFACTURER_DATA)
            .and_then(Value::as_bytes)
            .map(|v| v.to_owned());
        let tx_power_level = ad.get(key::ADV_TX_POWER_LEVEL)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok());
        let connectable = ad.get(key::ADV_IS_CONNECTABLE)
            .and_then(Value::as_bool);
        let rssi = args.get(key::RSSI)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok());
        Self {
            local_name,
            service_uuids,
            manufacturer_data,
            tx_power_level,
            connectable,
            rssi,
        }
    }

    /// The local name of a peripheral.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_ref().map(|v| v.as_str())
    }

    pub fn service_uuids(&self) -> Option<&[Uuid]> {
        self.service_uuids.as_ref().map(|v| v.as_slice())
    }

    /// The manufacturer data of a peripheral.
    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_ref().map(|v| v.as_slice())
    }

    /// The transmit power of a peripheral.
    pub fn tx_power_level(&self) -> Option<i32> {
        self.tx_power_level
    }

    pub fn is_connectable(&self) -> Option<bool> {
        self.connectable
    }

    pub fn rssi(&self) -> Option<i32> {
        self.rssi
    }
}

/// Everything learned about one device during a scan.
///
/// Each advertisement only overwrites the fields it carries, so the record holds the
/// last known value of every field.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredDevice {
    name: String,
    service_uuids: Vec<Uuid>,
    flags: u32,
    appearance: u32,
    rssi: i32,
    manufacturer_data: Option<Vec<u8>>,
    tx_power_level: Option<i32>,
    connectable: Option<bool>,
}

assert_impl_all!(DiscoveredDevice: Send, Sync);

impl Default for DiscoveredDevice {
    fn default() -> Self {
        Self {
            name: "(unknown)".into(),
            service_uuids: Vec::new(),
            flags: 0,
            appearance: 0,
            rssi: 0,
            manufacturer_data: None,
            tx_power_level: None,
            connectable: None,
        }
    }
}

impl DiscoveredDevice {
    pub fn merge(&mut self, ad: &AdvertisementData) {
        if let Some(v) = &ad.local_name {
            self.name = v.clone();
        }
        if let Some(v) = &ad.service_uuids {
            self.service_uuids = v.clone();
        }
        if let Some(v) = &ad.manufacturer_data {
            self.manufacturer_data = Some(v.clone());
        }
        if let Some(v) = ad.tx_power_level {
            self.tx_power_level = Some(v);
        }
        if let Some(v) = ad.connectable {
            self.connectable = Some(v);
        }
        if let Some(v) = ad.rssi {
            self.rssi = v;
        }
    }

    /// Advertised name, `(unknown)` until one is seen.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn appearance(&self) -> u32 {
        self.appearance
    }

    /// Signal strength of the latest advertisement that reported one, 0 if none did.
    pub fn rssi(&self) -> i32 {
        self.rssi
    }

    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_ref().map(|v| v.as_slice())
    }

    pub fn tx_power_level(&self) -> Option<i32> {
        self.tx_power_level
    }

    pub fn is_connectable(&self) -> Option<bool> {
        self.connectable
    }
}

type Devices = Arc<Mutex<HashMap<Uuid, DiscoveredDevice>>>;

/// Starts and stops scans and accumulates the advertisements seen in between.
///
/// Takes over the advertisement event handler of the adapter; only one coordinator per
/// adapter receives advertisements.
pub struct ScanCoordinator {
    adapter: AdapterSession,
    devices: Devices,
}

assert_impl_all!(ScanCoordinator: Send, Sync);

impl ScanCoordinator {
    pub fn new(adapter: &AdapterSession) -> Self {
        let devices = Devices::default();
        {
            let devices = devices.clone();
            adapter.register_handler(EventId::PeripheralDiscovered, move |m| {
                Self::on_discovered(&devices, m);
            });
        }
        Self {
            adapter: adapter.clone(),
            devices,
        }
    }

    /// Scans for all devices, reporting duplicate advertisements.
    pub fn start_scan(&self) -> Result<(), Error> {
        self.start_scan_with_options(&ScanOptions::default())
    }

    /// Starts a new scan session, forgetting the devices from the previous one.
    pub fn start_scan_with_options(&self, options: &ScanOptions) -> Result<(), Error> {
        lock(&self.devices).clear();
        command::Scan {
            options,
        }.dispatch(&self.adapter)
    }

    pub fn stop_scan(&self) -> Result<(), Error> {
        command::StopScan.dispatch(&self.adapter)
    }

    /// Scans for `duration` and returns every device seen.
    ///
    /// Only the calling thread sleeps; advertisements keep being merged while it waits.
    pub fn discover(&self, duration: Duration) -> Result<HashMap<Uuid, DiscoveredDevice>, Error> {
        self.start_scan()?;
        thread::sleep(duration);
        self.stop_scan()?;
        Ok(self.devices())
    }

    /// Snapshot of the devices seen in the current scan session.
    pub fn devices(&self) -> HashMap<Uuid, DiscoveredDevice> {
        lock(&self.devices).clone()
    }

    pub fn device(&self, id: Uuid) -> Option<DiscoveredDevice> {
        lock(&self.devices).get(&id).cloned()
    }

    fn on_discovered(devices: &Devices, message: &Message) {
        let args = match &message.args {
            Some(v) => v,
            None => {
                warn!("advertisement without payload");
                return;
            }
        };
        let id = match args.get(key::DEVICE_UUID).and_then(Value::as_uuid) {
            Some(v) => v,
            None => {
                warn!("advertisement without a valid device UUID: {:?}", args);
                return;
            }
        };
        let ad = AdvertisementData::from_args(args);
        trace!("advertisement from {}: {:?}", id, ad);
        lock(devices).entry(id)
            .or_insert_with(DiscoveredDevice::default)
            .merge(&ad);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    use crate::error::ErrorKind;
    use crate::message::CommandId;
    use crate::transport::testing::*;

    fn device() -> [u8; 16] {
        hex!("4e6a1c2f0b3d4a559c1e77a0c3b2d901")
    }

    fn advertisement(ad: Value) -> Value {
        dict! {
            key::DEVICE_UUID => Value::Data(device().to_vec()),
            key::RSSI => -60,
            key::ADVERTISEMENT_DATA => ad,
        }
    }

    #[test]
    fn merge_keeps_last_non_null() {
        let x = Uuid::from_slice(&[0x18, 0x0f]);
        let mut device = DiscoveredDevice::default();
        device.merge(&AdvertisementData::from_args(&advertisement(dict! {
            key::ADV_LOCAL_NAME => "A",
        })));
        device.merge(&AdvertisementData::from_args(&advertisement(dict! {
            key::ADV_SERVICE_UUIDS => vec![Value::Data(x.shorten().to_vec())],
        })));
        device.merge(&AdvertisementData::from_args(&advertisement(dict! {})));

        assert_eq!(device.name(), "A");
        assert_eq!(device.service_uuids(), &[x]);
        assert_eq!(device.rssi(), -60);
        assert_eq!(device.flags(), 0);
        assert_eq!(device.appearance(), 0);
    }

    #[test]
    fn name_fallback() {
        let ad = AdvertisementData::from_args(&advertisement(dict! {
            key::NAME => "cached",
        }));
        assert_eq!(ad.local_name(), Some("cached"));

        let ad = AdvertisementData::from_args(&advertisement(dict! {
            key::NAME => "cached",
            key::ADV_LOCAL_NAME => "advertised",
        }));
        assert_eq!(ad.local_name(), Some("advertised"));
    }

    #[test]
    fn missing_rssi_and_data() {
        let ad = AdvertisementData::from_args(&dict! {
            key::DEVICE_UUID => Value::Data(device().to_vec()),
        });
        assert_eq!(ad, AdvertisementData::default());

        let mut device = DiscoveredDevice::default();
        device.merge(&ad);
        assert_eq!(device, DiscoveredDevice::default());
        assert_eq!(device.name(), "(unknown)");
    }

    #[test]
    fn out_of_range_numbers_are_absent() {
        let huge = Value::Int(1 << 40);
        let ad = AdvertisementData::from_args(&dict! {
            key::DEVICE_UUID => Value::Data(device().to_vec()),
            key::RSSI => huge.clone(),
            key::ADVERTISEMENT_DATA => dict! {
                key::ADV_TX_POWER_LEVEL => huge,
            },
        });
        assert_eq!(ad.rssi(), None);
        assert_eq!(ad.tx_power_level(), None);

        let mut device = DiscoveredDevice::default();
        device.merge(&AdvertisementData::from_args(&advertisement(dict! {
            key::ADV_TX_POWER_LEVEL => -4,
        })));
        device.merge(&ad);
        assert_eq!(device.rssi(), -60);
        assert_eq!(device.tx_power_level(), Some(-4));
    }

    #[test]
    fn extra_fields() {
        let ad = AdvertisementData::from_args(&advertisement(dict! {
            key::ADV_MANUFACTURER_DATA => hex!("4c000215").to_vec(),
            key::ADV_TX_POWER_LEVEL => -4,
            key::ADV_IS_CONNECTABLE => 1,
        }));
        assert_eq!(ad.manufacturer_data(), Some(&hex!("4c000215")[..]));
        assert_eq!(ad.tx_power_level(), Some(-4));
        assert_eq!(ad.is_connectable(), Some(true));
        assert_eq!(ad.rssi(), Some(-60));
    }

    #[test]
    fn discover_collects_advertisements() {
        let (adapter, daemon) = powered_on();
        let scanner = Arc::new(ScanCoordinator::new(&adapter));
        let discover = {
            let scanner = scanner.clone();
            thread::spawn(move || scanner.discover(Duration::from_millis(200)))
        };

        let args = daemon.expect(CommandId::StartScan);
        assert_eq!(args, dict! {
            key::OPTIONS => dict! { key::SCAN_ALLOW_DUPLICATES => 1 },
            key::UUIDS => Vec::<Value>::new(),
        });
        daemon.reply(EventId::PeripheralDiscovered, advertisement(dict! {
            key::ADV_LOCAL_NAME => "Thermo",
        }));
        daemon.reply(EventId::PeripheralDiscovered, advertisement(dict! {}));
        // No device id: dropped.
        daemon.reply(EventId::PeripheralDiscovered, dict! { key::RSSI => -1 });
        daemon.expect(CommandId::StopScan);

        let devices = discover.join().unwrap().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[&Uuid::from_bytes(device())].name(), "Thermo");
    }

    #[test]
    fn new_scan_forgets_devices() {
        let (adapter, daemon) = powered_on();
        let scanner = ScanCoordinator::new(&adapter);
        scanner.start_scan().unwrap();
        daemon.reply(EventId::PeripheralDiscovered, advertisement(dict! {}));
        assert!(scanner.device(Uuid::from_bytes(device())).is_some());

        scanner.start_scan_with_options(&ScanOptions::default()
            .allow_duplicates(false)
            .services(&[Uuid::from_slice(&[0x18, 0x0f])])).unwrap();
        assert!(scanner.devices().is_empty());

        daemon.expect(CommandId::StartScan);
        let args = daemon.expect(CommandId::StartScan);
        assert_eq!(args.get(key::OPTIONS), Some(&dict! { key::SCAN_ALLOW_DUPLICATES => 0 }));
        assert_eq!(args.get(key::UUIDS), Some(&Value::Array(vec![Value::Data(vec![0x18, 0x0f])])));
    }

    #[test]
    fn scan_requires_power() {
        let (adapter, daemon) = adapter();
        let scanner = ScanCoordinator::new(&adapter);
        assert_eq!(scanner.start_scan().unwrap_err().kind(), ErrorKind::AdapterUnavailable);
        daemon.assert_idle();
    }
}
