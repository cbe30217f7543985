//! Finds a Health Thermometer device, subscribes to its temperature measurements and prints
//! a few of them.
//!
//! There is no daemon connection in this crate, so the demo plays the daemon itself: a thread
//! answers every command the way the Bluetooth daemon would for a single fake thermometer.
use anyhow::{anyhow, ensure, Result};
use log::*;
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use blued_gatt::*;
use blued_gatt::dict;
use blued_gatt::error::Error as GattError;
use blued_gatt::gatt::characteristic::CharacteristicRef;
use blued_gatt::message::{CommandId, EventId, Message, key};
use blued_gatt::transport::Transport;
use blued_gatt::uuid::Uuid;
use blued_gatt::value::Value;

const HEALTH_THERMOMETER: [u8; 2] = [0x18, 0x09];
const TEMPERATURE_MEASUREMENT: [u8; 2] = [0x2a, 0x1c];
const DEVICE: [u8; 16] = [0x6d, 0x1b, 0x2e, 0x90, 0x45, 0x0c, 0x4f, 0x3a,
    0xb1, 0x7e, 0x02, 0x9d, 0xc4, 0x58, 0x33, 0x10];

struct Channel(Mutex<mpsc::Sender<Message>>);

impl Transport for Channel {
    fn send(&self, message: Message) -> Result<(), GattError> {
        let _ = self.0.lock().unwrap_or_else(|e| e.into_inner()).send(message);
        Ok(())
    }
}

/// IEEE 11073 32-bit float as carried by the temperature measurement characteristic.
fn encode_temperature(celsius_tenths: i32) -> Vec<u8> {
    let mantissa = celsius_tenths.to_le_bytes();
    vec![0x00, mantissa[0], mantissa[1], mantissa[2], (-1i8) as u8]
}

fn decode_temperature(value: &[u8]) -> Result<f64> {
    ensure!(value.len() >= 5, "short measurement: {}", hex::encode(value));
    let raw = i32::from_le_bytes([value[1], value[2], value[3], 0]);
    let mantissa = (raw << 8) >> 8;
    let exponent = value[4] as i8;
    Ok(mantissa as f64 * 10f64.powi(exponent as i32))
}

fn fake_daemon(commands: mpsc::Receiver<Message>, dispatcher: Dispatcher) {
    let device = Uuid::from_bytes(DEVICE);
    let reply = |id: EventId, args: Value| {
        let mut args = match args {
            Value::Dict(d) => d,
            _ => unreachable!(),
        };
        args.insert(key::DEVICE_UUID.into(), device.into());
        dispatcher.dispatch(id.code(), Some(Value::Dict(args)));
    };

    for command in commands.iter() {
        let id = match CommandId::from_code(command.tag) {
            Some(v) => v,
            None => continue,
        };
        debug!("daemon got {}", id);
        match id {
            CommandId::Init => {
                dispatcher.dispatch(EventId::StateChanged.code(), Some(dict! { key::STATE => 5 }));
            }
            CommandId::StartScan => {
                reply(EventId::PeripheralDiscovered, dict! {
                    key::RSSI => -61,
                    key::ADVERTISEMENT_DATA => dict! {
                        key::ADV_SERVICE_UUIDS => vec![Value::Data(HEALTH_THERMOMETER.to_vec())],
                    },
                });
                // Scan response carrying the name.
                reply(EventId::PeripheralDiscovered, dict! {
                    key::RSSI => -58,
                    key::ADVERTISEMENT_DATA => dict! {
                        key::ADV_LOCAL_NAME => "Thermo",
                    },
                });
            }
            CommandId::Connect => reply(EventId::PeripheralConnected, dict! {}),
            CommandId::Disconnect => reply(EventId::PeripheralDisconnected, dict! {}),
            CommandId::DiscoverServices => {
                reply(EventId::ServicesDiscovered, dict! {
                    key::SERVICES => vec![dict! {
                        key::UUID => HEALTH_THERMOMETER.to_vec(),
                        key::SERVICE_START_HANDLE => 0x0a,
                        key::SERVICE_END_HANDLE => 0x0f,
                    }],
                });
            }
            CommandId::DiscoverCharacteristics => {
                reply(EventId::CharacteristicsDiscovered, dict! {
                    key::CHARACTERISTICS => vec![dict! {
                        key::UUID => TEMPERATURE_MEASUREMENT.to_vec(),
                        key::CHARACTERISTIC_HANDLE => 0x0b,
                        key::CHARACTERISTIC_VALUE_HANDLE => 0x0c,
                        key::CHARACTERISTIC_PROPERTIES => 0x20,
                    }],
                });
            }
            CommandId::SetNotifyValue => {
                reply(EventId::NotificationStateChanged, dict! { key::RESULT => 0 });
                for t in &[366, 368, 371] {
                    thread::sleep(Duration::from_millis(200));
                    reply(EventId::CharacteristicValue, dict! {
                        key::CHARACTERISTIC_HANDLE => 0x0c,
                        key::DATA => encode_temperature(*t),
                        key::IS_NOTIFICATION => 1,
                    });
                }
            }
            CommandId::StopScan => {}
            _ => warn!("daemon ignoring {}", id),
        }
    }
}

pub fn main() -> Result<()> {
    env_logger::init();

    let (tx, commands) = mpsc::channel();
    let adapter = AdapterSessionBuilder::new()
        .name("thermometer-demo")
        .build(Channel(Mutex::new(tx)));
    {
        let dispatcher = adapter.dispatcher();
        thread::spawn(move || fake_daemon(commands, dispatcher));
    }

    adapter.init_timeout(Duration::from_secs(5))?;

    let scanner = ScanCoordinator::new(&adapter);
    let devices = scanner.discover(Duration::from_millis(300))?;
    let (id, device) = devices.into_iter()
        .find(|(_, d)| d.service_uuids().contains(&Uuid::from_slice(&HEALTH_THERMOMETER)))
        .ok_or_else(|| anyhow!("no thermometer found"))?;
    println!("Found {} {} ({} dBm)", id, device.name(), device.rssi());

    let session = GattSession::new(&adapter, id);
    session.set_timeout(Some(Duration::from_secs(5)));
    session.connect()?;

    let service = session.discover_services_with_uuids(&[Uuid::from_slice(&HEALTH_THERMOMETER)])?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no health thermometer service"))?;
    let measurement: CharacteristicRef = session.discover_service_characteristics(&service)?
        .into_iter()
        .find(|c| c.uuid() == Uuid::from_slice(&TEMPERATURE_MEASUREMENT))
        .ok_or_else(|| anyhow!("no temperature measurement characteristic"))?;
    info!("measurement characteristic: {:?}", measurement);

    let notifications = session.notifications();
    session.enable_notifications(&measurement)?;

    for _ in 0..3 {
        let n = notifications.recv_timeout(Duration::from_secs(5))?;
        let now = chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]");
        println!("{} {}: t = {:.1} C (raw {})",
            now, device.name(), decode_temperature(n.value())?, hex::encode(n.value()));
    }

    session.disconnect()?;
    Ok(())
}
