//! Message envelope and the closed sets of message ids understood by the daemon.

use crate::error::Error;
use crate::value::{Dict, Value};

/// Field names used in message payloads.
pub mod key {
    pub const ID: &str = "kCBMsgId";
    pub const ARGS: &str = "kCBMsgArgs";

    pub const NAME: &str = "kCBMsgArgName";
    pub const OPTIONS: &str = "kCBMsgArgOptions";
    pub const TYPE: &str = "kCBMsgArgType";
    pub const STATE: &str = "kCBMsgArgState";
    pub const RESULT: &str = "kCBMsgArgResult";
    pub const UUIDS: &str = "kCBMsgArgUUIDs";
    pub const UUID: &str = "kCBMsgArgUUID";
    pub const DEVICE_UUID: &str = "kCBMsgArgDeviceUUID";
    pub const RSSI: &str = "kCBMsgArgRssi";
    pub const ADVERTISEMENT_DATA: &str = "kCBMsgArgAdvertisementData";
    pub const DATA: &str = "kCBMsgArgData";
    pub const IS_NOTIFICATION: &str = "kCBMsgArgIsNotification";

    pub const SERVICES: &str = "kCBMsgArgServices";
    pub const SERVICE_START_HANDLE: &str = "kCBMsgArgServiceStartHandle";
    pub const SERVICE_END_HANDLE: &str = "kCBMsgArgServiceEndHandle";

    pub const CHARACTERISTICS: &str = "kCBMsgArgCharacteristics";
    pub const CHARACTERISTIC_HANDLE: &str = "kCBMsgArgCharacteristicHandle";
    pub const CHARACTERISTIC_VALUE_HANDLE: &str = "kCBMsgArgCharacteristicValueHandle";
    pub const CHARACTERISTIC_PROPERTIES: &str = "kCBMsgArgCharacteristicProperties";

    pub const DESCRIPTORS: &str = "kCBMsgArgDescriptors";
    pub const DESCRIPTOR_HANDLE: &str = "kCBMsgArgDescriptorHandle";

    pub const INIT_SHOW_POWER_ALERT: &str = "kCBInitOptionShowPowerAlert";
    pub const SCAN_ALLOW_DUPLICATES: &str = "kCBScanOptionAllowDuplicates";
    pub const CONNECT_NOTIFY_ON_CONNECTION: &str = "kCBConnectOptionNotifyOnConnection";
    pub const CONNECT_NOTIFY_ON_DISCONNECTION: &str = "kCBConnectOptionNotifyOnDisconnection";
    pub const CONNECT_NOTIFY_ON_NOTIFICATION: &str = "kCBConnectOptionNotifyOnNotification";

    pub const ADV_LOCAL_NAME: &str = "kCBAdvDataLocalName";
    pub const ADV_SERVICE_UUIDS: &str = "kCBAdvDataServiceUUIDs";
    pub const ADV_MANUFACTURER_DATA: &str = "kCBAdvDataManufacturerData";
    pub const ADV_TX_POWER_LEVEL: &str = "kCBAdvDataTxPowerLevel";
    pub const ADV_IS_CONNECTABLE: &str = "kCBAdvDataIsConnectable";
}

message_ids! {
    /// Ids of the commands sent to the daemon.
    pub enum CommandId {
        Init = 1,
        StartScan = 29,
        StopScan = 30,
        Connect = 31,
        Disconnect = 32,
        DiscoverServices = 45,
        DiscoverCharacteristics = 62,
        ReadCharacteristic = 65,
        WriteCharacteristic = 66,
        SetNotifyValue = 67,
        DiscoverDescriptors = 70,
        /// Shared by descriptor reads and writes; a write carries `kCBMsgArgData`.
        ReadWriteDescriptor = 77,
    }
}

message_ids! {
    /// Ids of the events received from the daemon.
    pub enum EventId {
        StateChanged = 6,
        PeripheralDiscovered = 37,
        PeripheralConnected = 38,
        PeripheralDisconnected = 40,
        ServicesDiscovered = 56,
        CharacteristicsDiscovered = 64,
        /// A read response, or a notification when `kCBMsgArgIsNotification` is set.
        CharacteristicValue = 70,
        CharacteristicWritten = 71,
        NotificationStateChanged = 73,
        DescriptorsDiscovered = 76,
        DescriptorValue = 78,
        DescriptorWritten = 79,
    }
}

/// A single tagged message. `args` is `None` when the message carries no payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub tag: u32,
    pub args: Option<Value>,
}

impl Message {
    pub fn new(tag: u32, args: Option<Value>) -> Self {
        Self {
            tag,
            args,
        }
    }

    pub fn command(id: CommandId, args: Option<Value>) -> Self {
        Self::new(id.code(), args)
    }

    pub fn event(id: EventId, args: Option<Value>) -> Self {
        Self::new(id.code(), args)
    }

    /// Wraps the message into the `{kCBMsgId, kCBMsgArgs}` dictionary the daemon expects.
    pub fn to_envelope(&self) -> Value {
        let mut d = Dict::new();
        d.insert(key::ID.into(), Value::from(self.tag));
        if let Some(args) = &self.args {
            d.insert(key::ARGS.into(), args.clone());
        }
        Value::Dict(d)
    }

    pub fn from_envelope(envelope: &Value) -> Result<Self, Error> {
        let tag = envelope.get(key::ID)
            .and_then(Value::as_u32)
            .ok_or_else(|| Error::protocol(format!("envelope without a valid {}", key::ID)))?;
        Ok(Self::new(tag, envelope.get(key::ARGS).cloned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for &id in CommandId::ALL {
            assert_eq!(CommandId::from_code(id.code()), Some(id));
        }
        for &id in EventId::ALL {
            assert_eq!(EventId::from_code(id.code()), Some(id));
        }
        assert_eq!(EventId::from_code(1000), None);
        assert_eq!(EventId::CharacteristicValue.to_string(), "CharacteristicValue(70)");
    }

    #[test]
    fn envelope() {
        let msg = Message::command(CommandId::StopScan, None);
        let env = msg.to_envelope();
        assert_eq!(env, dict! { key::ID => 30u32 });
        assert_eq!(Message::from_envelope(&env).unwrap(), msg);

        let msg = Message::event(EventId::StateChanged, Some(dict! { key::STATE => 5 }));
        assert_eq!(Message::from_envelope(&msg.to_envelope()).unwrap(), msg);

        let err = Message::from_envelope(&dict! { key::ARGS => 1 }).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolViolation);
    }
}
