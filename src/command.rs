use crate::adapter::AdapterSession;
use crate::error::Error;
use crate::gatt::ConnectOptions;
use crate::gatt::characteristic::WriteKind;
use crate::message::{CommandId, key};
use crate::scan::ScanOptions;
use crate::uuid::Uuid;
use crate::value::Value;

macro_rules! impl_command {
    ($ctx_ty:ident ( $ctx:ident ) => $id:ident { $($k:ident : $v:expr,)* }) => {
        impl Command for $ctx_ty {
            const ID: CommandId = CommandId::$id;

            fn args(&self) -> Option<Value> {
                let $ctx = self;
                Some(dict! {
                    $(key::$k => $v,)*
                })
            }
        }
    };
}

pub trait Command: Sized {
    const ID: CommandId;

    fn args(&self) -> Option<Value>;

    fn dispatch(self, adapter: &AdapterSession) -> Result<(), Error> {
        adapter.send(Self::ID, self.args())
    }
}

fn uuid_list(uuids: &[Uuid]) -> Vec<Value> {
    uuids.iter().map(|u| Value::Data(u.shorten().to_vec())).collect()
}

///////////////////////////////////////////////////////////////////////////////////

pub struct Init {
    pub name: String,
    pub show_power_alert: bool,
    pub client_type: i64,
}

impl_command! { Init(ctx) => Init {
    NAME: ctx.name.as_str(),
    OPTIONS: dict! { key::INIT_SHOW_POWER_ALERT => ctx.show_power_alert as i64 },
    TYPE: ctx.client_type,
}}

impl Init {
    /// Init is the only command allowed before the adapter is powered on.
    pub fn dispatch_ungated(self, adapter: &AdapterSession) -> Result<(), Error> {
        adapter.send_ungated(Self::ID, self.args())
    }
}

///////////////////////////////////////////////////////////////////////////////////

pub struct Scan<'a> {
    pub options: &'a ScanOptions,
}

impl Command for Scan<'_> {
    const ID: CommandId = CommandId::StartScan;

    fn args(&self) -> Option<Value> {
        Some(dict! {
            key::OPTIONS => self.options.to_options_dict(),
            key::UUIDS => uuid_list(self.options.service_uuids()),
        })
    }
}

pub struct StopScan;

impl Command for StopScan {
    const ID: CommandId = CommandId::StopScan;

    fn args(&self) -> Option<Value> {
        None
    }
}

///////////////////////////////////////////////////////////////////////////////////

pub struct Connect<'a> {
    pub device: Uuid,
    pub options: &'a ConnectOptions,
}

impl Command for Connect<'_> {
    const ID: CommandId = CommandId::Connect;

    fn args(&self) -> Option<Value> {
        Some(dict! {
            key::DEVICE_UUID => self.device,
            key::OPTIONS => self.options.to_options_dict(),
        })
    }
}

pub struct Disconnect {
    pub device: Uuid,
}

impl_command! { Disconnect(ctx) => Disconnect {
    DEVICE_UUID: ctx.device,
}}

///////////////////////////////////////////////////////////////////////////////////

pub struct DiscoverServices<'a> {
    pub device: Uuid,
    pub uuids: &'a [Uuid],
}

impl Command for DiscoverServices<'_> {
    const ID: CommandId = CommandId::DiscoverServices;

    fn args(&self) -> Option<Value> {
        Some(dict! {
            key::DEVICE_UUID => self.device,
            key::UUIDS => uuid_list(self.uuids),
        })
    }
}

pub struct DiscoverCharacteristics<'a> {
    pub device: Uuid,
    pub start_handle: u16,
    pub end_handle: u16,
    pub uuids: &'a [Uuid],
}

impl Command for DiscoverCharacteristics<'_> {
    const ID: CommandId = CommandId::DiscoverCharacteristics;

    fn args(&self) -> Option<Value> {
        Some(dict! {
            key::DEVICE_UUID => self.device,
            key::SERVICE_START_HANDLE => self.start_handle,
            key::SERVICE_END_HANDLE => self.end_handle,
            key::UUIDS => uuid_list(self.uuids),
        })
    }
}

///////////////////////////////////////////////////////////////////////////////////

/// Addresses a characteristic by its declaration and value handles.
pub struct Characteristic {
    pub device: Uuid,
    pub handle: u16,
    pub value_handle: u16,
}

pub struct DiscoverDescriptors(pub Characteristic);

impl_command! { DiscoverDescriptors(ctx) => DiscoverDescriptors {
    DEVICE_UUID: ctx.0.device,
    CHARACTERISTIC_HANDLE: ctx.0.handle,
    CHARACTERISTIC_VALUE_HANDLE: ctx.0.value_handle,
}}

pub struct ReadCharacteristic(pub Characteristic);

impl_command! { ReadCharacteristic(ctx) => ReadCharacteristic {
    DEVICE_UUID: ctx.0.device,
    CHARACTERISTIC_HANDLE: ctx.0.handle,
    CHARACTERISTIC_VALUE_HANDLE: ctx.0.value_handle,
}}

pub struct WriteCharacteristic {
    pub characteristic: Characteristic,
    pub value: Vec<u8>,
    pub kind: WriteKind,
}

impl_command! { WriteCharacteristic(ctx) => WriteCharacteristic {
    DEVICE_UUID: ctx.characteristic.device,
    CHARACTERISTIC_HANDLE: ctx.characteristic.handle,
    CHARACTERISTIC_VALUE_HANDLE: ctx.characteristic.value_handle,
    DATA: ctx.value.clone(),
    TYPE: ctx.kind as i64,
}}

pub struct SetNotifyValue {
    pub characteristic: Characteristic,
    pub enabled: bool,
}

impl_command! { SetNotifyValue(ctx) => SetNotifyValue {
    DEVICE_UUID: ctx.characteristic.device,
    CHARACTERISTIC_HANDLE: ctx.characteristic.handle,
    CHARACTERISTIC_VALUE_HANDLE: ctx.characteristic.value_handle,
    STATE: ctx.enabled as i64,
}}

///////////////////////////////////////////////////////////////////////////////////

pub struct ReadDescriptor {
    pub device: Uuid,
    pub handle: u16,
}

impl_command! { ReadDescriptor(ctx) => ReadWriteDescriptor {
    DEVICE_UUID: ctx.device,
    DESCRIPTOR_HANDLE: ctx.handle,
}}

pub struct WriteDescriptor {
    pub device: Uuid,
    pub handle: u16,
    pub value: Vec<u8>,
}

impl_command! { WriteDescriptor(ctx) => ReadWriteDescriptor {
    DEVICE_UUID: ctx.device,
    DESCRIPTOR_HANDLE: ctx.handle,
    DATA: ctx.value.clone(),
}}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_characteristic_payload() {
        let device = Uuid::from_bytes([7; 16]);
        let cmd = WriteCharacteristic {
            characteristic: Characteristic {
                device,
                handle: 0x10,
                value_handle: 0x11,
            },
            value: vec![1, 2],
            kind: WriteKind::WithoutResponse,
        };
        assert_eq!(cmd.args().unwrap(), dict! {
            key::DEVICE_UUID => device,
            key::CHARACTERISTIC_HANDLE => 0x10u16,
            key::CHARACTERISTIC_VALUE_HANDLE => 0x11u16,
            key::DATA => vec![1u8, 2],
            key::TYPE => 1,
        });
    }

    #[test]
    fn descriptor_read_and_write_share_id() {
        let device = Uuid::zeroed();
        let read = ReadDescriptor { device, handle: 3 };
        let write = WriteDescriptor { device, handle: 3, value: vec![1, 0] };
        assert_eq!(ReadDescriptor::ID, WriteDescriptor::ID);
        assert!(read.args().unwrap().get(key::DATA).is_none());
        assert_eq!(write.args().unwrap().get(key::DATA), Some(&Value::Data(vec![1, 0])));
    }

    #[test]
    fn service_filter_is_shortened() {
        let uuids = ["0000180d-0000-1000-8000-00805f9b34fb".parse().unwrap()];
        let cmd = DiscoverServices { device: Uuid::zeroed(), uuids: &uuids };
        assert_eq!(cmd.args().unwrap().get(key::UUIDS),
            Some(&Value::Array(vec![Value::Data(vec![0x18, 0x0d])])));
    }
}
