use enumflags2::BitFlags;
use std::fmt;

use super::*;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum WriteKind {
    WithResponse = 0,
    WithoutResponse = 1,
}

#[derive(BitFlags, Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[repr(u32)]
enum Property {
    Broadcast                       = 0x01,
    Read                            = 0x02,
    WriteWithoutResponse            = 0x04,
    Write                           = 0x08,
    Notify                          = 0x10,
    Indicate                        = 0x20,
    AuthenticatedSignedWrites       = 0x40,
    ExtendedProperties              = 0x80,
    NotifyEncryptionRequired        = 0x100,
    IndicateEncryptionRequired      = 0x200
}

#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Properties(BitFlags<Property>);

impl Properties {
    /// Unknown bits are dropped.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(BitFlags::from_bits_truncate(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0.bits()
    }

    /// Whether the value can be subscribed to, either as notifications or indications.
    pub fn can_subscribe(&self) -> bool {
        self.is_notify() || self.is_indicate()
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self(BitFlags::empty())
    }
}

macro_rules! properties {
    ($($(#[$attr:meta])* $f:ident => $e:ident,)*) => {
        impl Properties {
            $(
                $(#[$attr])*
                pub fn $f(&self) -> bool {
                    self.0.contains(Property::$e)
                }
            )*
        }
    };
}

properties!(
    #[doc="Characteristic can broadcast its value using a characteristic configuration descriptor."]
    is_broadcast => Broadcast,

    #[doc="The characteristic's value can be read."]
    is_read => Read,

    #[doc="The characteristic's value can be written without a response."]
    is_write_without_response => WriteWithoutResponse,

    #[doc="The characteristic's value can be written with a response confirming the write."]
    is_write => Write,

    #[doc="The device sends notifications of value changes without expecting an acknowledgement."]
    is_notify => Notify,

    #[doc="The device sends indications of value changes and expects each to be acknowledged."]
    is_indicate => Indicate,

    #[doc="Signed writes without response are permitted."]
    is_authenticated_signed_writes => AuthenticatedSignedWrites,

    #[doc="The characteristic defines additional properties in the extended properties descriptor."]
    is_extended_properties => ExtendedProperties,

    #[doc="Only trusted devices can enable notifications."]
    is_notify_encryption_required => NotifyEncryptionRequired,

    #[doc="Only trusted devices can enable indications."]
    is_indicate_encryption_required => IndicateEncryptionRequired,
);

assert_impl_all!(Properties: Send, Sync);

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Properties(")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{:?}", p)?;
        }
        write!(f, ")")
    }
}

/// A characteristic found by discovery.
///
/// `handle` is the declaration handle, `value_handle` the handle the value lives at.
/// Both are sent back to the daemon when operating on the characteristic.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CharacteristicRef {
    uuid: Uuid,
    handle: u16,
    value_handle: u16,
    properties: Properties,
}

assert_impl_all!(CharacteristicRef: Send, Sync);

impl CharacteristicRef {
    pub fn new(uuid: Uuid, handle: u16, value_handle: u16, properties: Properties) -> Self {
        Self {
            uuid,
            handle,
            value_handle,
            properties,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn value_handle(&self) -> u16 {
        self.value_handle
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Declaration and value handles.
    pub fn handles(&self) -> [u16; 2] {
        [self.handle, self.value_handle]
    }

    /// Whether `handle` addresses this characteristic, either by declaration or by value.
    pub fn has_handle(&self, handle: u16) -> bool {
        self.handle == handle || self.value_handle == handle
    }

    pub fn from_value(v: &Value) -> Result<Self, Error> {
        let properties = match v.get(key::CHARACTERISTIC_PROPERTIES) {
            Some(p) => p.as_u32()
                .ok_or_else(|| Error::protocol(format!("bad {}: {:?}", key::CHARACTERISTIC_PROPERTIES, p)))?,
            None => 0,
        };
        Ok(Self {
            uuid: field(v, key::UUID, Value::as_uuid)?,
            handle: field(v, key::CHARACTERISTIC_HANDLE, Value::as_u16)?,
            value_handle: field(v, key::CHARACTERISTIC_VALUE_HANDLE, Value::as_u16)?,
            properties: Properties::from_bits_truncate(properties),
        })
    }

    pub fn to_value(&self) -> Value {
        dict! {
            key::UUID => self.uuid.shorten().to_vec(),
            key::CHARACTERISTIC_HANDLE => self.handle,
            key::CHARACTERISTIC_VALUE_HANDLE => self.value_handle,
            key::CHARACTERISTIC_PROPERTIES => self.properties.bits(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn properties() {
        let p = Properties::from_bits_truncate(0x12 | 0x8000);
        assert!(p.is_read());
        assert!(p.is_notify());
        assert!(!p.is_indicate());
        assert!(p.can_subscribe());
        assert_eq!(p.bits(), 0x12);
        assert_eq!(format!("{:?}", p), "Properties(Read | Notify)");
        assert!(!Properties::default().can_subscribe());
    }

    #[test]
    fn round_trip() {
        let c = CharacteristicRef::new(Uuid::from_slice(&[0x2a, 0x19]), 0x21, 0x22,
            Properties::from_bits_truncate(0x12));
        assert_eq!(CharacteristicRef::from_value(&c.to_value()).unwrap(), c);
        assert!(c.has_handle(0x21));
        assert!(c.has_handle(0x22));
        assert!(!c.has_handle(0x23));
        assert_eq!(c.handles(), [0x21, 0x22]);
    }

    #[test]
    fn properties_optional() {
        let v = dict! {
            key::UUID => vec![0x2au8, 0x19],
            key::CHARACTERISTIC_HANDLE => 1,
            key::CHARACTERISTIC_VALUE_HANDLE => 2,
        };
        let c = CharacteristicRef::from_value(&v).unwrap();
        assert_eq!(c.properties().bits(), 0);
    }
}
