use super::*;

/// A characteristic descriptor.
///
/// Descriptors provide further information about a characteristic’s value. For example, they may
/// describe the value in human-readable form, or indicate whether a characteristic’s value
/// notifies a client (a central) when it changes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DescriptorRef {
    uuid: Uuid,
    handle: u16,
}

assert_impl_all!(DescriptorRef: Send, Sync);

impl DescriptorRef {
    pub fn new(uuid: Uuid, handle: u16) -> Self {
        Self {
            uuid,
            handle,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn from_value(v: &Value) -> Result<Self, Error> {
        Ok(Self {
            uuid: field(v, key::UUID, Value::as_uuid)?,
            handle: field(v, key::DESCRIPTOR_HANDLE, Value::as_u16)?,
        })
    }

    pub fn to_value(&self) -> Value {
        dict! {
            key::UUID => self.uuid.shorten().to_vec(),
            key::DESCRIPTOR_HANDLE => self.handle,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let d = DescriptorRef::new(Uuid::from_slice(&[0x29, 0x02]), 0x2b);
        assert_eq!(DescriptorRef::from_value(&d.to_value()).unwrap(), d);
    }
}
