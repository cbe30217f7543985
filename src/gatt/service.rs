use super::*;

/// A primary service found by discovery, identified by its attribute handle range.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ServiceRef {
    uuid: Uuid,
    start_handle: u16,
    end_handle: u16,
}

assert_impl_all!(ServiceRef: Send, Sync);

impl ServiceRef {
    pub fn new(uuid: Uuid, start_handle: u16, end_handle: u16) -> Self {
        Self {
            uuid,
            start_handle,
            end_handle,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// First attribute handle of the service.
    pub fn start_handle(&self) -> u16 {
        self.start_handle
    }

    /// Last attribute handle of the service.
    pub fn end_handle(&self) -> u16 {
        self.end_handle
    }

    pub fn from_value(v: &Value) -> Result<Self, Error> {
        Ok(Self {
            uuid: field(v, key::UUID, Value::as_uuid)?,
            start_handle: field(v, key::SERVICE_START_HANDLE, Value::as_u16)?,
            end_handle: field(v, key::SERVICE_END_HANDLE, Value::as_u16)?,
        })
    }

    pub fn to_value(&self) -> Value {
        dict! {
            key::UUID => self.uuid.shorten().to_vec(),
            key::SERVICE_START_HANDLE => self.start_handle,
            key::SERVICE_END_HANDLE => self.end_handle,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn round_trip() {
        let s = ServiceRef::new("0000180f-0000-1000-8000-00805f9b34fb".parse().unwrap(), 0x20, 0x2f);
        let v = s.to_value();
        assert_eq!(v.get(key::UUID), Some(&Value::Data(vec![0x18, 0x0f])));
        assert_eq!(ServiceRef::from_value(&v).unwrap(), s);
    }

    #[test]
    fn missing_handle() {
        let v = dict! {
            key::UUID => vec![0x18u8, 0x0f],
            key::SERVICE_START_HANDLE => 1,
        };
        let err = ServiceRef::from_value(&v).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }
}
