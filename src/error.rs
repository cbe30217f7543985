use std::fmt;

use crate::value::Value;
use crate::message::key;

/// Fails with the ATT error carried in `kCBMsgArgResult` if the code is non-zero.
pub(in crate) fn result<T, F: FnOnce() -> Result<T, Error>>(args: &Value, ok: F) -> Result<T, Error> {
    match args.get(key::RESULT).and_then(Value::as_i64) {
        Some(code) if code != 0 => Err(Error::from_att_code(code)),
        _ => ok(),
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    description: String,
}

impl Error {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub(in crate) fn adapter_unavailable(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::AdapterUnavailable, description)
    }

    pub(in crate) fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected, "the device isn't connected")
    }

    pub(in crate) fn invalid_attribute(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAttribute, description)
    }

    pub(in crate) fn peer_disconnected() -> Self {
        Self::new(ErrorKind::PeerDisconnected, "the peer disconnected")
    }

    pub(in crate) fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "the operation timed out")
    }

    pub(in crate) fn protocol(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, description)
    }

    pub(in crate) fn from_att_code(code: i64) -> Self {
        let kind = AttErrorKind::from_code(code);
        Self::new(ErrorKind::Att(kind), format!("ATT error {} ({:?})", code, kind))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl std::error::Error for Error {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The adapter isn't powered on, or reported that it will never be.
    AdapterUnavailable,

    /// The device isn't currently connected.
    NotConnected,

    /// The attribute can't be used for the requested operation.
    InvalidAttribute,

    /// The peer dropped the connection while the operation was in flight.
    PeerDisconnected,

    /// The caller-supplied deadline elapsed.
    Timeout,

    /// The daemon sent a message that couldn't be interpreted.
    ProtocolViolation,

    /// The transport failed to deliver a command.
    Transport,

    Att(AttErrorKind),
}

/// The possible errors returned by a GATT server (a remote peripheral) during
/// Bluetooth low energy ATT transactions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum AttErrorKind {
    /// ATT error that didn't map to any of the existing variants.
    Other,

    /// The attribute handle is invalid on this peripheral.
    InvalidHandle,

    /// The permissions prohibit reading the attribute’s value.
    ReadNotPermitted,

    /// The permissions prohibit writing the attribute’s value.
    WriteNotPermitted,

    /// The attribute Protocol Data Unit (PDU) is invalid.
    InvalidPdu,

    /// Reading or writing the attribute’s value failed for lack of authentication.
    InsufficientAuthentication,

    /// The attribute server doesn’t support the request received from the client.
    RequestNotSupported,

    /// The specified offset value was past the end of the attribute’s value.
    InvalidOffset,

    /// Reading or writing the attribute’s value failed for lack of authorization.
    InsufficientAuthorization,

    /// The prepare queue is full, as a result of there being too many write requests in the queue.
    PrepareQueueFull,

    /// The attribute wasn’t found within the specified attribute handle range.
    AttributeNotFound,

    /// The ATT read blob request can’t read or write the attribute.
    AttributeNotLong,

    /// The encryption key size used for encrypting this link is insufficient.
    InsufficientEncryptionKeySize,

    /// The length of the attribute’s value is invalid for the intended operation.
    InvalidAttributeValueLength,

    /// The ATT request encountered an unlikely error and wasn’t completed.
    UnlikelyError,

    /// Reading or writing the attribute’s value failed for lack of encryption.
    InsufficientEncryption,

    /// The attribute type isn’t a supported grouping attribute as defined by a higher-layer specification.
    UnsupportedGroupType,

    /// Resources are insufficient to complete the ATT request.
    InsufficientResources,
}

impl AttErrorKind {
    fn from_code(code: i64) -> Self {
        use AttErrorKind::*;
        match code {
            1 => InvalidHandle,
            2 => ReadNotPermitted,
            3 => WriteNotPermitted,
            4 => InvalidPdu,
            5 => InsufficientAuthentication,
            6 => RequestNotSupported,
            7 => InvalidOffset,
            8 => InsufficientAuthorization,
            9 => PrepareQueueFull,
            10 => AttributeNotFound,
            11 => AttributeNotLong,
            12 => InsufficientEncryptionKeySize,
            13 => InvalidAttributeValueLength,
            14 => UnlikelyError,
            15 => InsufficientEncryption,
            16 => UnsupportedGroupType,
            17 => InsufficientResources,
            _ => Other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Dict;

    #[test]
    fn att_result() {
        let mut args = Dict::new();
        args.insert(key::RESULT.into(), Value::Int(3));
        let err = result(&Value::Dict(args), || Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Att(AttErrorKind::WriteNotPermitted));

        let mut args = Dict::new();
        args.insert(key::RESULT.into(), Value::Int(0));
        assert_eq!(result(&Value::Dict(args), || Ok(7)).unwrap(), 7);

        assert_eq!(result(&Value::Dict(Dict::new()), || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn unknown_att_code() {
        assert_eq!(Error::from_att_code(0x80).kind(), ErrorKind::Att(AttErrorKind::Other));
    }
}
