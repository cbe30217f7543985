//! Structured payload values exchanged with the daemon.
//!
//! The daemon speaks in nested dictionaries of a handful of primitive types. [`Value`]
//! models exactly those, and the accessors are lenient in the same places the daemon is:
//! integers may stand in for booleans, and sequences may arrive either as arrays or as
//! dictionaries keyed by index.

use std::collections::BTreeMap;

use crate::uuid::Uuid;

pub type Dict = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Data(Vec<u8>),
    String(String),
    Uuid(Uuid),
    Array(Vec<Value>),
    Dict(Dict),
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(d) => d.get(key),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Bool(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.as_i64().and_then(|v| if v >= 0 && v <= u16::MAX as i64 { Some(v as u16) } else { None })
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|v| if v >= 0 && v <= u32::MAX as i64 { Some(v as u32) } else { None })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            Value::Int(v) => Some(v != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Accepts a native UUID or raw bytes of a 16, 32 or 128 bit UUID.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(v) => Some(*v),
            Value::Data(v) => Uuid::try_from_slice(v),
            Value::String(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements of an array, or the values of an index-keyed dictionary in
    /// index order.
    pub fn as_list(&self) -> Option<Vec<&Value>> {
        match self {
            Value::Array(v) => Some(v.iter().collect()),
            Value::Dict(d) => {
                let mut items = d.iter()
                    .map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                    .collect::<Option<Vec<_>>>()?;
                items.sort_by_key(|&(i, _)| i);
                Some(items.into_iter().map(|(_, v)| v).collect())
            }
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! from_int {
    ($($t:ty)*) => {
        $(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        }
        )*
    };
}

from_int!(u8 u16 u32 i32 i64);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Data(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Value::Dict(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn list_from_index_dict() {
        let v = dict! {
            "10" => 3,
            "2" => 2,
            "0" => 1,
        };
        let list = v.as_list().unwrap();
        assert_eq!(list, vec![&Value::Int(1), &Value::Int(2), &Value::Int(3)]);

        let bad = dict! { "x" => 1 };
        assert!(bad.as_list().is_none());
    }

    #[test]
    fn lenient_scalars() {
        assert_eq!(Value::Int(1).as_bool(), Some(true));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Int(-1).as_u16(), None);
        assert_eq!(Value::Int(0x1_0000).as_u16(), None);
        assert_eq!(Value::Int(0xffff).as_u16(), Some(0xffff));
        assert_eq!(Value::Data(vec![0x18, 0x0d]).as_uuid(), Some(Uuid::from_slice(&[0x18, 0x0d])));
        assert_eq!(Value::Data(vec![1, 2, 3]).as_uuid(), None);
    }
}
