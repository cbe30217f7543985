use static_assertions::assert_impl_all;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

const BASE_UUID_BYTES: [u8; 16] = [0, 0, 0, 0, 0, 0, 0x10, 0, 0x80, 0, 0, 0x80, 0x5F, 0x9B, 0x34, 0xFB];

/// Bluetooth-tailored UUID. Identifies both remote devices and GATT attribute types.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// Returns UUID with all bytes set to zero.
    pub const fn zeroed() -> Self {
        Self([0; 16])
    }

    /// Returns the Base UUID (`00000000-0000-1000-8000-00805F9B34FB`) as defined by the Bluetooth Core specification.
    pub const fn base() -> Self {
        Self(BASE_UUID_BYTES)
    }

    /// Constructs instance from the specified bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Constructs instance from the specified slice of variable length.
    /// The supported lengths are 2 for `uuid16`, 4 for `uuid32` and 16 for a standard UUID.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` length is not 2, 4 or 16.
    pub fn from_slice(bytes: &[u8]) -> Self {
        match Self::try_from_slice(bytes) {
            Some(v) => v,
            None => panic!("invalid slice len {}, expected 2, 4 or 16 bytes", bytes.len()),
        }
    }

    /// Same as [`from_slice`](#method.from_slice) but returns `None` on unsupported length.
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let mut r = BASE_UUID_BYTES;
        match bytes.len() {
            2 => r[2..4].copy_from_slice(bytes),
            4 => r[..4].copy_from_slice(bytes),
            16 => r.copy_from_slice(bytes),
            _ => return None,
        }
        Some(Self(r))
    }

    /// Returns inner bytes array.
    pub fn bytes(&self) -> [u8; 16] {
        self.0
    }

    /// Returns the shortest possible UUID that is equivalent of this UUID.
    pub fn shorten(&self) -> &[u8] {
        if self.0[4..] == BASE_UUID_BYTES[4..] {
            if self.0[0..2] == BASE_UUID_BYTES[0..2] {
                &self.0[2..4]
            } else {
                &self.0[..4]
            }
        } else {
            &self.0
        }
    }
}

assert_impl_all!(Uuid: Send, Sync);

impl Deref for Uuid {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3],
            self.0[4], self.0[5], self.0[6], self.0[7],
            self.0[8], self.0[9], self.0[10], self.0[11],
            self.0[12], self.0[13], self.0[14], self.0[15])
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uuid({})", self)
    }
}

impl From<[u8; 16]> for Uuid {
    fn from(v: [u8; 16]) -> Self {
        Self::from_bytes(v)
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.as_bytes();
        if s.len() != 36 {
            return Err(UuidParseError(()));
        }
        const DASHES: [usize; 4] = [8, 13, 18, 23];
        if DASHES.iter().any(|&i| s[i] != b'-') {
            return Err(UuidParseError(()));
        }

        fn dig(c: u8) -> Result<u8, UuidParseError> {
            Ok(match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                b'A'..=b'F' => c - b'A' + 10,
                _ => return Err(UuidParseError(())),
            })
        }

        let mut digits = s.iter().enumerate()
            .filter(|(i, _)| !DASHES.contains(i))
            .map(|(_, &c)| dig(c));
        let mut buf = [0; 16];
        for d in buf.iter_mut() {
            let hi = digits.next().ok_or(UuidParseError(()))??;
            let lo = digits.next().ok_or(UuidParseError(()))??;
            *d = (hi << 4) | lo;
        }
        Ok(buf.into())
    }
}

#[derive(Debug)]
pub struct UuidParseError(());

impl fmt::Display for UuidParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid UUID string")
    }
}

impl std::error::Error for UuidParseError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shorten() {
        fn base(prefix: &[u8]) -> [u8; 16] {
            let mut r = BASE_UUID_BYTES;
            r[..prefix.len()].copy_from_slice(&prefix);
            r
        }
        let data = &[
            (base(&[0, 0, 0, 0]), &[0, 0][..]),
            (base(&[0, 0, 0x2a, 0x19]), &[0x2a, 0x19][..]),
            (base(&[0, 1, 0, 0]), &[0, 1, 0, 0][..]),
            (base(&[0xff, 0xff, 0xff, 0xff]), &[0xff, 0xff, 0xff, 0xff][..]),
            (base(&[0, 0, 0, 0, 1]), &base(&[0, 0, 0, 0, 1])[..]),
        ];
        for &(inp, exp) in data {
            let uuid = Uuid::from_bytes(inp);
            assert_eq!(uuid.shorten(), exp);
            assert_eq!(Uuid::try_from_slice(uuid.shorten()), Some(uuid));
        }
    }

    #[test]
    fn slice_len() {
        assert_eq!(Uuid::try_from_slice(&[]), None);
        assert_eq!(Uuid::try_from_slice(&[1, 2, 3]), None);
    }

    #[test]
    fn parse_ok() {
        let data = &[
            ("00000000-0000-0000-0000-000000000000", Uuid::zeroed()),
            ("12345678-9AbC-Def0-1234-56789aBCDEF0", Uuid::from_bytes(
                [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC,
                    0xDE, 0xF0])),
            ("00000000-0000-1000-8000-00805F9B34FB", Uuid::base()),
        ];
        for &(inp, exp) in data {
            let act = inp.parse::<Uuid>().unwrap();
            assert_eq!(act, exp);
            assert_eq!(inp.to_ascii_lowercase(), act.to_string());
        }
    }

    #[test]
    fn parse_fail() {
        let data = &[
            "",
            "0",
            "00000000_0000-0000-0000-000000000000",
            "00000000-0000*0000-0000-000000000000",
            "00000000-0000-0000+0000-000000000000",
            "00000000-0000-0000-0000~000000000000",
            "00000000-0000-00z0-0000-000000000000",
            "00000000-0000-0000-0000-_00000000000",
        ];
        for &inp in data {
            assert!(inp.parse::<Uuid>().is_err());
        }
    }
}
