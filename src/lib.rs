//! Blocking BLE GATT client sessions over the platform Bluetooth daemon's message bus.
//!
//! The daemon is driven purely by tagged messages: the client sends commands and receives
//! events on a single inbound channel, with no request/response pairing beyond the
//! message id. This crate turns that stream into call/response-shaped operations:
//!
//! * [`AdapterSession`](adapter/struct.AdapterSession.html) owns the event router, tracks
//!   the adapter power state and gates every command on the adapter being powered on.
//! * [`ScanCoordinator`](scan/struct.ScanCoordinator.html) starts and stops scanning and
//!   merges repeated, partial advertisements into one record per device.
//! * [`GattSession`](gatt/struct.GattSession.html) connects to one device and runs service,
//!   characteristic and descriptor discovery, reads, writes and notification subscriptions.
//!
//! The transport carrying messages to and from the daemon is supplied by the user through
//! the [`Transport`](transport/trait.Transport.html) trait and the
//! [`Dispatcher`](adapter/struct.Dispatcher.html) handle.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use blued_gatt::adapter::AdapterSession;
//! use blued_gatt::gatt::GattSession;
//! use blued_gatt::scan::ScanCoordinator;
//! # use blued_gatt::{error::Error, message::Message, transport::Transport};
//! # struct Xpc;
//! # impl Transport for Xpc {
//! #     fn send(&self, _: Message) -> Result<(), Error> { Ok(()) }
//! # }
//! # fn connect_to_daemon() -> Xpc { Xpc }
//!
//! let adapter = AdapterSession::new(connect_to_daemon());
//! // Hand `adapter.dispatcher()` to the transport's receive loop, then:
//! adapter.init()?;
//!
//! let scanner = ScanCoordinator::new(&adapter);
//! let devices = scanner.discover(Duration::from_secs(5))?;
//!
//! for (id, device) in devices {
//!     println!("{} {} ({} dBm)", id, device.name(), device.rssi());
//!     let session = GattSession::new(&adapter, id);
//!     session.connect()?;
//!     for service in session.discover_services()? {
//!         let chars = session.discover_service_characteristics(&service)?;
//!         println!("  {} has {} characteristics", service.uuid(), chars.len());
//!     }
//!     session.disconnect()?;
//! }
//! # Ok::<(), Error>(())
//! ```
#![deny(non_snake_case)]
#![deny(unused_must_use)]

#[macro_use]
mod macros;

pub mod adapter;
mod command;
pub mod error;
pub mod gatt;
pub mod message;
pub mod router;
pub mod scan;
mod sync;
pub mod transport;
pub mod uuid;
pub mod value;

pub use adapter::{AdapterSession, AdapterSessionBuilder, Dispatcher};
pub use gatt::GattSession;
pub use scan::ScanCoordinator;
pub use sync::Receiver;

/// The possible states of the Bluetooth adapter as reported by the daemon.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum AdapterState {
    /// The adapter’s state is unknown.
    Unknown = 0,

    /// A state that indicates the connection with the system service was momentarily lost.
    Resetting = 1,

    /// A state that indicates this device doesn’t support the Bluetooth low energy central or client role.
    Unsupported = 2,

    /// A state that indicates the application isn’t authorized to use the Bluetooth low energy role.
    Unauthorized = 3,

    /// A state that indicates Bluetooth is currently powered off.
    PoweredOff = 4,

    /// A state that indicates Bluetooth is currently powered on and available to use.
    PoweredOn = 5,
}

impl AdapterState {
    fn from_i64(v: i64) -> Option<Self> {
        Some(match v {
            0 => Self::Unknown,
            1 => Self::Resetting,
            2 => Self::Unsupported,
            3 => Self::Unauthorized,
            4 => Self::PoweredOff,
            5 => Self::PoweredOn,
            _ => return None,
        })
    }

    /// Whether entering this state ends the session for good. Powered off is fatal only
    /// if the adapter never came up.
    fn is_fatal(self, was_ready: bool) -> bool {
        match self {
            Self::Unsupported | Self::Unauthorized => true,
            Self::PoweredOff => !was_ready,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_from_index() {
        assert_eq!(AdapterState::from_i64(0), Some(AdapterState::Unknown));
        assert_eq!(AdapterState::from_i64(5), Some(AdapterState::PoweredOn));
        assert_eq!(AdapterState::from_i64(6), None);
        assert_eq!(AdapterState::from_i64(-1), None);
    }

    #[test]
    fn fatal_states() {
        assert!(AdapterState::Unauthorized.is_fatal(true));
        assert!(AdapterState::PoweredOff.is_fatal(false));
        assert!(!AdapterState::PoweredOff.is_fatal(true));
        assert!(!AdapterState::Resetting.is_fatal(false));
    }
}
