use log::*;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::error::Error;

pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    mpsc::channel()
}

/// Locks ignoring poisoning. Everything guarded in this crate stays consistent across a
/// panicking handler.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Identifies one armed request of a [`Slot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ticket(u64);

struct Pending {
    ticket: u64,
    // Attribute handles the request is about. Empty if responses don't name one.
    handles: Vec<u16>,
}

struct SlotState<T> {
    next: u64,
    // Requests given up on by their caller whose responses may still arrive.
    abandoned: u64,
    waiting: Option<Pending>,
    result: Option<Result<T, Error>>,
}

/// One-shot rendezvous between a caller waiting for a response and the delivery thread
/// producing it.
///
/// A response arriving while nobody waits is counted against the requests abandoned by a
/// timeout and dropped. While a request waits, a response naming an attribute handle the
/// request is not about is a late answer to an earlier request and is dropped too. Any
/// other response answers the waiting request, and the abandoned requests are then assumed
/// to be unanswered for good.
pub struct Slot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                next: 0,
                abandoned: 0,
                waiting: None,
                result: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Registers the caller as the receiver of the next response.
    /// Must be called before the request is sent.
    pub fn arm(&self) -> Ticket {
        self.arm_for(&[])
    }

    /// Like [`arm`](#method.arm), for a request about the attribute with one of `handles`.
    pub fn arm_for(&self, handles: &[u16]) -> Ticket {
        let mut st = lock(&self.state);
        st.next += 1;
        let ticket = st.next;
        st.waiting = Some(Pending {
            ticket,
            handles: handles.to_vec(),
        });
        st.result = None;
        Ticket(ticket)
    }

    /// Takes back a ticket whose request was never sent.
    pub fn withdraw(&self, ticket: Ticket) {
        let mut st = lock(&self.state);
        if st.waiting.as_ref().map(|p| p.ticket) == Some(ticket.0) {
            st.waiting = None;
            st.result = None;
        }
    }

    /// Delivers a response about the attribute `handle`, if the response names one.
    /// Returns `false` if the response was dropped.
    pub fn complete(&self, handle: Option<u16>, result: Result<T, Error>) -> bool {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        let foreign = match &st.waiting {
            Some(p) if st.result.is_none() => handle
                .map_or(false, |h| !p.handles.is_empty() && !p.handles.contains(&h)),
            _ => {
                if st.abandoned > 0 {
                    st.abandoned -= 1;
                    debug!("dropping late response to an abandoned request");
                } else {
                    debug!("dropping unsolicited response");
                }
                return false;
            }
        };
        if foreign {
            st.abandoned = st.abandoned.saturating_sub(1);
            debug!("dropping response for handle {:?}", handle);
            return false;
        }
        st.abandoned = 0;
        st.result = Some(result);
        self.cond.notify_all();
        true
    }

    /// Releases the current waiter, if any, with `error` and forgets all outstanding
    /// requests. Used when no further responses can arrive.
    pub fn fail(&self, error: Error) {
        let mut st = lock(&self.state);
        st.abandoned = 0;
        if st.waiting.is_some() && st.result.is_none() {
            st.result = Some(Err(error));
            self.cond.notify_all();
        }
    }

    /// Forgets the abandoned requests. Used after cancelling them on the daemon side.
    pub fn forget(&self) {
        lock(&self.state).abandoned = 0;
    }

    /// Blocks until the request identified by `ticket` resolves or `timeout` elapses.
    pub fn wait(&self, ticket: Ticket, timeout: Option<Duration>) -> Result<T, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = lock(&self.state);
        loop {
            if st.waiting.as_ref().map(|p| p.ticket) != Some(ticket.0) {
                return Err(Error::timeout());
            }
            if let Some(r) = st.result.take() {
                st.waiting = None;
                return r;
            }
            st = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        st.waiting = None;
                        st.abandoned += 1;
                        return Err(Error::timeout());
                    }
                    self.cond.wait_timeout(st, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.cond.wait(st).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    #[cfg(test)]
    pub fn is_waiting(&self) -> bool {
        lock(&self.state).waiting.is_some()
    }
}

/// A [`Slot`] paired with the lock that keeps requests of one kind from overlapping.
pub struct Operation<T> {
    lock: Mutex<()>,
    pub slot: Slot<T>,
}

impl<T> Operation<T> {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            slot: Slot::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<()> {
        lock(&self.lock)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::error::ErrorKind;

    #[test]
    fn complete_before_wait() {
        let slot = Slot::new();
        let t = slot.arm();
        assert!(slot.complete(None, Ok(1)));
        assert_eq!(slot.wait(t, None).unwrap(), 1);
        assert!(!slot.is_waiting());
    }

    #[test]
    fn unsolicited_response_is_dropped() {
        let slot = Slot::<u32>::new();
        assert!(!slot.complete(None, Ok(1)));

        let t = slot.arm();
        assert!(slot.complete(None, Ok(2)));
        assert!(!slot.complete(None, Ok(3)));
        assert_eq!(slot.wait(t, None).unwrap(), 2);
    }

    #[test]
    fn late_response_before_next_request() {
        let slot = Slot::new();
        let t1 = slot.arm();
        let err = slot.wait(t1, Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // Late answer to the first request.
        assert!(!slot.complete(None, Ok("stale")));

        let t2 = slot.arm();
        assert!(slot.complete(None, Ok("fresh")));
        assert_eq!(slot.wait(t2, None).unwrap(), "fresh");
    }

    #[test]
    fn late_response_for_other_handle() {
        let slot = Slot::new();
        let t1 = slot.arm_for(&[0x10, 0x11]);
        slot.wait(t1, Some(Duration::from_millis(10))).unwrap_err();

        let t2 = slot.arm_for(&[0x21, 0x22]);
        assert!(!slot.complete(Some(0x11), Ok("stale")));
        assert!(slot.complete(Some(0x22), Ok("fresh")));
        assert_eq!(slot.wait(t2, None).unwrap(), "fresh");
    }

    #[test]
    fn response_without_handle_matches_any() {
        let slot = Slot::new();
        let t = slot.arm_for(&[0x10]);
        assert!(slot.complete(None, Ok(1)));
        assert_eq!(slot.wait(t, None).unwrap(), 1);
    }

    #[test]
    fn unanswered_timeouts_dont_block_later_requests() {
        let slot = Slot::new();
        for _ in 0..3 {
            let t = slot.arm_for(&[0x10]);
            slot.wait(t, Some(Duration::from_millis(5))).unwrap_err();
        }
        for i in 0..3 {
            let t = slot.arm_for(&[0x10]);
            assert!(slot.complete(Some(0x10), Ok(i)));
            assert_eq!(slot.wait(t, Some(Duration::from_millis(100))).unwrap(), i);
        }

        let t = slot.arm();
        slot.wait(t, Some(Duration::from_millis(5))).unwrap_err();
        let t = slot.arm();
        assert!(slot.complete(None, Ok(7)));
        assert_eq!(slot.wait(t, Some(Duration::from_millis(100))).unwrap(), 7);
    }

    #[test]
    fn forget_abandoned() {
        let slot = Slot::new();
        let t = slot.arm();
        slot.wait(t, Some(Duration::from_millis(5))).unwrap_err();
        slot.forget();
        // Nothing is owed a response anymore, so this one isn't counted as late.
        assert!(!slot.complete(None, Ok(1)));
        let t = slot.arm();
        assert!(slot.complete(None, Ok(2)));
        assert_eq!(slot.wait(t, None).unwrap(), 2);
    }

    #[test]
    fn withdraw_unsent() {
        let slot = Slot::new();
        let t = slot.arm();
        slot.withdraw(t);
        assert!(!slot.is_waiting());
        assert!(!slot.complete(None, Ok(1)));

        let t = slot.arm();
        assert!(slot.complete(None, Ok(2)));
        assert_eq!(slot.wait(t, None).unwrap(), 2);
    }

    #[test]
    fn fail_releases_blocked_waiter() {
        let slot = Arc::new(Slot::<()>::new());
        let t = slot.arm();
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait(t, None))
        };
        while !slot.is_waiting() {
            thread::yield_now();
        }
        slot.fail(Error::peer_disconnected());
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PeerDisconnected);

        // Nothing outstanding after a failure.
        assert!(!slot.complete(None, Ok(())));
    }

    #[test]
    fn resolves_once() {
        let slot = Slot::new();
        let t = slot.arm();
        slot.fail(Error::peer_disconnected());
        slot.fail(Error::timeout());
        assert!(!slot.complete(None, Ok(1)));
        assert_eq!(slot.wait(t, None).unwrap_err().kind(), ErrorKind::PeerDisconnected);
    }
}
