//! Readiness multiplexer abstraction and the mio-backed implementation.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::event::{EventMask, Handle};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// The external OS readiness primitive the reactor drives.
///
/// Registration state is keyed by [`Handle`]; `registered` and `handles`
/// expose the registration table the way a selector map would, which the
/// reconciliation pass and teardown rely on. Implementations are free to be
/// test doubles; [`MioPoller`] is the production one.
pub trait Multiplexer {
    fn register(&mut self, handle: Handle, mask: EventMask) -> io::Result<()>;
    fn modify(&mut self, handle: Handle, mask: EventMask) -> io::Result<()>;
    fn unregister(&mut self, handle: Handle) -> io::Result<()>;

    /// Blocks until readiness or `timeout`; `None` blocks indefinitely.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(Handle, EventMask)>>;

    fn registered(&self, handle: Handle) -> bool;
    fn handles(&self) -> Vec<Handle>;
    fn close(&mut self) -> io::Result<()>;
}

/// Readiness polling over `mio::Poll` (epoll/kqueue), with handles taken as
/// raw file descriptors.
pub struct MioPoller {
    poll: Option<Poll>,
    events: Events,
    registered: HashMap<Handle, EventMask>,
}

impl MioPoller {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENTS_CAPACITY)
    }

    /// `events_capacity` bounds how many events one wait can report.
    pub fn with_capacity(events_capacity: usize) -> io::Result<Self> {
        Ok(MioPoller {
            poll: Some(Poll::new()?),
            events: Events::with_capacity(events_capacity),
            registered: HashMap::new(),
        })
    }

    fn poll_ref(&self) -> io::Result<&Poll> {
        self.poll
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "poller is closed"))
    }

    fn interest(mask: EventMask) -> io::Result<Interest> {
        match (mask.is_readable(), mask.is_writable()) {
            (true, true) => Ok(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Ok(Interest::READABLE),
            (false, true) => Ok(Interest::WRITABLE),
            (false, false) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty event mask",
            )),
        }
    }
}

impl Multiplexer for MioPoller {
    fn register(&mut self, handle: Handle, mask: EventMask) -> io::Result<()> {
        let interest = Self::interest(mask)?;
        let fd = handle.as_raw_fd();
        self.poll_ref()?
            .registry()
            .register(&mut SourceFd(&fd), Token(handle.as_usize()), interest)?;
        self.registered.insert(handle, mask);
        Ok(())
    }

    fn modify(&mut self, handle: Handle, mask: EventMask) -> io::Result<()> {
        let interest = Self::interest(mask)?;
        let fd = handle.as_raw_fd();
        self.poll_ref()?
            .registry()
            .reregister(&mut SourceFd(&fd), Token(handle.as_usize()), interest)?;
        self.registered.insert(handle, mask);
        Ok(())
    }

    fn unregister(&mut self, handle: Handle) -> io::Result<()> {
        let fd = handle.as_raw_fd();
        self.poll_ref()?.registry().deregister(&mut SourceFd(&fd))?;
        self.registered.remove(&handle);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(Handle, EventMask)>> {
        let poll = self
            .poll
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "poller is closed"))?;
        poll.poll(&mut self.events, timeout)?;

        let mut ready = Vec::with_capacity(self.events.iter().count());
        for event in self.events.iter() {
            let mut mask = EventMask::EMPTY;
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                mask |= EventMask::READ;
            }
            if event.is_writable() || event.is_write_closed() {
                mask |= EventMask::WRITE;
            }
            if !mask.is_empty() {
                ready.push((Handle::new(event.token().0), mask));
            }
        }
        Ok(ready)
    }

    fn registered(&self, handle: Handle) -> bool {
        self.registered.contains_key(&handle)
    }

    fn handles(&self) -> Vec<Handle> {
        self.registered.keys().copied().collect()
    }

    fn close(&mut self) -> io::Result<()> {
        self.poll = None;
        self.registered.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::unix::pipe;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_wait_times_out_empty() {
        let mut poller = MioPoller::new().unwrap();
        let ready = poller.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_pipe_readiness() {
        let mut poller = MioPoller::new().unwrap();
        let (mut tx, rx) = pipe::new().unwrap();
        let handle = Handle::from(rx.as_raw_fd());

        poller.register(handle, EventMask::READ).unwrap();
        assert!(poller.registered(handle));

        tx.write_all(b"x").unwrap();
        let ready = poller.wait(Some(Duration::from_millis(500))).unwrap();
        assert!(ready
            .iter()
            .any(|(h, mask)| *h == handle && mask.is_readable()));
    }

    #[test]
    fn test_unregister_stops_events() {
        let mut poller = MioPoller::new().unwrap();
        let (mut tx, rx) = pipe::new().unwrap();
        let handle = Handle::from(rx.as_raw_fd());

        poller.register(handle, EventMask::READ).unwrap();
        poller.unregister(handle).unwrap();
        assert!(!poller.registered(handle));
        assert!(poller.handles().is_empty());

        tx.write_all(b"x").unwrap();
        let ready = poller.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_empty_mask_rejected() {
        let mut poller = MioPoller::new().unwrap();
        let err = poller.register(Handle::new(0), EventMask::EMPTY).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_close_then_use_fails() {
        let mut poller = MioPoller::new().unwrap();
        poller.close().unwrap();
        poller.close().unwrap();
        assert!(poller.wait(None).is_err());
    }
}
