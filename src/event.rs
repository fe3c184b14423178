use std::fmt;
use std::ops::{BitOr, BitOrAssign};
#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Opaque identifier for a pollable resource.
///
/// The wrapped value is whatever the multiplexer understands (a raw file
/// descriptor on Unix). The reactor never creates or closes the underlying
/// resource; ownership stays with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub usize);

impl Handle {
    pub fn new(value: usize) -> Self {
        Handle(value)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }

    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> RawFd {
        self.0 as RawFd
    }
}

#[cfg(unix)]
impl From<RawFd> for Handle {
    fn from(fd: RawFd) -> Self {
        Handle(fd as usize)
    }
}

/// Readiness bit set for a resource: readable, writable, both, or empty.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

const READ_BIT: u8 = 0b01;
const WRITE_BIT: u8 = 0b10;

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);
    pub const READ: EventMask = EventMask(READ_BIT);
    pub const WRITE: EventMask = EventMask(WRITE_BIT);

    pub fn is_readable(&self) -> bool {
        self.0 & READ_BIT != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & WRITE_BIT != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMask")
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// I/O direction, used by the per-resource state machine to address the
/// read or write half of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_bits() {
        assert!(EventMask::EMPTY.is_empty());
        assert!(EventMask::READ.is_readable());
        assert!(!EventMask::READ.is_writable());
        assert!(EventMask::WRITE.is_writable());

        let both = EventMask::READ | EventMask::WRITE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(!both.is_empty());
    }

    #[test]
    fn test_mask_or_assign() {
        let mut mask = EventMask::EMPTY;
        mask |= EventMask::WRITE;
        assert!(mask.is_writable());
        assert!(!mask.is_readable());
    }
}
