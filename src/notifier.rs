//! Cross-thread command injection for the reactor.
//!
//! A [`Notifier`] pairs a FIFO queue with an OS-level wakeup channel so that
//! any thread can hand an item to the loop thread and interrupt a blocked
//! readiness wait. The consuming side registers [`Notifier::handle`] with the
//! multiplexer; when that handle turns readable it drains the wakeup bytes
//! and takes a snapshot of everything queued. Lost or coalesced wakeup bytes
//! are harmless because every drain consumes the whole queue, not one item.
//!
//! The wakeup transport is a construction-time strategy: a Unix pipe by
//! default, or a socket pair for platforms where pipes are unavailable to
//! the poller. Both obey the identical contract and the hot path never
//! branches on the platform.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::UnixStream;
use mio::unix::pipe;
use std::os::unix::io::AsRawFd;

use crate::event::Handle;

/// Wakeup transport selection, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeupKind {
    #[default]
    Pipe,
    SocketPair,
}

trait WakeupReader: Send {
    fn handle(&self) -> Handle;
    fn drain(&mut self);
}

trait WakeupWriter: Send + Sync {
    fn wake(&self);
}

struct PipeReader(pipe::Receiver);

impl WakeupReader for PipeReader {
    fn handle(&self) -> Handle {
        Handle::from(self.0.as_raw_fd())
    }

    fn drain(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.0.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

struct PipeWriter(pipe::Sender);

impl WakeupWriter for PipeWriter {
    fn wake(&self) {
        // A full pipe already guarantees a pending wakeup.
        if let Err(e) = (&self.0).write(&[1]) {
            if e.kind() != io::ErrorKind::WouldBlock {
                log::warn!("wakeup write failed: {}", e);
            }
        }
    }
}

struct SocketReader(UnixStream);

impl WakeupReader for SocketReader {
    fn handle(&self) -> Handle {
        Handle::from(self.0.as_raw_fd())
    }

    fn drain(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.0).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

struct SocketWriter(UnixStream);

impl WakeupWriter for SocketWriter {
    fn wake(&self) {
        if let Err(e) = (&self.0).write(&[1]) {
            if e.kind() != io::ErrorKind::WouldBlock {
                log::warn!("wakeup write failed: {}", e);
            }
        }
    }
}

/// Producer half of a [`Notifier`]; cheap to clone and usable from any
/// thread.
pub struct NotifyHandle<T> {
    sender: Sender<T>,
    writer: Arc<dyn WakeupWriter>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for NotifyHandle<T> {
    fn clone(&self) -> Self {
        NotifyHandle {
            sender: self.sender.clone(),
            writer: Arc::clone(&self.writer),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T: Send> NotifyHandle<T> {
    /// Enqueues `item` (FIFO) and nudges the wakeup channel. A no-op once
    /// the notifier is closed.
    pub fn notify(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.sender.send(item).is_ok() {
            self.writer.wake();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Consumer half, owned by the loop thread.
pub struct Notifier<T> {
    receiver: Option<Receiver<T>>,
    reader: Option<Box<dyn WakeupReader>>,
    handle: Handle,
    notify: NotifyHandle<T>,
}

impl<T: Send + 'static> Notifier<T> {
    /// Builds a notifier with the platform-default wakeup transport.
    pub fn new() -> io::Result<Self> {
        Self::with_wakeup(WakeupKind::default())
    }

    pub fn with_wakeup(kind: WakeupKind) -> io::Result<Self> {
        let (sender, receiver) = unbounded();
        let (reader, writer): (Box<dyn WakeupReader>, Arc<dyn WakeupWriter>) = match kind {
            WakeupKind::Pipe => {
                let (tx, rx) = pipe::new()?;
                (Box::new(PipeReader(rx)), Arc::new(PipeWriter(tx)))
            }
            WakeupKind::SocketPair => {
                let (read_end, write_end) = UnixStream::pair()?;
                (
                    Box::new(SocketReader(read_end)),
                    Arc::new(SocketWriter(write_end)),
                )
            }
        };
        let handle = reader.handle();
        Ok(Notifier {
            receiver: Some(receiver),
            reader: Some(reader),
            handle,
            notify: NotifyHandle {
                sender,
                writer,
                closed: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// Readable end of the wakeup channel, for multiplexer registration.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// A producer handle for other threads.
    pub fn notify_handle(&self) -> NotifyHandle<T> {
        self.notify.clone()
    }

    /// Drains the wakeup channel, then returns a snapshot of everything
    /// queued at that moment. Items enqueued while the caller walks the
    /// snapshot belong to the next pass.
    pub fn drain(&mut self) -> Vec<T> {
        if let Some(reader) = self.reader.as_mut() {
            reader.drain();
        }
        match self.receiver.as_ref() {
            Some(receiver) => receiver.try_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.as_ref().map_or(0, |r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.notify.is_closed()
    }

    /// Releases the queue and both wakeup ends. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.notify.closed.store(true, Ordering::Release);
        self.receiver = None;
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let mut notifier: Notifier<u32> = Notifier::new().unwrap();
        let handle = notifier.notify_handle();

        for i in 0..8 {
            handle.notify(i);
        }
        assert_eq!(notifier.drain(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_drain_is_a_snapshot() {
        let mut notifier: Notifier<u32> = Notifier::new().unwrap();
        let handle = notifier.notify_handle();

        handle.notify(1);
        let first = notifier.drain();
        handle.notify(2);

        assert_eq!(first, vec![1]);
        assert_eq!(notifier.drain(), vec![2]);
    }

    #[test]
    fn test_cross_thread_notify() {
        let mut notifier: Notifier<usize> = Notifier::new().unwrap();

        let mut threads = Vec::new();
        for i in 0..4 {
            let handle = notifier.notify_handle();
            threads.push(thread::spawn(move || {
                for j in 0..25 {
                    handle.notify(i * 25 + j);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        let mut items = notifier.drain();
        items.sort_unstable();
        assert_eq!(items, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_socket_pair_variant() {
        let mut notifier: Notifier<u8> = Notifier::with_wakeup(WakeupKind::SocketPair).unwrap();
        let handle = notifier.notify_handle();

        handle.notify(42);
        assert_eq!(notifier.drain(), vec![42]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut notifier: Notifier<u8> = Notifier::new().unwrap();
        let handle = notifier.notify_handle();

        notifier.close();
        notifier.close();

        assert!(notifier.is_closed());
        handle.notify(1);
        assert!(notifier.drain().is_empty());
    }

    #[test]
    fn test_len_tracking() {
        let mut notifier: Notifier<u8> = Notifier::new().unwrap();
        let handle = notifier.notify_handle();

        assert!(notifier.is_empty());
        handle.notify(1);
        handle.notify(2);
        assert_eq!(notifier.len(), 2);
        notifier.drain();
        assert!(notifier.is_empty());
    }
}
