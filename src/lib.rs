//! A single-threaded readiness reactor over `mio`.
//!
//! One thread owns an [`EventCycle`] and drives it with
//! [`run_cycle`](EventCycle::run_cycle); every other thread talks to the loop
//! through a cloneable [`CycleController`] that enqueues commands and wakes
//! the poller. Each pass of the loop waits for readiness, applies queued
//! commands in FIFO order, invokes the read/write handlers of ready
//! resources, and lazily reconciles the poller's registrations with the
//! per-resource state in the [`ContextStore`].
//!
//! The reactor watches resources, it does not own them: callers keep the
//! file descriptors alive and close them after unwatching.
//!
//! ```no_run
//! use std::io::Write;
//! use std::os::unix::io::AsRawFd;
//! use std::time::Duration;
//!
//! use event_cycle::{Dispatch, EventCycle, Handle};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cycle = EventCycle::new()?;
//!     let (mut tx, rx) = mio::unix::pipe::new()?;
//!
//!     cycle.watch(
//!         Handle::from(rx.as_raw_fd()),
//!         None,
//!         Some(Box::new(|handle, _extra, _done| {
//!             println!("{:?} is readable", handle);
//!             Ok(Dispatch::Done(true))
//!         })),
//!         None,
//!         None,
//!     );
//!
//!     tx.write_all(b"ping")?;
//!     cycle.run_cycle(true, Some(Duration::from_millis(100)))?;
//!     cycle.run_cycle(true, Some(Duration::from_millis(100)))?;
//!     cycle.close();
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod notifier;
pub mod poll;
pub mod reactor;

pub use context::{ContextSnapshot, ContextStore, ContextUpdate};
pub use error::{BoxError, CycleError, Result};
pub use event::{Direction, EventMask, Handle};
pub use handler::{AsyncResult, Dispatch, ErrorHandler, Extra, IoHandler, Settled};
pub use notifier::{Notifier, NotifyHandle, WakeupKind};
pub use poll::{MioPoller, Multiplexer};
pub use reactor::{Command, CycleConfig, CycleController, DoneCallback, EventCycle};

pub mod prelude {
    pub use crate::error::{CycleError, Result};
    pub use crate::event::{Direction, EventMask, Handle};
    pub use crate::handler::{AsyncResult, Dispatch, Settled};
    pub use crate::reactor::{CycleConfig, CycleController, DoneCallback, EventCycle};
}
