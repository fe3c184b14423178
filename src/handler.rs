//! Handler interfaces for read/write dispatch and error recovery.
//!
//! A read or write handler is a boxed closure invoked with the ready
//! [`Handle`], the opaque `extra` data bound at watch time, and a
//! [`DoneCallback`] for reporting completion. Its return value is an explicit
//! tagged result:
//!
//! - [`Dispatch::Done`]: the operation completed synchronously. `Done(false)`
//!   additionally drops the handler, deregistering interest in that direction.
//! - [`Dispatch::Pending`]: the operation continues elsewhere; the reactor
//!   attaches a settlement listener to the returned [`AsyncResult`] and keeps
//!   the direction's pending flag set until it settles.
//! - [`Dispatch::Detached`]: the handler kept the [`DoneCallback`] and will
//!   invoke it itself once its work finishes.

use std::any::Any;
use std::sync::Arc;

use crate::context::ContextStore;
use crate::error::{BoxError, CycleError};
use crate::event::Handle;
use crate::reactor::DoneCallback;

/// Opaque user data attached to a watched resource and passed to handlers.
pub type Extra = Arc<dyn Any + Send + Sync>;

/// Result of one read or write handler invocation.
pub enum Dispatch {
    /// Synchronous completion. `false` also drops the handler.
    Done(bool),
    /// Asynchronous completion; the reactor attaches a settlement listener.
    Pending(Box<dyn AsyncResult>),
    /// The handler will call its `DoneCallback` on its own later.
    Detached,
}

/// Terminal state of an asynchronous handler result.
///
/// `Failed` and `Cancelled` are both reported to the installing handler as
/// `resume = false`; the handler is dropped rather than re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Completed,
    Failed,
    Cancelled,
}

/// Minimal completion-signal contract for asynchronous handler results.
///
/// Anything that can report success, failure, or cancellation to a one-shot
/// listener qualifies; the reactor never inspects the result beyond that.
pub trait AsyncResult {
    fn on_settled(self: Box<Self>, listener: Box<dyn FnOnce(Settled) + Send>);
}

/// Read or write event handler.
pub type IoHandler =
    Box<dyn FnMut(Handle, Option<Extra>, DoneCallback) -> std::result::Result<Dispatch, BoxError> + Send>;

/// Error recovery handler.
///
/// Returns `true` to absorb the error and keep the loop running, `false` to
/// stop the loop gracefully. The handle is `None` for failures with no
/// specific resource, such as a failed readiness wait.
pub type ErrorHandler =
    Box<dyn FnMut(&CycleError, &mut ContextStore, Option<Handle>) -> bool + Send>;
