//! The reactor core: one thread multiplexing many resources over a single
//! readiness primitive.
//!
//! ```text
//! other threads                      loop thread
//! ┌─────────────────┐   Command    ┌─────────────────────────────┐
//! │ CycleController │─────────────▶│  EventCycle::run_cycle      │
//! │ DoneCallback    │  (Notifier)  │   1. wait on Multiplexer    │
//! └─────────────────┘              │   2. drain commands (FIFO)  │
//!                                  │   3. dispatch read/write    │
//!                                  │   4. reconcile changed set  │
//!                                  └─────────────────────────────┘
//! ```
//!
//! Every context and registration-table mutation happens on the loop thread;
//! other threads only enqueue commands. That single-writer discipline is the
//! crate's one concurrency invariant and removes any need for locks around
//! the hot state.

use std::io;
use std::time::Duration;

use crate::context::ContextStore;
use crate::error::{CycleError, Result};
use crate::event::{Direction, EventMask, Handle};
use crate::handler::{Dispatch, ErrorHandler, Extra, IoHandler, Settled};
use crate::notifier::{Notifier, NotifyHandle, WakeupKind};
use crate::poll::{MioPoller, Multiplexer, DEFAULT_EVENTS_CAPACITY};

/// Intent injected into the loop thread through the notifier.
pub enum Command {
    Watch {
        handle: Handle,
        extra: Option<Extra>,
        on_read: Option<IoHandler>,
        on_write: Option<IoHandler>,
        on_error: Option<ErrorHandler>,
    },
    Unwatch(Handle),
    ReadDone { handle: Handle, resume: bool },
    WriteDone { handle: Handle, resume: bool },
    Shutdown,
}

/// Completion signal handed to read/write handlers.
///
/// Calling [`done`](Self::done) never mutates reactor state directly; it
/// enqueues a `ReadDone`/`WriteDone` command, keeping all mutation on the
/// loop thread. Once the reactor has been closed the callback is a silent
/// no-op. `resume = false` drops the handler instead of re-arming it;
/// already-running work is never interrupted.
#[derive(Clone)]
pub struct DoneCallback {
    notify: NotifyHandle<Command>,
    handle: Handle,
    direction: Direction,
}

impl DoneCallback {
    pub fn done(&self, resume: bool) {
        let command = match self.direction {
            Direction::Read => Command::ReadDone {
                handle: self.handle,
                resume,
            },
            Direction::Write => Command::WriteDone {
                handle: self.handle,
                resume,
            },
        };
        self.notify.notify(command);
    }
}

/// Thread-safe surface of a running reactor: enqueue watch/unwatch intents
/// or ask the loop to stop. Obtained from [`EventCycle::controller`] and
/// cheap to clone across threads.
#[derive(Clone)]
pub struct CycleController {
    notify: NotifyHandle<Command>,
}

impl CycleController {
    pub fn watch(
        &self,
        handle: Handle,
        extra: Option<Extra>,
        on_read: Option<IoHandler>,
        on_write: Option<IoHandler>,
        on_error: Option<ErrorHandler>,
    ) {
        self.notify.notify(Command::Watch {
            handle,
            extra,
            on_read,
            on_write,
            on_error,
        });
    }

    pub fn unwatch(&self, handle: Handle) {
        self.notify.notify(Command::Unwatch(handle));
    }

    /// Signals the loop to stop after finishing the current pass.
    pub fn shutdown(&self) {
        self.notify.notify(Command::Shutdown);
    }
}

/// Construction-time configuration.
#[derive(Debug, Clone, Copy)]
pub struct CycleConfig {
    events_capacity: usize,
    wakeup: WakeupKind,
}

impl Default for CycleConfig {
    fn default() -> Self {
        CycleConfig {
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            wakeup: WakeupKind::default(),
        }
    }
}

impl CycleConfig {
    pub fn new() -> Self {
        CycleConfig::default()
    }

    /// Maximum readiness events reported per wait.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Wakeup transport for the cross-thread notifier.
    pub fn wakeup(mut self, kind: WakeupKind) -> Self {
        self.wakeup = kind;
        self
    }
}

/// The event dispatcher.
///
/// Owns the context store, the notifier's consuming half, and the
/// multiplexer. `watch`/`unwatch` only enqueue commands and are therefore
/// safe and idempotent from the caller's perspective; their effects apply
/// during the next command drain.
pub struct EventCycle<M: Multiplexer = MioPoller> {
    store: ContextStore,
    multiplexer: M,
    notifier: Notifier<Command>,
    notify: NotifyHandle<Command>,
    error_handler: Option<ErrorHandler>,
}

impl EventCycle<MioPoller> {
    /// Reactor over a fresh mio poller with default configuration.
    pub fn new() -> io::Result<Self> {
        Self::with_config(CycleConfig::default())
    }

    pub fn with_config(config: CycleConfig) -> io::Result<Self> {
        let poller = MioPoller::with_capacity(config.events_capacity)?;
        Self::with_parts(poller, config.wakeup)
    }
}

impl<M: Multiplexer> EventCycle<M> {
    /// Reactor over a caller-supplied multiplexer.
    pub fn with_multiplexer(multiplexer: M) -> io::Result<Self> {
        Self::with_parts(multiplexer, WakeupKind::default())
    }

    fn with_parts(mut multiplexer: M, wakeup: WakeupKind) -> io::Result<Self> {
        let notifier = Notifier::with_wakeup(wakeup)?;
        multiplexer.register(notifier.handle(), EventMask::READ)?;
        let notify = notifier.notify_handle();
        Ok(EventCycle {
            store: ContextStore::new(),
            multiplexer,
            notifier,
            notify,
            error_handler: None,
        })
    }

    /// Reactor-wide fallback error handler, consulted after any per-resource
    /// handler and before the built-in fail-loud fallback.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.error_handler = handler;
    }

    /// Read-only view of the context store.
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Handle of the notifier's wakeup channel, as seen by the multiplexer.
    pub fn notifier_handle(&self) -> Handle {
        self.notifier.handle()
    }

    pub fn controller(&self) -> CycleController {
        CycleController {
            notify: self.notify.clone(),
        }
    }

    /// Requests that `handle` be watched with the given data and handlers.
    /// Deferred to the next command drain; repeated calls simply replace the
    /// configuration.
    pub fn watch(
        &self,
        handle: Handle,
        extra: Option<Extra>,
        on_read: Option<IoHandler>,
        on_write: Option<IoHandler>,
        on_error: Option<ErrorHandler>,
    ) {
        self.notify.notify(Command::Watch {
            handle,
            extra,
            on_read,
            on_write,
            on_error,
        });
    }

    /// Requests that `handle` stop being watched. Deferred; an in-flight
    /// operation completes before the context is discarded.
    pub fn unwatch(&self, handle: Handle) {
        self.notify.notify(Command::Unwatch(handle));
    }

    /// Runs the dispatch loop.
    ///
    /// Each pass waits for readiness, applies queued commands in FIFO order,
    /// dispatches ready I/O, and reconciles the multiplexer's registration
    /// table against the changed contexts. With `run_once` the method
    /// returns after a single full pass; otherwise it loops until a
    /// `Shutdown` command or an error handler asks for a stop.
    ///
    /// Errors are resolved through the layered chain (per-resource handler,
    /// then the reactor-wide handler): a `true` return keeps the loop
    /// running, `false` stops it without raising, and with no handler the
    /// error is returned from this method.
    pub fn run_cycle(&mut self, run_once: bool, timeout: Option<Duration>) -> Result<()> {
        loop {
            let mut ready = match self.multiplexer.wait(timeout) {
                Ok(ready) => ready,
                Err(cause) => {
                    let error = CycleError::select("readiness wait failed", cause);
                    if self.route_error(error, None, None)? {
                        // Recovered: re-issue the wait. There is no ready set
                        // to process on this pass.
                        continue;
                    }
                    return Ok(());
                }
            };

            let notifier_handle = self.notifier.handle();
            if let Some(index) = ready.iter().position(|(handle, _)| *handle == notifier_handle) {
                ready.remove(index);
                for command in self.notifier.drain() {
                    if !self.apply_command(command) {
                        return Ok(());
                    }
                }
            }

            for (handle, mask) in ready {
                if self.store.is_invalid(handle) {
                    // Left over in the multiplexer; the reconcile pass below
                    // cleans it up.
                    self.store.mark_changed(handle);
                    continue;
                }
                if mask.is_readable() && !self.dispatch(handle, Direction::Read)? {
                    return Ok(());
                }
                if mask.is_writable() && !self.dispatch(handle, Direction::Write)? {
                    return Ok(());
                }
            }

            for handle in self.store.drain_changed() {
                if !self.reconcile(handle)? {
                    return Ok(());
                }
                self.store.discard_stale(handle);
            }

            if run_once {
                return Ok(());
            }
        }
    }

    /// Stops and tears down the reactor. Idempotent; safe after a failed
    /// cycle. Each teardown step is isolated so one failure cannot skip the
    /// rest.
    pub fn close(&mut self) {
        if self.notifier.is_closed() {
            return;
        }
        self.notify.notify(Command::Shutdown);
        for handle in self.multiplexer.handles() {
            if let Err(error) = self.multiplexer.unregister(handle) {
                log::warn!("close: failed to unregister {:?}: {}", handle, error);
            }
        }
        self.notifier.close();
        if let Err(error) = self.multiplexer.close() {
            log::warn!("close: failed to close multiplexer: {}", error);
        }
    }

    pub(crate) fn send(&self, command: Command) {
        self.notify.notify(command);
    }

    /// Applies one queued command; `false` means stop the loop.
    fn apply_command(&mut self, command: Command) -> bool {
        match command {
            Command::Watch {
                handle,
                extra,
                on_read,
                on_write,
                on_error,
            } => {
                self.store.create(handle, extra, on_read, on_write, on_error);
                true
            }
            Command::Unwatch(handle) => {
                self.store.remove(handle);
                true
            }
            Command::ReadDone { handle, resume } => {
                self.complete(handle, Direction::Read, resume);
                true
            }
            Command::WriteDone { handle, resume } => {
                self.complete(handle, Direction::Write, resume);
                true
            }
            Command::Shutdown => false,
        }
    }

    fn complete(&mut self, handle: Handle, direction: Direction, resume: bool) {
        self.store.set_pending(handle, direction, false);
        if !resume {
            self.store.set_handler(handle, direction, None);
        }
    }

    /// Invokes the handler for one ready direction; `Ok(false)` propagates a
    /// stop request from the error chain.
    fn dispatch(&mut self, handle: Handle, direction: Direction) -> Result<bool> {
        if self.store.pending(handle, direction) {
            return Ok(true);
        }
        let Some(mut handler) = self.store.take_handler(handle, direction) else {
            return Ok(true);
        };

        // Guard against re-entry before the handler even runs: a synchronous
        // completion enqueues its command rather than touching this flag.
        self.store.set_pending(handle, direction, true);

        let extra = self.store.extra(handle);
        let done = DoneCallback {
            notify: self.notify.clone(),
            handle,
            direction,
        };

        match handler(handle, extra, done.clone()) {
            Ok(Dispatch::Done(resume)) => {
                if resume {
                    self.store.restore_handler(handle, direction, handler);
                } else {
                    self.store.set_handler(handle, direction, None);
                }
                self.store.set_pending(handle, direction, false);
                Ok(true)
            }
            Ok(Dispatch::Pending(result)) => {
                self.store.restore_handler(handle, direction, handler);
                result.on_settled(Box::new(move |settled| {
                    done.done(settled == Settled::Completed);
                }));
                Ok(true)
            }
            Ok(Dispatch::Detached) => {
                self.store.restore_handler(handle, direction, handler);
                Ok(true)
            }
            Err(cause) => {
                // The resource stays armed: next readiness retries unless an
                // error handler decides otherwise.
                self.store.restore_handler(handle, direction, handler);
                self.store.set_pending(handle, direction, false);
                let error = match direction {
                    Direction::Read => CycleError::ReadHandler(cause),
                    Direction::Write => CycleError::WriteHandler(cause),
                };
                self.route_error(error, Some(handle), None)
            }
        }
    }

    /// Brings the multiplexer's entry for `handle` in line with the store.
    fn reconcile(&mut self, handle: Handle) -> Result<bool> {
        let registered = self.multiplexer.registered(handle);
        let invalid = self.store.is_invalid(handle);
        let mask = self.store.events(handle);

        let outcome = if invalid || mask.is_empty() {
            if registered {
                self.multiplexer.unregister(handle)
            } else {
                Ok(())
            }
        } else if registered {
            self.multiplexer.modify(handle, mask)
        } else {
            self.multiplexer.register(handle, mask)
        };

        match outcome {
            Ok(()) => Ok(true),
            Err(cause) => {
                let error = CycleError::select("registration update failed", cause);
                self.route_error(error, Some(handle), None)
            }
        }
    }

    /// Resolves an error through the layered chain: call-site override,
    /// per-resource handler, reactor-wide handler, then the fail-loud
    /// fallback. `Ok(true)` = recovered, `Ok(false)` = stop gracefully. A
    /// handler that panics propagates; there is no net around error
    /// handlers.
    fn route_error(
        &mut self,
        error: CycleError,
        target: Option<Handle>,
        override_handler: Option<&mut ErrorHandler>,
    ) -> Result<bool> {
        if let Some(handler) = override_handler {
            return Ok(handler(&error, &mut self.store, target));
        }

        if let Some(handle) = target {
            if let Some(mut handler) = self.store.take_error_handler(handle) {
                let recovered = handler(&error, &mut self.store, target);
                self.store.restore_error_handler(handle, handler);
                return Ok(recovered);
            }
        }

        if let Some(mut handler) = self.error_handler.take() {
            let recovered = handler(&error, &mut self.store, target);
            self.error_handler = Some(handler);
            return Ok(recovered);
        }

        Err(error)
    }
}
