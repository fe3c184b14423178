//! Per-resource state owned by the reactor thread.
//!
//! [`ContextStore`] holds one [`EventContext`] per watched handle plus a
//! change set of handles whose registration-relevant state moved since the
//! last reconciliation pass. The store is deliberately not thread-safe: every
//! mutation happens on the thread running the cycle, and other threads reach
//! it only indirectly through commands.
//!
//! Lifecycle of a context:
//!
//! ```text
//! unknown ──(any mutator)──> stale ──(create)──> active
//!    ▲                         │  ▲
//!    │                         │  └──(remove)── active
//!    └──(discard_stale, both pending flags clear)┘
//! ```
//!
//! A stale context is only ever removed by `discard_stale`, and never while a
//! read or write operation is still pending: an in-flight operation must be
//! allowed to complete and report back.

use std::collections::{HashMap, HashSet};

use crate::event::{Direction, EventMask, Handle};
use crate::handler::{ErrorHandler, Extra, IoHandler};

/// State record for a single watched resource.
pub struct EventContext {
    extra: Option<Extra>,
    read_handler: Option<IoHandler>,
    write_handler: Option<IoHandler>,
    error_handler: Option<ErrorHandler>,
    pending_read: bool,
    pending_write: bool,
    stale: bool,
}

impl EventContext {
    fn new() -> Self {
        EventContext {
            extra: None,
            read_handler: None,
            write_handler: None,
            error_handler: None,
            pending_read: false,
            pending_write: false,
            stale: false,
        }
    }

    fn handler_slot(&mut self, direction: Direction) -> &mut Option<IoHandler> {
        match direction {
            Direction::Read => &mut self.read_handler,
            Direction::Write => &mut self.write_handler,
        }
    }

    fn pending_slot(&mut self, direction: Direction) -> &mut bool {
        match direction {
            Direction::Read => &mut self.pending_read,
            Direction::Write => &mut self.pending_write,
        }
    }
}

/// Immutable snapshot of a context, safe to hand to external code.
///
/// Handler slots are reported as presence flags; boxed closures cannot be
/// cloned out of the store.
#[derive(Clone)]
pub struct ContextSnapshot {
    pub extra: Option<Extra>,
    pub has_read_handler: bool,
    pub has_write_handler: bool,
    pub has_error_handler: bool,
    pub pending_read: bool,
    pub pending_write: bool,
    pub stale: bool,
}

/// Partial update for [`ContextStore::modify`].
///
/// Fields left untouched keep their current value; `clear_*` explicitly
/// empties a slot.
#[derive(Default)]
pub struct ContextUpdate {
    extra: Option<Option<Extra>>,
    read_handler: Option<Option<IoHandler>>,
    write_handler: Option<Option<IoHandler>>,
    error_handler: Option<Option<ErrorHandler>>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        ContextUpdate::default()
    }

    pub fn extra(mut self, extra: Extra) -> Self {
        self.extra = Some(Some(extra));
        self
    }

    pub fn clear_extra(mut self) -> Self {
        self.extra = Some(None);
        self
    }

    pub fn read_handler(mut self, handler: IoHandler) -> Self {
        self.read_handler = Some(Some(handler));
        self
    }

    pub fn clear_read_handler(mut self) -> Self {
        self.read_handler = Some(None);
        self
    }

    pub fn write_handler(mut self, handler: IoHandler) -> Self {
        self.write_handler = Some(Some(handler));
        self
    }

    pub fn clear_write_handler(mut self) -> Self {
        self.write_handler = Some(None);
        self
    }

    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(Some(handler));
        self
    }

    pub fn clear_error_handler(mut self) -> Self {
        self.error_handler = Some(None);
        self
    }
}

/// Owns every [`EventContext`] plus the change set driving lazy multiplexer
/// reconciliation.
#[derive(Default)]
pub struct ContextStore {
    contexts: HashMap<Handle, EventContext>,
    changed: HashSet<Handle>,
}

impl ContextStore {
    pub fn new() -> Self {
        ContextStore::default()
    }

    /// Context for `handle`, created stale (and marked changed) if unknown.
    fn ensure(&mut self, handle: Handle) -> &mut EventContext {
        let changed = &mut self.changed;
        self.contexts.entry(handle).or_insert_with(|| {
            changed.insert(handle);
            let mut context = EventContext::new();
            context.stale = true;
            context
        })
    }

    /// Adds `handle` to the change set picked up by the next reconciliation.
    pub fn mark_changed(&mut self, handle: Handle) {
        self.changed.insert(handle);
    }

    /// Returns and clears the change set; later changes start a fresh set.
    pub fn drain_changed(&mut self) -> HashSet<Handle> {
        std::mem::take(&mut self.changed)
    }

    /// Installs (or fully replaces) a context's data and handlers, clearing
    /// staleness.
    pub fn create(
        &mut self,
        handle: Handle,
        extra: Option<Extra>,
        read_handler: Option<IoHandler>,
        write_handler: Option<IoHandler>,
        error_handler: Option<ErrorHandler>,
    ) {
        let context = self.ensure(handle);
        context.extra = extra;
        context.read_handler = read_handler;
        context.write_handler = write_handler;
        context.error_handler = error_handler;
        context.stale = false;
        self.changed.insert(handle);
    }

    /// Partially updates a context; untouched fields keep their value.
    pub fn modify(&mut self, handle: Handle, update: ContextUpdate) {
        let context = self.ensure(handle);
        if let Some(extra) = update.extra {
            context.extra = extra;
        }
        if let Some(handler) = update.read_handler {
            context.read_handler = handler;
        }
        if let Some(handler) = update.write_handler {
            context.write_handler = handler;
        }
        if let Some(handler) = update.error_handler {
            context.error_handler = handler;
        }
        self.changed.insert(handle);
    }

    /// Marks a context stale. The record stays in place until
    /// [`discard_stale`](Self::discard_stale) can safely drop it.
    pub fn remove(&mut self, handle: Handle) {
        let context = self.ensure(handle);
        context.stale = true;
        self.changed.insert(handle);
    }

    /// Snapshot copy of a context, or `None` if the handle is unknown.
    pub fn inspect(&self, handle: Handle) -> Option<ContextSnapshot> {
        self.contexts.get(&handle).map(|context| ContextSnapshot {
            extra: context.extra.clone(),
            has_read_handler: context.read_handler.is_some(),
            has_write_handler: context.write_handler.is_some(),
            has_error_handler: context.error_handler.is_some(),
            pending_read: context.pending_read,
            pending_write: context.pending_write,
            stale: context.stale,
        })
    }

    /// All currently known handles.
    pub fn targets(&self) -> impl Iterator<Item = Handle> + '_ {
        self.contexts.keys().copied()
    }

    pub fn has(&self, handle: Handle) -> bool {
        self.contexts.contains_key(&handle)
    }

    /// True if the handle is unknown or its context is stale.
    pub fn is_invalid(&self, handle: Handle) -> bool {
        match self.contexts.get(&handle) {
            Some(context) => context.stale,
            None => true,
        }
    }

    /// Readiness interest for `handle`: a direction's bit is set iff a
    /// handler is installed there and no operation is pending in that
    /// direction. This is what keeps a handler from being invoked again
    /// before its previous invocation completed.
    pub fn events(&self, handle: Handle) -> EventMask {
        let Some(context) = self.contexts.get(&handle) else {
            return EventMask::EMPTY;
        };
        let mut mask = EventMask::EMPTY;
        if context.read_handler.is_some() && !context.pending_read {
            mask |= EventMask::READ;
        }
        if context.write_handler.is_some() && !context.pending_write {
            mask |= EventMask::WRITE;
        }
        mask
    }

    /// Physically removes a context iff it is stale and neither pending flag
    /// is set.
    pub fn discard_stale(&mut self, handle: Handle) {
        if let Some(context) = self.contexts.get(&handle) {
            if context.stale && !context.pending_read && !context.pending_write {
                self.contexts.remove(&handle);
            }
        }
    }

    pub fn extra(&self, handle: Handle) -> Option<Extra> {
        self.contexts.get(&handle).and_then(|context| context.extra.clone())
    }

    pub fn set_extra(&mut self, handle: Handle, extra: Option<Extra>) {
        self.ensure(handle).extra = extra;
    }

    pub fn has_read_handler(&self, handle: Handle) -> bool {
        self.contexts
            .get(&handle)
            .is_some_and(|context| context.read_handler.is_some())
    }

    pub fn set_read_handler(&mut self, handle: Handle, handler: Option<IoHandler>) {
        self.set_handler(handle, Direction::Read, handler);
    }

    pub fn has_write_handler(&self, handle: Handle) -> bool {
        self.contexts
            .get(&handle)
            .is_some_and(|context| context.write_handler.is_some())
    }

    pub fn set_write_handler(&mut self, handle: Handle, handler: Option<IoHandler>) {
        self.set_handler(handle, Direction::Write, handler);
    }

    pub fn has_error_handler(&self, handle: Handle) -> bool {
        self.contexts
            .get(&handle)
            .is_some_and(|context| context.error_handler.is_some())
    }

    pub fn set_error_handler(&mut self, handle: Handle, handler: Option<ErrorHandler>) {
        self.ensure(handle).error_handler = handler;
    }

    pub fn pending_read(&self, handle: Handle) -> bool {
        self.pending(handle, Direction::Read)
    }

    pub fn set_pending_read(&mut self, handle: Handle, pending: bool) {
        self.set_pending(handle, Direction::Read, pending);
    }

    pub fn pending_write(&self, handle: Handle) -> bool {
        self.pending(handle, Direction::Write)
    }

    pub fn set_pending_write(&mut self, handle: Handle, pending: bool) {
        self.set_pending(handle, Direction::Write, pending);
    }

    /// Staleness flag; unknown handles report stale.
    pub fn stale(&self, handle: Handle) -> bool {
        self.is_invalid(handle)
    }

    pub fn set_stale(&mut self, handle: Handle, stale: bool) {
        let context = self.ensure(handle);
        context.stale = stale;
        self.changed.insert(handle);
    }

    pub fn has_handler(&self, handle: Handle, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.has_read_handler(handle),
            Direction::Write => self.has_write_handler(handle),
        }
    }

    pub fn set_handler(&mut self, handle: Handle, direction: Direction, handler: Option<IoHandler>) {
        *self.ensure(handle).handler_slot(direction) = handler;
        self.changed.insert(handle);
    }

    pub fn pending(&self, handle: Handle, direction: Direction) -> bool {
        self.contexts
            .get(&handle)
            .is_some_and(|context| match direction {
                Direction::Read => context.pending_read,
                Direction::Write => context.pending_write,
            })
    }

    pub fn set_pending(&mut self, handle: Handle, direction: Direction, pending: bool) {
        *self.ensure(handle).pending_slot(direction) = pending;
        self.changed.insert(handle);
    }

    /// Loans a handler out for invocation. Does not touch the change set;
    /// the dispatch path records its own state changes.
    pub(crate) fn take_handler(&mut self, handle: Handle, direction: Direction) -> Option<IoHandler> {
        self.contexts
            .get_mut(&handle)
            .and_then(|context| context.handler_slot(direction).take())
    }

    /// Returns a loaned handler to its slot without marking the handle
    /// changed.
    pub(crate) fn restore_handler(&mut self, handle: Handle, direction: Direction, handler: IoHandler) {
        *self.ensure(handle).handler_slot(direction) = Some(handler);
    }

    pub(crate) fn take_error_handler(&mut self, handle: Handle) -> Option<ErrorHandler> {
        self.contexts
            .get_mut(&handle)
            .and_then(|context| context.error_handler.take())
    }

    pub(crate) fn restore_error_handler(&mut self, handle: Handle, handler: ErrorHandler) {
        self.ensure(handle).error_handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Dispatch;

    fn noop_handler() -> IoHandler {
        Box::new(|_, _, _| Ok(Dispatch::Done(true)))
    }

    #[test]
    fn test_events_truth_table() {
        let handle = Handle::new(7);

        // (handler installed, pending) for all four combinations per direction
        for (installed, pending, expected) in [
            (false, false, false),
            (false, true, false),
            (true, false, true),
            (true, true, false),
        ] {
            let mut store = ContextStore::new();
            if installed {
                store.set_read_handler(handle, Some(noop_handler()));
            }
            store.set_pending_read(handle, pending);
            assert_eq!(store.events(handle).is_readable(), expected);

            let mut store = ContextStore::new();
            if installed {
                store.set_write_handler(handle, Some(noop_handler()));
            }
            store.set_pending_write(handle, pending);
            assert_eq!(store.events(handle).is_writable(), expected);
        }
    }

    #[test]
    fn test_create_then_remove_is_invalid() {
        let mut store = ContextStore::new();
        let handle = Handle::new(3);

        store.create(handle, None, Some(noop_handler()), None, None);
        assert!(!store.is_invalid(handle));

        store.remove(handle);
        assert!(store.is_invalid(handle));
        assert!(store.has(handle));
    }

    #[test]
    fn test_unknown_handle_defaults() {
        let store = ContextStore::new();
        let handle = Handle::new(11);

        assert!(store.is_invalid(handle));
        assert!(store.stale(handle));
        assert!(!store.has(handle));
        assert!(!store.pending_read(handle));
        assert!(store.events(handle).is_empty());
        assert!(store.inspect(handle).is_none());
    }

    #[test]
    fn test_implicit_creation_is_stale() {
        let mut store = ContextStore::new();
        let handle = Handle::new(5);

        store.set_pending_read(handle, false);
        assert!(store.has(handle));
        assert!(store.is_invalid(handle));
        assert!(store.drain_changed().contains(&handle));
    }

    #[test]
    fn test_discard_stale_requires_no_pending() {
        let mut store = ContextStore::new();
        let handle = Handle::new(9);

        store.create(handle, None, Some(noop_handler()), None, None);
        store.set_pending_read(handle, true);
        store.remove(handle);

        // pending operation in flight: the record must survive
        store.discard_stale(handle);
        assert!(store.has(handle));

        store.set_pending_read(handle, false);
        store.discard_stale(handle);
        assert!(!store.has(handle));
    }

    #[test]
    fn test_discard_ignores_active_contexts() {
        let mut store = ContextStore::new();
        let handle = Handle::new(2);

        store.create(handle, None, Some(noop_handler()), None, None);
        store.discard_stale(handle);
        assert!(store.has(handle));
    }

    #[test]
    fn test_drain_changed_resets() {
        let mut store = ContextStore::new();
        let first = Handle::new(1);
        let second = Handle::new(2);

        store.create(first, None, None, None, None);
        let drained = store.drain_changed();
        assert!(drained.contains(&first));

        store.remove(second);
        let drained = store.drain_changed();
        assert!(!drained.contains(&first));
        assert!(drained.contains(&second));
    }

    #[test]
    fn test_modify_partial_update() {
        let mut store = ContextStore::new();
        let handle = Handle::new(4);

        store.create(handle, None, Some(noop_handler()), Some(noop_handler()), None);
        store.modify(handle, ContextUpdate::new().clear_write_handler());

        assert!(store.has_read_handler(handle));
        assert!(!store.has_write_handler(handle));

        let extra: Extra = std::sync::Arc::new(42usize);
        store.modify(handle, ContextUpdate::new().extra(extra));
        let snapshot = store.inspect(handle).unwrap();
        let value = snapshot.extra.unwrap();
        assert_eq!(*value.downcast_ref::<usize>().unwrap(), 42);
    }

    #[test]
    fn test_inspect_is_a_copy() {
        let mut store = ContextStore::new();
        let handle = Handle::new(6);

        store.create(handle, None, Some(noop_handler()), None, None);
        let snapshot = store.inspect(handle).unwrap();

        store.set_read_handler(handle, None);
        assert!(snapshot.has_read_handler);
        assert!(!store.has_read_handler(handle));
    }

    #[test]
    fn test_handler_loan_roundtrip() {
        let mut store = ContextStore::new();
        let handle = Handle::new(8);

        store.create(handle, None, Some(noop_handler()), None, None);
        let handler = store.take_handler(handle, Direction::Read).unwrap();
        assert!(!store.has_read_handler(handle));

        store.restore_handler(handle, Direction::Read, handler);
        assert!(store.has_read_handler(handle));
    }
}
