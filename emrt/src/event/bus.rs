//! Bounded event queue with handler registrations
//!
//! Handlers are plain function pointers matched by ident (category and
//! code, each with a wildcard). `process` pops queued events and invokes
//! the matching handlers in registration order, outside the bus lock, so
//! handlers may post follow-up events.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{Deque, Vec};

use crate::core::{Error, Result};

use super::{Event, EventId};

pub type EventHandler = fn(&Event);

struct Registration {
    ident: EventId,
    handler: EventHandler,
    active: bool,
}

struct BusInner<const MAX_HANDLERS: usize, const QUEUE_CAP: usize> {
    handlers: Vec<Registration, MAX_HANDLERS>,
    queue: Deque<Event, QUEUE_CAP>,
}

pub struct EventBus<M: RawMutex, const MAX_HANDLERS: usize, const QUEUE_CAP: usize> {
    inner: Mutex<M, RefCell<BusInner<MAX_HANDLERS, QUEUE_CAP>>>,
}

impl<M: RawMutex, const MAX_HANDLERS: usize, const QUEUE_CAP: usize>
    EventBus<M, MAX_HANDLERS, QUEUE_CAP>
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(BusInner {
                handlers: Vec::new(),
                queue: Deque::new(),
            })),
        }
    }

    pub fn register_handler(&self, ident: EventId, handler: EventHandler) -> Result<()> {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            inner
                .handlers
                .push(Registration {
                    ident,
                    handler,
                    active: true,
                })
                .map_err(|_| Error::OutOfMemory)?;
            Ok(())
        })
    }

    /// Deactivate the first active registration with this exact ident
    pub fn unregister_handler(&self, ident: EventId) -> Result<()> {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            for registration in inner.handlers.iter_mut() {
                if registration.active
                    && registration.ident.category == ident.category
                    && registration.ident.code == ident.code
                {
                    registration.active = false;
                    return Ok(());
                }
            }
            Err(Error::NotFound)
        })
    }

    /// Queue an event for a later `process` pass
    pub fn post(&self, event: Event) -> Result<()> {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            inner
                .queue
                .push_back(event)
                .map_err(|_| Error::OutOfMemory)?;
            Ok(())
        })
    }

    /// Pop up to `max_events` queued events and dispatch each to every
    /// matching active handler. Returns the number of events processed.
    pub fn process(&self, max_events: usize) -> usize {
        let mut count = 0;
        while count < max_events {
            let Some(event) = self.inner.lock(|cell| cell.borrow_mut().queue.pop_front())
            else {
                break;
            };
            self.dispatch(&event);
            count += 1;
        }
        count
    }

    /// Dispatch immediately to all matching handlers, bypassing the queue
    pub fn dispatch(&self, event: &Event) {
        let handlers = self.matching_handlers(&event.ident);
        for handler in handlers {
            handler(event);
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().queue.len())
    }

    pub fn active_handlers(&self) -> usize {
        self.inner.lock(|cell| {
            cell.borrow()
                .handlers
                .iter()
                .filter(|r| r.active)
                .count()
        })
    }

    /// Snapshot the matching handlers so invocation runs outside the lock
    fn matching_handlers(&self, ident: &EventId) -> Vec<EventHandler, MAX_HANDLERS> {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            let mut matching = Vec::new();
            for registration in inner.handlers.iter() {
                if registration.active && registration.ident.matches(ident) {
                    let _ = matching.push(registration.handler);
                }
            }
            matching
        })
    }
}

impl<M: RawMutex, const MAX_HANDLERS: usize, const QUEUE_CAP: usize> Default
    for EventBus<M, MAX_HANDLERS, QUEUE_CAP>
{
    fn default() -> Self {
        Self::new()
    }
}
