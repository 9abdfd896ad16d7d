//! Opcode dispatch table
//!
//! Fixed capacity, replace-on-register, no locks: registration happens at
//! configuration time, dispatch from the pipeline's processing context.

use heapless::Vec;

use crate::core::{Error, Result};

use super::parser::Packet;

pub type CommandHandler<const MAX_PAYLOAD: usize> = fn(&Packet<MAX_PAYLOAD>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterOutcome {
    New,
    Replaced,
}

struct Entry<const MAX_PAYLOAD: usize> {
    opcode: u8,
    handler: CommandHandler<MAX_PAYLOAD>,
}

pub struct CommandDispatcher<const MAX_HANDLERS: usize, const MAX_PAYLOAD: usize> {
    table: Vec<Entry<MAX_PAYLOAD>, MAX_HANDLERS>,
    fallback: Option<CommandHandler<MAX_PAYLOAD>>,
}

impl<const MAX_HANDLERS: usize, const MAX_PAYLOAD: usize>
    CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD>
{
    pub const fn capacity() -> usize {
        MAX_HANDLERS
    }

    pub const fn new() -> Self {
        Self {
            table: Vec::new(),
            fallback: None,
        }
    }

    /// Register a handler, replacing in place on a duplicate opcode.
    /// `OutOfMemory` when the table is full.
    pub fn register_handler(
        &mut self,
        opcode: u8,
        handler: CommandHandler<MAX_PAYLOAD>,
    ) -> Result<RegisterOutcome> {
        for entry in self.table.iter_mut() {
            if entry.opcode == opcode {
                entry.handler = handler;
                return Ok(RegisterOutcome::Replaced);
            }
        }
        self.table
            .push(Entry { opcode, handler })
            .map_err(|_| Error::OutOfMemory)?;
        Ok(RegisterOutcome::New)
    }

    /// Remove the handler for `opcode`; true if one was removed
    pub fn deregister_handler(&mut self, opcode: u8) -> bool {
        match self.table.iter().position(|e| e.opcode == opcode) {
            Some(idx) => {
                // Compact by swapping the last live entry into the hole
                self.table.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn has_handler(&self, opcode: u8) -> bool {
        self.handler(opcode).is_some()
    }

    pub fn handler(&self, opcode: u8) -> Option<CommandHandler<MAX_PAYLOAD>> {
        self.table
            .iter()
            .find(|e| e.opcode == opcode)
            .map(|e| e.handler)
    }

    /// Handler invoked when no opcode matches
    pub fn set_fallback_handler(&mut self, handler: CommandHandler<MAX_PAYLOAD>) {
        self.fallback = Some(handler);
    }

    pub fn clear(&mut self) {
        self.table.clear();
        self.fallback = None;
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn dispatch(&self, packet: &Packet<MAX_PAYLOAD>) {
        for entry in self.table.iter() {
            if entry.opcode == packet.opcode {
                (entry.handler)(packet);
                return;
            }
        }
        if let Some(fallback) = self.fallback {
            fallback(packet);
        }
    }
}

impl<const MAX_HANDLERS: usize, const MAX_PAYLOAD: usize> Default
    for CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD>
{
    fn default() -> Self {
        Self::new()
    }
}
