//! # Emrt
//!
//! This library provides the core runtime services of a multi-task firmware
//! application for no_std targets: a message broker with QoS, a framed
//! byte-protocol engine, a cooperative/native task manager, a watchdog and a
//! diagnostics layer. All heavyweight state lives in one statically sized
//! memory arena whose layout is computed at build time from the capacity
//! constants in [`config`], requiring no dynamic memory allocation.
//!
//! ## Architecture
//!
//! ```text
//!              ┌─────────────────┐
//!              │  Static arena   │
//!              └────────┬────────┘
//!   ┌──────────┬────────┼─────────┬───────────┐
//!   ▼          ▼        ▼         ▼           ▼
//! ┌──────┐ ┌───────┐ ┌──────┐ ┌────────┐ ┌─────────┐
//! │Broker│ │Event  │ │Tasks │ │Protocol│ │  Pools  │
//! │ +QoS │ │ bus   │ │ +WDG │ │pipeline│ │         │
//! └──┬───┘ └───────┘ └──────┘ └───┬────┘ └─────────┘
//!    │                            │
//!    ▼                            ▼
//! per-task mailboxes        ring → parser → dispatch
//! (topic × priority shards)  (SYNC|OP|LEN|DATA|CHK)
//! ```
//!
//! Components:
//! * _Arena_ carves one byte buffer into 8-byte-aligned regions sized from
//!   the capacity budget; region singletons are placement-constructed on
//!   first access and live for the rest of the program.
//! * _Broker_ delivers published messages into per-task mailboxes, sharded
//!   per topic into high/normal circular queues, with configurable overflow
//!   policy and task notification on arrival.
//! * _QoS_ adds ACK-based retransmission and per-sender monotonic ordering
//!   on top of the broker; the distributed state machine coordinates
//!   majority commits over the same bus.
//! * _Protocol_ turns a raw byte stream into validated packets
//!   (Fletcher-16 framing) and dispatches them to opcode handlers; the
//!   field codec maps packets onto application structs.
//! * _Task manager_ runs cooperative tasks from a priority scheduler pass
//!   and wraps native RTOS tasks in an instrumented trampoline.
//! * _Watchdog_ tracks per-task feed deadlines and executes recovery
//!   actions.
//!
//! ## Concurrency model
//!
//! Shared runtime objects are generic over an `embassy-sync` `RawMutex`.
//! Firmware typically selects `CriticalSectionRawMutex`; every lock is held
//! for a short, bounded section and task notification is always issued
//! after the owning lock has been released. Blocking receives park the
//! calling task on the platform's notification primitive.
//!
//! The platform itself (time, delays, task primitives, reset) is supplied
//! by the integrator through the [`emrt_platform::Platform`] trait at
//! [`runtime::init`].
#![no_std]

pub use emrt_core as core;
pub use emrt_platform as platform;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod config;
pub mod diagnostics;
pub mod event;
pub mod memory;
pub mod messaging;
pub mod protocol;
pub mod runtime;
pub mod task;
