//! emrt runtime core data types
//!
//! This crate provides the identifier, priority, flag and error types shared
//! by the other emrt crates. Emrt users should not depend on this crate
//! directly. Use the `emrt::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Task identifier
///
/// Doubles as the direct index into the task table and the mailbox table,
/// so the value space is bounded by the configured task capacity. The
/// all-ones value is reserved as "no task" on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u16);

impl TaskId {
    const RESERVED: u16 = 0xffff;
    pub const MAX: TaskId = TaskId(0xfffe);

    pub const fn new(value: u16) -> Option<Self> {
        if value != Self::RESERVED {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }

    /// Table index of this task
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<TaskId> for u16 {
    fn from(value: TaskId) -> Self {
        value.into_u16()
    }
}

impl From<TaskId> for usize {
    fn from(value: TaskId) -> Self {
        value.index()
    }
}

impl TryFrom<u16> for TaskId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> core::result::Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Topic identifier for the pub/sub broker
///
/// Any 16-bit value is a valid topic. The broker keeps its topic table
/// sorted by this value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TopicId(u16);

impl TopicId {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<TopicId> for u16 {
    fn from(value: TopicId) -> Self {
        value.into_u16()
    }
}

impl From<u16> for TopicId {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

/// Scheduling priority of a task
///
/// Higher numeric value wins arbitration in the cooperative scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskPriority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl TaskPriority {
    pub const MIN: TaskPriority = TaskPriority::Idle;
    pub const MAX: TaskPriority = TaskPriority::Critical;

    pub const fn try_from_u8(code: u8) -> Option<TaskPriority> {
        match code {
            0 => Some(TaskPriority::Idle),
            1 => Some(TaskPriority::Low),
            2 => Some(TaskPriority::Normal),
            3 => Some(TaskPriority::High),
            4 => Some(TaskPriority::Critical),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<TaskPriority> for u8 {
    fn from(value: TaskPriority) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Delivery priority of a message
///
/// `High` and above route into the high shard of the per-topic mailbox
/// queues and are drained before normal traffic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessagePriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl MessagePriority {
    pub const fn try_from_u8(code: u8) -> Option<MessagePriority> {
        match code {
            0 => Some(MessagePriority::Low),
            1 => Some(MessagePriority::Normal),
            2 => Some(MessagePriority::High),
            3 => Some(MessagePriority::Critical),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }

    pub const fn is_high(self) -> bool {
        self.into_u8() >= MessagePriority::High.into_u8()
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl From<MessagePriority> for u8 {
    fn from(value: MessagePriority) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for MessagePriority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Message delivery flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    /// Sender expects an acknowledgment
    pub const REQUIRES_ACK: Self = Self(0x01);
    /// Deliver to all subscribers
    pub const BROADCAST: Self = Self(0x02);
    /// Route into the high shard regardless of priority
    pub const URGENT: Self = Self(0x04);
    /// Must not be dropped on overflow; the send is rejected instead
    pub const PERSISTENT: Self = Self(0x08);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flags: MessageFlags) -> bool {
        (self.0 & flags.0) == flags.0
    }

    pub const fn insert(&mut self, flags: MessageFlags) {
        self.0 |= flags.0;
    }

    pub const fn remove(&mut self, flags: MessageFlags) {
        self.0 &= !flags.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for MessageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for MessageFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

/// Receive timeout in milliseconds
///
/// The all-ones value means "wait forever".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout(u32);

impl Timeout {
    pub const NONE: Timeout = Timeout(0);
    pub const INFINITE: Timeout = Timeout(u32::MAX);

    pub const fn from_ms(ms: u32) -> Self {
        Self(ms)
    }

    pub const fn as_ms(self) -> u32 {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == u32::MAX
    }
}

/// Runtime error taxonomy
///
/// Every fallible operation across the runtime reports one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    InvalidParameter,
    OutOfMemory,
    Timeout,
    NotFound,
    AlreadyExists,
    NotInitialized,
    HardwareError,
}

pub type Result<T> = core::result::Result<T, Error>;
