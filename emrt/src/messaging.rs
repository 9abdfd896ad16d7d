//! Pub/sub messaging: envelopes, broker, QoS, distributed state
//!
//! The broker delivers published messages into per-task mailboxes. A
//! mailbox is sharded per topic, and each topic shard splits into a high
//! and a normal circular queue so urgent traffic overtakes bulk traffic
//! without reordering either stream. The QoS layer and the distributed
//! state machine are thin clients of the [`Broker`] trait and work against
//! any broker instance, arena-resident or user-owned.

mod broker;
mod event_log;
mod qos;
mod state;
mod types;
mod zero_copy;

pub use broker::{Broker, MailboxRegistry, MailboxStats, MessageBroker, OverflowPolicy};
pub use event_log::{EventLog, EventLogStats};
pub use qos::{QosPublisher, QosSubscriber};
pub use state::{DistributedState, StateCodec, StateTopics};
pub use types::{
    Envelope, LargeMessage, MediumMessage, Message, MessageAck, MessageHeader, SmallMessage,
    BROADCAST_RECEIVER,
};
pub use zero_copy::{ZcHandle, ZcMessage, ZeroCopyPool, ZeroCopyStats};
