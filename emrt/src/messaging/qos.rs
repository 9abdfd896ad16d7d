//! ACK-based delivery on top of the broker
//!
//! The publisher keeps every unacknowledged message in a pending table and
//! republishes it whenever the ACK timeout elapses. The subscriber enforces
//! per-(sender, topic) monotonic sequence numbers, dropping duplicates and
//! stale messages while still acknowledging them so the publisher stops
//! retransmitting. ACKs travel as small messages on a dedicated topic.

use heapless::LinearMap;

use crate::config;
use crate::core::{Error, MessageFlags, Result, TaskId, Timeout, TopicId};
use crate::platform::Platform;

use super::broker::Broker;
use super::types::{Envelope, MessageAck, SmallMessage};

struct PendingEntry<T> {
    msg: T,
    last_send_us: u64,
    attempts: u16,
}

/// At-least-once publisher
pub struct QosPublisher<'a, T: Envelope, const PENDING: usize = { config::QOS_PENDING_LIMIT }> {
    broker: &'a dyn Broker<T>,
    platform: &'static dyn Platform,
    from: TaskId,
    ack_topic: TopicId,
    ack_timeout_us: u64,
    pending: LinearMap<u16, PendingEntry<T>, PENDING>,
    local_seq: u32,
}

impl<'a, T: Envelope, const PENDING: usize> QosPublisher<'a, T, PENDING> {
    pub fn new(
        broker: &'a dyn Broker<T>,
        platform: &'static dyn Platform,
        from: TaskId,
        ack_topic: TopicId,
    ) -> Self {
        Self {
            broker,
            platform,
            from,
            ack_topic,
            ack_timeout_us: config::QOS_ACK_TIMEOUT_US,
            pending: LinearMap::new(),
            local_seq: 1,
        }
    }

    /// Override the retransmit interval
    pub fn with_ack_timeout_us(mut self, timeout_us: u64) -> Self {
        self.ack_timeout_us = timeout_us;
        self
    }

    /// Publish with `REQUIRES_ACK` set, remembering the message until the
    /// matching ACK arrives. Fails with `OutOfMemory` when the pending
    /// table is full.
    pub fn publish(&mut self, topic: TopicId, msg: &mut T) -> Result<()> {
        {
            let header = msg.header_mut();
            header.flags.insert(MessageFlags::REQUIRES_ACK);
            if header.timestamp == 0 {
                header.timestamp = self.platform.now_us();
            }
            if header.sequence == 0 {
                header.sequence = self.next_seq();
            }
            header.kind = topic.into_u16();
        }

        let entry = PendingEntry {
            msg: msg.clone(),
            last_send_us: self.platform.now_us(),
            attempts: 1,
        };
        self.pending
            .insert(msg.header().sequence, entry)
            .map_err(|_| Error::OutOfMemory)?;

        self.broker.publish(topic, msg, self.from)
    }

    /// Republish every pending message whose ACK timeout has elapsed
    pub fn pump_retransmit(&mut self) {
        let now = self.platform.now_us();
        for (_, entry) in self.pending.iter_mut() {
            if now.saturating_sub(entry.last_send_us) >= self.ack_timeout_us {
                entry.last_send_us = now;
                entry.attempts += 1;
                let topic = TopicId::new(entry.msg.header().kind);
                let mut msg = entry.msg.clone();
                let _ = self.broker.publish(topic, &mut msg, self.from);
            }
        }
    }

    pub fn on_ack(&mut self, ack: &MessageAck) {
        let _ = self.pending.remove(&ack.sequence);
    }

    /// Decode an ACK payload from a small message on the ACK topic.
    /// Returns whether the message was consumed.
    pub fn try_handle_ack_message(&mut self, msg: &SmallMessage) -> bool {
        if msg.header.kind != self.ack_topic.into_u16() {
            return false;
        }
        if msg.header.payload_size as usize != MessageAck::WIRE_SIZE {
            return false;
        }
        match MessageAck::from_bytes(msg.payload()) {
            Some(ack) => {
                self.on_ack(&ack);
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.local_seq as u16;
        self.local_seq = self.local_seq.wrapping_add(1);
        if seq == 0 { self.next_seq() } else { seq }
    }
}

/// Duplicate-suppressing subscriber
///
/// ACKs are sent through `ack_broker`, which may be the same instance as
/// the payload broker when `T` is itself the small envelope.
pub struct QosSubscriber<'a, T: Envelope, const TRACK: usize = { config::QOS_TRACK_LIMIT }> {
    broker: &'a dyn Broker<T>,
    ack_broker: &'a dyn Broker<SmallMessage>,
    platform: &'static dyn Platform,
    self_task: TaskId,
    ack_topic: TopicId,
    last_seq: LinearMap<u32, u16, TRACK>,
}

impl<'a, T: Envelope, const TRACK: usize> QosSubscriber<'a, T, TRACK> {
    pub fn new(
        broker: &'a dyn Broker<T>,
        ack_broker: &'a dyn Broker<SmallMessage>,
        platform: &'static dyn Platform,
        self_task: TaskId,
        ack_topic: TopicId,
    ) -> Self {
        Self {
            broker,
            ack_broker,
            platform,
            self_task,
            ack_topic,
            last_seq: LinearMap::new(),
        }
    }

    /// Receive with ordering enforcement. Duplicates and stale sequences
    /// are acknowledged and reported as `NotFound` so callers simply poll
    /// again.
    pub fn receive(&mut self, timeout: Timeout) -> Result<T> {
        let msg = self.broker.receive(self.self_task, timeout)?;
        let header = *msg.header();
        let key = (u32::from(header.sender_id) << 16) | u32::from(header.kind);
        let seq = header.sequence;

        if let Some(last) = self.last_seq.get_mut(&key) {
            // Wrap-aware: anything not strictly newer is a duplicate
            let delta = seq.wrapping_sub(*last) as i16;
            if delta <= 0 {
                self.send_ack(seq, header.sender_id, true);
                return Err(Error::NotFound);
            }
            *last = seq;
        } else {
            // Best effort: an overflowing tracking table stops ordering
            // enforcement for new peers but never rejects traffic
            let _ = self.last_seq.insert(key, seq);
        }

        if header.flags.contains(MessageFlags::REQUIRES_ACK) {
            self.send_ack(seq, header.sender_id, true);
        }
        Ok(msg)
    }

    fn send_ack(&mut self, sequence: u16, to_sender: u16, success: bool) {
        let ack = MessageAck {
            sequence,
            sender_id: to_sender,
            success,
            error_code: 0,
        };
        let mut ack_msg = SmallMessage::new();
        ack_msg.header.receiver_id = to_sender;
        ack_msg.header.timestamp = self.platform.now_us();
        if ack_msg.set_payload(&ack.to_bytes()).is_ok() {
            let _ = self
                .ack_broker
                .publish(self.ack_topic, &mut ack_msg, self.self_task);
        }
    }
}
