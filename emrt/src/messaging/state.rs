//! Distributed state coordination over the broker
//!
//! Single-bus, in-process majority commit: a proposer publishes its
//! candidate state, peers ACK when their acceptance predicate passes, and
//! once `⌊MaxPeers/2⌋ + 1` ACKs have accumulated (the proposer counts
//! itself) the proposer adopts the state and publishes a commit that every
//! peer applies. Coordination payloads ride small messages; framing fields
//! are little-endian, the state body is an opaque byte image.

use heapless::LinearMap;

use crate::core::{TaskId, TopicId};
use crate::platform::Platform;

use super::broker::Broker;
use super::types::{SmallMessage, BROADCAST_RECEIVER};

/// Byte image of a replicated state value
///
/// `WIRE_SIZE + 4` must fit the small-message payload (the proposal frame
/// carries a sequence and a sender in front of the state bytes).
pub trait StateCodec: Copy {
    const WIRE_SIZE: usize;

    fn encode(&self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Option<Self>;
}

/// The three coordination topics of one state instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateTopics {
    pub propose: TopicId,
    pub ack: TopicId,
    pub commit: TopicId,
}

struct PendingProposal<S> {
    state: S,
    acks: u16,
}

pub struct DistributedState<
    'a,
    S: StateCodec,
    const MAX_PEERS: usize,
    const MAX_OUTSTANDING: usize = 4,
> {
    broker: &'a dyn Broker<SmallMessage>,
    platform: &'static dyn Platform,
    self_task: TaskId,
    topics: StateTopics,
    state: S,
    pending: LinearMap<u16, PendingProposal<S>, MAX_OUTSTANDING>,
    local_seq: u32,
}

impl<'a, S: StateCodec, const MAX_PEERS: usize, const MAX_OUTSTANDING: usize>
    DistributedState<'a, S, MAX_PEERS, MAX_OUTSTANDING>
{
    pub const MAJORITY: u16 = (MAX_PEERS / 2 + 1) as u16;

    pub fn new(
        broker: &'a dyn Broker<SmallMessage>,
        platform: &'static dyn Platform,
        self_task: TaskId,
        topics: StateTopics,
        initial: S,
    ) -> Self {
        const {
            assert!(
                S::WIRE_SIZE + 4 <= crate::config::SMALL_PAYLOAD_BYTES,
                "state image too large for a small-message proposal frame"
            )
        };
        Self {
            broker,
            platform,
            self_task,
            topics,
            state: initial,
            pending: LinearMap::new(),
            local_seq: 1,
        }
    }

    pub fn current(&self) -> S {
        self.state
    }

    /// Start a new proposal. Returns the proposal sequence, or 0 when the
    /// outstanding-proposal table is full.
    pub fn propose(&mut self, new_state: S) -> u16 {
        if self.pending.len() >= MAX_OUTSTANDING {
            return 0;
        }
        let seq = self.next_seq();
        let _ = self.pending.insert(
            seq,
            PendingProposal {
                state: new_state,
                acks: 1,
            },
        );

        let mut msg = SmallMessage::new();
        msg.header.receiver_id = BROADCAST_RECEIVER;
        msg.header.sequence = seq;
        msg.header.timestamp = self.platform.now_us();
        msg.header.payload_size = Self::encode_proposal(
            &mut msg.payload,
            seq,
            self.self_task.into_u16(),
            &new_state,
        );
        let _ = self
            .broker
            .publish(self.topics.propose, &mut msg, self.self_task);
        seq
    }

    /// Feed one coordination message. `guard` decides proposal acceptance
    /// from `(current, proposed)`.
    pub fn process_message(
        &mut self,
        msg: &SmallMessage,
        guard: impl Fn(&S, &S) -> bool,
    ) {
        let kind = msg.header.kind;
        if kind == self.topics.propose.into_u16() {
            self.on_propose(msg, guard);
        } else if kind == self.topics.ack.into_u16() {
            self.on_ack(msg);
        } else if kind == self.topics.commit.into_u16() {
            self.on_commit(msg);
        }
    }

    fn on_propose(&mut self, msg: &SmallMessage, guard: impl Fn(&S, &S) -> bool) {
        let Some((seq, from, proposed)) = Self::decode_proposal(msg) else {
            return;
        };
        if from == self.self_task.into_u16() {
            return;
        }
        if guard(&self.state, &proposed) {
            let mut ack = SmallMessage::new();
            ack.header.receiver_id = from;
            ack.header.sequence = seq;
            ack.header.timestamp = self.platform.now_us();
            ack.header.payload_size =
                Self::encode_ack(&mut ack.payload, seq, self.self_task.into_u16(), true);
            let _ = self.broker.publish(self.topics.ack, &mut ack, self.self_task);
        }
    }

    fn on_ack(&mut self, msg: &SmallMessage) {
        let Some((seq, _from, accept)) = Self::decode_ack(msg) else {
            return;
        };
        if !accept {
            return;
        }
        let Some(info) = self.pending.get_mut(&seq) else {
            return;
        };
        info.acks += 1;
        if info.acks >= Self::MAJORITY {
            self.state = info.state;

            let mut commit = SmallMessage::new();
            commit.header.receiver_id = BROADCAST_RECEIVER;
            commit.header.sequence = seq;
            commit.header.timestamp = self.platform.now_us();
            commit.header.payload_size =
                Self::encode_commit(&mut commit.payload, seq, &self.state);
            let _ = self
                .broker
                .publish(self.topics.commit, &mut commit, self.self_task);
            let _ = self.pending.remove(&seq);
        }
    }

    fn on_commit(&mut self, msg: &SmallMessage) {
        if let Some((_seq, committed)) = Self::decode_commit(msg) {
            self.state = committed;
        }
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.local_seq as u16;
        self.local_seq = self.local_seq.wrapping_add(1);
        if seq == 0 { self.next_seq() } else { seq }
    }

    fn encode_proposal(dst: &mut [u8], seq: u16, from: u16, state: &S) -> u16 {
        dst[0..2].copy_from_slice(&seq.to_le_bytes());
        dst[2..4].copy_from_slice(&from.to_le_bytes());
        state.encode(&mut dst[4..4 + S::WIRE_SIZE]);
        (4 + S::WIRE_SIZE) as u16
    }

    fn decode_proposal(msg: &SmallMessage) -> Option<(u16, u16, S)> {
        let payload = msg.payload();
        if payload.len() < 4 + S::WIRE_SIZE {
            return None;
        }
        let seq = u16::from_le_bytes([payload[0], payload[1]]);
        let from = u16::from_le_bytes([payload[2], payload[3]]);
        let state = S::decode(&payload[4..4 + S::WIRE_SIZE])?;
        Some((seq, from, state))
    }

    fn encode_ack(dst: &mut [u8], seq: u16, from: u16, accept: bool) -> u16 {
        dst[0..2].copy_from_slice(&seq.to_le_bytes());
        dst[2..4].copy_from_slice(&from.to_le_bytes());
        dst[4] = u8::from(accept);
        5
    }

    fn decode_ack(msg: &SmallMessage) -> Option<(u16, u16, bool)> {
        let payload = msg.payload();
        if payload.len() < 5 {
            return None;
        }
        let seq = u16::from_le_bytes([payload[0], payload[1]]);
        let from = u16::from_le_bytes([payload[2], payload[3]]);
        Some((seq, from, payload[4] != 0))
    }

    fn encode_commit(dst: &mut [u8], seq: u16, state: &S) -> u16 {
        dst[0..2].copy_from_slice(&seq.to_le_bytes());
        state.encode(&mut dst[2..2 + S::WIRE_SIZE]);
        (2 + S::WIRE_SIZE) as u16
    }

    fn decode_commit(msg: &SmallMessage) -> Option<(u16, S)> {
        let payload = msg.payload();
        if payload.len() < 2 + S::WIRE_SIZE {
            return None;
        }
        let seq = u16::from_le_bytes([payload[0], payload[1]]);
        let state = S::decode(&payload[2..2 + S::WIRE_SIZE])?;
        Some((seq, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Mode(u32);

    impl StateCodec for Mode {
        const WIRE_SIZE: usize = 4;

        fn encode(&self, out: &mut [u8]) {
            out[..4].copy_from_slice(&self.0.to_le_bytes());
        }

        fn decode(bytes: &[u8]) -> Option<Self> {
            Some(Mode(u32::from_le_bytes(bytes[..4].try_into().ok()?)))
        }
    }

    #[test]
    fn test_majority_threshold() {
        assert_eq!(DistributedState::<Mode, 5>::MAJORITY, 3);
        assert_eq!(DistributedState::<Mode, 4>::MAJORITY, 3);
        assert_eq!(DistributedState::<Mode, 1>::MAJORITY, 1);
    }

    #[test]
    fn test_proposal_wire_round_trip() {
        let mut msg = SmallMessage::new();
        msg.header.payload_size = DistributedState::<Mode, 5>::encode_proposal(
            &mut msg.payload,
            7,
            2,
            &Mode(0xdead_beef),
        );
        assert_eq!(msg.header.payload_size, 8);
        let (seq, from, state) =
            DistributedState::<Mode, 5>::decode_proposal(&msg).unwrap();
        assert_eq!((seq, from, state), (7, 2, Mode(0xdead_beef)));
    }
}
