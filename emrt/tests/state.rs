use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emrt::core::{TaskId, TopicId};
use emrt::messaging::{
    DistributedState, MessageBroker, SmallMessage, StateCodec, StateTopics,
};
use emrt_platform::host::HostPlatform;

type CoordBroker = MessageBroker<CriticalSectionRawMutex, SmallMessage, 8>;

const TOPICS: StateTopics = StateTopics {
    propose: TopicId::new(10),
    ack: TopicId::new(11),
    commit: TopicId::new(12),
};

const PEERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OperatingMode(u32);

impl StateCodec for OperatingMode {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.0.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self(u32::from_le_bytes(bytes[..4].try_into().ok()?)))
    }
}

fn setup() -> (&'static HostPlatform, &'static CoordBroker) {
    let platform = Box::leak(Box::new(HostPlatform::new()));
    let broker = Box::leak(Box::new(CoordBroker::new(platform)));
    for id in 0..PEERS as u16 {
        let task = TaskId::new(id).unwrap();
        broker.register_task(task, None).unwrap();
        broker.subscribe(TOPICS.propose, task).unwrap();
        broker.subscribe(TOPICS.ack, task).unwrap();
        broker.subscribe(TOPICS.commit, task).unwrap();
    }
    (platform, broker)
}

fn drain(
    broker: &'static CoordBroker,
    peer: &mut DistributedState<'static, OperatingMode, PEERS>,
    task: TaskId,
    accept: bool,
) {
    while let Ok(msg) = broker.try_receive(task) {
        peer.process_message(&msg, |_, _| accept);
    }
}

#[test]
fn test_majority_commit() {
    let (platform, broker) = setup();
    let initial = OperatingMode(0);

    let mut peers: Vec<DistributedState<'static, OperatingMode, PEERS>> = (0..PEERS as u16)
        .map(|id| {
            DistributedState::new(broker, platform, TaskId::new(id).unwrap(), TOPICS, initial)
        })
        .collect();

    // Peer 0 proposes; peers 1 and 2 accept, peers 3 and 4 reject
    let proposed = OperatingMode(42);
    let seq = peers[0].propose(proposed);
    assert_ne!(seq, 0);
    assert_eq!(peers[0].current(), initial);

    for (idx, accept) in [(1, true), (2, true), (3, false), (4, false)] {
        let task = TaskId::new(idx as u16).unwrap();
        drain(broker, &mut peers[idx], task, accept);
        assert_eq!(peers[idx].current(), initial);
    }

    // Two ACKs plus the proposer's own vote reach the majority of 3; the
    // proposer adopts and publishes the commit
    drain(broker, &mut peers[0], TaskId::new(0).unwrap(), true);
    assert_eq!(peers[0].current(), proposed);

    // Every peer adopts on commit, including the rejecting ones
    for idx in 1..PEERS {
        let task = TaskId::new(idx as u16).unwrap();
        drain(broker, &mut peers[idx], task, false);
        assert_eq!(peers[idx].current(), proposed);
    }
}

#[test]
fn test_minority_never_commits() {
    let (platform, broker) = setup();
    let initial = OperatingMode(0);

    let mut peers: Vec<DistributedState<'static, OperatingMode, PEERS>> = (0..PEERS as u16)
        .map(|id| {
            DistributedState::new(broker, platform, TaskId::new(id).unwrap(), TOPICS, initial)
        })
        .collect();

    let seq = peers[0].propose(OperatingMode(7));
    assert_ne!(seq, 0);

    // Only one peer accepts: 2 votes < 3
    for (idx, accept) in [(1, true), (2, false), (3, false), (4, false)] {
        let task = TaskId::new(idx as u16).unwrap();
        drain(broker, &mut peers[idx], task, accept);
    }
    drain(broker, &mut peers[0], TaskId::new(0).unwrap(), true);

    for (idx, peer) in peers.iter().enumerate() {
        assert_eq!(peer.current(), initial, "peer {idx} must keep the old state");
    }
}

#[test]
fn test_outstanding_proposal_limit() {
    let (platform, broker) = setup();
    let mut proposer: DistributedState<'static, OperatingMode, PEERS, 2> =
        DistributedState::new(broker, platform, TaskId::new(0).unwrap(), TOPICS, OperatingMode(0));

    assert_ne!(proposer.propose(OperatingMode(1)), 0);
    assert_ne!(proposer.propose(OperatingMode(2)), 0);
    // Table full: the proposal is refused with sequence 0
    assert_eq!(proposer.propose(OperatingMode(3)), 0);
}
