use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emrt::core::{Error, MessageFlags, TaskId, Timeout, TopicId};
use emrt::messaging::{
    MediumMessage, MessageBroker, QosPublisher, QosSubscriber, SmallMessage,
};
use emrt_platform::host::HostPlatform;
use emrt_platform::Platform;

type DataBroker = MessageBroker<CriticalSectionRawMutex, MediumMessage, 8>;
type AckBroker = MessageBroker<CriticalSectionRawMutex, SmallMessage, 8>;

const DATA_TOPIC: TopicId = TopicId::new(7);
const ACK_TOPIC: TopicId = TopicId::new(99);

const PUBLISHER: TaskId = TaskId::new(0).unwrap();
const SUBSCRIBER: TaskId = TaskId::new(1).unwrap();

struct Fixture {
    platform: &'static HostPlatform,
    data: &'static DataBroker,
    acks: &'static AckBroker,
}

fn setup() -> Fixture {
    let platform = Box::leak(Box::new(HostPlatform::new()));
    let data = Box::leak(Box::new(DataBroker::new(platform)));
    let acks = Box::leak(Box::new(AckBroker::new(platform)));

    data.register_task(SUBSCRIBER, None).unwrap();
    data.subscribe(DATA_TOPIC, SUBSCRIBER).unwrap();
    acks.register_task(PUBLISHER, None).unwrap();
    acks.subscribe(ACK_TOPIC, PUBLISHER).unwrap();

    Fixture {
        platform,
        data,
        acks,
    }
}

fn pump_acks(fixture: &Fixture, publisher: &mut QosPublisher<'_, MediumMessage>) {
    while let Ok(ack_msg) = fixture.acks.try_receive(PUBLISHER) {
        assert!(publisher.try_handle_ack_message(&ack_msg));
    }
}

#[test]
fn test_ack_clears_pending() {
    let fixture = setup();
    let mut publisher: QosPublisher<'_, MediumMessage> =
        QosPublisher::new(fixture.data, fixture.platform, PUBLISHER, ACK_TOPIC);
    let mut subscriber: QosSubscriber<'_, MediumMessage> = QosSubscriber::new(
        fixture.data,
        fixture.acks,
        fixture.platform,
        SUBSCRIBER,
        ACK_TOPIC,
    );

    let mut msg = MediumMessage::with_payload(&[1, 2]).unwrap();
    publisher.publish(DATA_TOPIC, &mut msg).unwrap();
    assert_eq!(publisher.pending_count(), 1);
    assert!(msg.header.flags.contains(MessageFlags::REQUIRES_ACK));

    let received = subscriber.receive(Timeout::from_ms(100)).unwrap();
    assert_eq!(received.payload(), &[1, 2]);

    pump_acks(&fixture, &mut publisher);
    assert_eq!(publisher.pending_count(), 0);
}

#[test]
fn test_retransmitted_duplicate_is_dropped_and_acked() {
    let fixture = setup();
    let mut publisher: QosPublisher<'_, MediumMessage> =
        QosPublisher::new(fixture.data, fixture.platform, PUBLISHER, ACK_TOPIC)
            .with_ack_timeout_us(1_000);
    let mut subscriber: QosSubscriber<'_, MediumMessage> = QosSubscriber::new(
        fixture.data,
        fixture.acks,
        fixture.platform,
        SUBSCRIBER,
        ACK_TOPIC,
    );

    let mut msg = MediumMessage::with_payload(&[0xaa]).unwrap();
    msg.header.sequence = 10;
    publisher.publish(DATA_TOPIC, &mut msg).unwrap();

    // First delivery succeeds and is acknowledged (not yet processed)
    let received = subscriber.receive(Timeout::from_ms(100)).unwrap();
    assert_eq!(received.header.sequence, 10);

    // ACK timeout fires once; the publisher republishes seq 10
    fixture.platform.delay_ms(2);
    publisher.pump_retransmit();

    // The duplicate is suppressed but still acknowledged
    assert_eq!(
        subscriber.receive(Timeout::from_ms(50)),
        Err(Error::NotFound)
    );

    pump_acks(&fixture, &mut publisher);
    assert_eq!(publisher.pending_count(), 0);
}

#[test]
fn test_stale_sequence_is_dropped() {
    let fixture = setup();
    let mut publisher: QosPublisher<'_, MediumMessage> =
        QosPublisher::new(fixture.data, fixture.platform, PUBLISHER, ACK_TOPIC);
    let mut subscriber: QosSubscriber<'_, MediumMessage> = QosSubscriber::new(
        fixture.data,
        fixture.acks,
        fixture.platform,
        SUBSCRIBER,
        ACK_TOPIC,
    );

    let mut newer = MediumMessage::with_payload(&[2]).unwrap();
    newer.header.sequence = 20;
    publisher.publish(DATA_TOPIC, &mut newer).unwrap();
    subscriber.receive(Timeout::from_ms(100)).unwrap();

    // An older sequence from the same sender and topic is stale
    let mut older = MediumMessage::with_payload(&[1]).unwrap();
    older.header.sequence = 15;
    publisher.publish(DATA_TOPIC, &mut older).unwrap();
    assert_eq!(
        subscriber.receive(Timeout::from_ms(50)),
        Err(Error::NotFound)
    );

    // Progress resumes with a newer sequence
    let mut next = MediumMessage::with_payload(&[3]).unwrap();
    next.header.sequence = 21;
    publisher.publish(DATA_TOPIC, &mut next).unwrap();
    assert_eq!(
        subscriber
            .receive(Timeout::from_ms(100))
            .unwrap()
            .header
            .sequence,
        21
    );
}

#[test]
fn test_sequence_wrap_is_not_stale() {
    let fixture = setup();
    let mut publisher: QosPublisher<'_, MediumMessage> =
        QosPublisher::new(fixture.data, fixture.platform, PUBLISHER, ACK_TOPIC);
    let mut subscriber: QosSubscriber<'_, MediumMessage> = QosSubscriber::new(
        fixture.data,
        fixture.acks,
        fixture.platform,
        SUBSCRIBER,
        ACK_TOPIC,
    );

    let mut high = MediumMessage::with_payload(&[1]).unwrap();
    high.header.sequence = 0xfffe;
    publisher.publish(DATA_TOPIC, &mut high).unwrap();
    subscriber.receive(Timeout::from_ms(100)).unwrap();

    // Wrapped sequence is strictly newer under signed-delta comparison
    let mut wrapped = MediumMessage::with_payload(&[2]).unwrap();
    wrapped.header.sequence = 2;
    publisher.publish(DATA_TOPIC, &mut wrapped).unwrap();
    assert_eq!(
        subscriber
            .receive(Timeout::from_ms(100))
            .unwrap()
            .header
            .sequence,
        2
    );
}

#[test]
fn test_pending_table_capacity() {
    let fixture = setup();
    let mut publisher: QosPublisher<'_, MediumMessage, 2> =
        QosPublisher::new(fixture.data, fixture.platform, PUBLISHER, ACK_TOPIC);

    for _ in 0..2 {
        let mut msg = MediumMessage::with_payload(&[0]).unwrap();
        publisher.publish(DATA_TOPIC, &mut msg).unwrap();
    }
    let mut overflow = MediumMessage::with_payload(&[0]).unwrap();
    assert_eq!(
        publisher.publish(DATA_TOPIC, &mut overflow),
        Err(Error::OutOfMemory)
    );
    assert_eq!(publisher.pending_count(), 2);
}
