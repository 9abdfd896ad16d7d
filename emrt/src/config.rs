//! Capacity budget of the runtime
//!
//! Every table, queue and pool in the runtime is sized at compile time from
//! the constants below. The headline capacities and the global memory
//! budget can be overridden without editing this file by setting `EMRT_*`
//! environment variables for the build (e.g.
//! `EMRT_MAX_TASKS=16 EMRT_MEMORY_BUDGET_BYTES=49152 cargo build`); the
//! values are read with `option_env!` and parsed at compile time.
//!
//! The assertions at the bottom enforce the interrelations between the
//! capacities; the arena budget itself is enforced in
//! [`crate::memory::layout`].

/// Parse a decimal build-time override, falling back to `default`.
const fn parse_env(raw: Option<&str>, default: usize) -> usize {
    let Some(raw) = raw else {
        return default;
    };
    let bytes = raw.as_bytes();
    assert!(!bytes.is_empty(), "empty EMRT_* override");
    let mut value = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let digit = bytes[i];
        assert!(digit.is_ascii_digit(), "EMRT_* override must be decimal");
        value = value * 10 + (digit - b'0') as usize;
        i += 1;
    }
    value
}

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

// -------- Task system --------

/// Upper bound on the task table, the mailbox table and the watchdog table
pub const MAX_TASKS: usize = parse_env(option_env!("EMRT_MAX_TASKS"), 8);
pub const MAX_TASK_NAME_LEN: usize = 32;
pub const DEFAULT_STACK_SIZE: u32 = 4096;
/// Watchdog defaults; per task, overridable at registration
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_SYSTEM_WATCHDOG_TIMEOUT_MS: u32 = 10_000;

// -------- Events --------

/// Event queue depth
pub const MAX_EVENTS: usize = parse_env(option_env!("EMRT_MAX_EVENTS"), 16);
pub const MAX_EVENT_HANDLERS: usize = 16;

// -------- Messaging --------

/// Total per-mailbox message capacity, summed over all shards and topics
pub const MSG_QUEUE_CAPACITY: usize = parse_env(option_env!("EMRT_MSG_QUEUE_CAPACITY"), 16);
/// Broker topic table capacity
pub const MSG_MAX_TOPICS: usize = parse_env(option_env!("EMRT_MSG_MAX_TOPICS"), 8);
/// Subscribers-per-topic ceiling
pub const MSG_MAX_SUBS_PER_TOPIC: usize = parse_env(option_env!("EMRT_MSG_MAX_SUBS_PER_TOPIC"), 4);
/// Per-mailbox topic queue slots
pub const MSG_TOPIC_QUEUES_PER_MAILBOX: usize =
    parse_env(option_env!("EMRT_MSG_TOPIC_QUEUES_PER_MAILBOX"), 4);
/// Fraction of each per-topic queue reserved for the high shard
pub const MSG_TOPIC_HIGH_RATIO_NUM: usize = 1;
pub const MSG_TOPIC_HIGH_RATIO_DEN: usize = 4;

/// Per-topic depth inside one mailbox
pub const MSG_PER_TOPIC_CAPACITY: usize =
    max_usize(2, MSG_QUEUE_CAPACITY / MSG_TOPIC_QUEUES_PER_MAILBOX);
/// High shard depth of one per-topic queue
pub const MSG_HIGH_CAPACITY: usize = max_usize(
    1,
    (MSG_PER_TOPIC_CAPACITY * MSG_TOPIC_HIGH_RATIO_NUM) / MSG_TOPIC_HIGH_RATIO_DEN,
);
/// Normal shard depth of one per-topic queue
pub const MSG_NORMAL_CAPACITY: usize = max_usize(1, MSG_PER_TOPIC_CAPACITY - MSG_HIGH_CAPACITY);

/// Payload bytes of the three envelope classes
pub const SMALL_PAYLOAD_BYTES: usize = 16;
pub const MEDIUM_PAYLOAD_BYTES: usize = 64;
pub const LARGE_PAYLOAD_BYTES: usize = 256;

// -------- QoS --------

/// Publisher outstanding-ACK table
pub const QOS_PENDING_LIMIT: usize = parse_env(option_env!("EMRT_QOS_PENDING_LIMIT"), 8);
/// Subscriber (sender, topic) ordering table
pub const QOS_TRACK_LIMIT: usize = 32;
/// Retransmit interval
pub const QOS_ACK_TIMEOUT_US: u64 = 500_000;

// -------- Zero-copy pool --------

pub const ZC_BLOCK_SIZE: usize = parse_env(option_env!("EMRT_ZC_BLOCK_SIZE"), 64);
pub const ZC_BLOCK_COUNT: usize = parse_env(option_env!("EMRT_ZC_BLOCK_COUNT"), 8);

// -------- Event log --------

pub const EVENT_LOG_CAPACITY: usize = 16;

// -------- Protocol --------

/// Maximum packet payload carried by the central pipeline
pub const PROTOCOL_MAX_PAYLOAD: usize = parse_env(option_env!("EMRT_PROTOCOL_MAX_PAYLOAD"), 64);
pub const PROTOCOL_MAX_HANDLERS: usize = parse_env(option_env!("EMRT_PROTOCOL_MAX_HANDLERS"), 16);
pub const PROTOCOL_RING_SIZE: usize = parse_env(option_env!("EMRT_PROTOCOL_RING_SIZE"), 512);
/// One field-layout slot per opcode in the codec tables
pub const PROTOCOL_OPCODE_SPACE: usize = parse_env(option_env!("EMRT_PROTOCOL_OPCODE_SPACE"), 256);
pub const PROTOCOL_MAX_FIELDS: usize = 16;

// -------- Memory pools --------

pub const SMALL_BLOCK_SIZE: usize = 32;
pub const MEDIUM_BLOCK_SIZE: usize = 128;
pub const LARGE_BLOCK_SIZE: usize = 512;

pub const SMALL_POOL_COUNT: usize = 16;
pub const MEDIUM_POOL_COUNT: usize = 8;
pub const LARGE_POOL_COUNT: usize = 4;

// -------- Arena --------

/// Total arena upper bound in bytes; 0 leaves the budget unenforced
pub const MEMORY_BUDGET_BYTES: usize = parse_env(option_env!("EMRT_MEMORY_BUDGET_BYTES"), 0);
/// User-reserved bytes in the `os` region
pub const OS_REGION_BYTES: usize = parse_env(option_env!("EMRT_OS_REGION_BYTES"), 0);

// -------- Compile-time sanity checks --------

const _: () = assert!(MAX_TASKS >= 1, "EMRT_MAX_TASKS must be >= 1");
const _: () = assert!(MAX_TASKS <= 0xfffe, "EMRT_MAX_TASKS exceeds the TaskId space");
const _: () = assert!(MAX_EVENTS >= 1, "EMRT_MAX_EVENTS must be >= 1");
const _: () = assert!(MSG_QUEUE_CAPACITY >= 1, "EMRT_MSG_QUEUE_CAPACITY must be >= 1");
const _: () = assert!(MSG_MAX_TOPICS >= 1, "EMRT_MSG_MAX_TOPICS must be >= 1");
const _: () = assert!(
    MSG_MAX_SUBS_PER_TOPIC >= 1 && MSG_MAX_SUBS_PER_TOPIC <= MAX_TASKS,
    "EMRT_MSG_MAX_SUBS_PER_TOPIC must be in 1..=EMRT_MAX_TASKS"
);
const _: () = assert!(
    MSG_TOPIC_QUEUES_PER_MAILBOX >= 1 && MSG_TOPIC_QUEUES_PER_MAILBOX <= MSG_QUEUE_CAPACITY,
    "per-mailbox topic queues must be in 1..=EMRT_MSG_QUEUE_CAPACITY"
);
const _: () = assert!(
    MSG_TOPIC_HIGH_RATIO_DEN != 0 && MSG_TOPIC_HIGH_RATIO_NUM <= MSG_TOPIC_HIGH_RATIO_DEN,
    "high-shard ratio must be a proper fraction"
);
const _: () = assert!(
    SMALL_PAYLOAD_BYTES >= 8 && MEDIUM_PAYLOAD_BYTES >= SMALL_PAYLOAD_BYTES
        && LARGE_PAYLOAD_BYTES >= MEDIUM_PAYLOAD_BYTES,
    "envelope payload classes must be ordered"
);
const _: () = assert!(QOS_PENDING_LIMIT >= 1, "EMRT_QOS_PENDING_LIMIT must be >= 1");
const _: () = assert!(
    PROTOCOL_MAX_HANDLERS >= 1 && PROTOCOL_MAX_PAYLOAD >= 1,
    "protocol capacities must be >= 1"
);
const _: () = assert!(
    PROTOCOL_RING_SIZE >= PROTOCOL_MAX_PAYLOAD,
    "EMRT_PROTOCOL_RING_SIZE must be >= EMRT_PROTOCOL_MAX_PAYLOAD"
);
const _: () = assert!(
    PROTOCOL_OPCODE_SPACE >= 1 && PROTOCOL_OPCODE_SPACE <= 256,
    "EMRT_PROTOCOL_OPCODE_SPACE must be in 1..=256"
);
const _: () = assert!(
    SMALL_BLOCK_SIZE > 0 && MEDIUM_BLOCK_SIZE > SMALL_BLOCK_SIZE && LARGE_BLOCK_SIZE > MEDIUM_BLOCK_SIZE,
    "pool size classes must be strictly increasing"
);
const _: () = assert!(
    SMALL_POOL_COUNT <= 4096 && MEDIUM_POOL_COUNT <= 4096 && LARGE_POOL_COUNT <= 4096,
    "pool block counts unreasonably large"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(parse_env(None, 7), 7);
        assert_eq!(parse_env(Some("0"), 7), 0);
        assert_eq!(parse_env(Some("1234"), 7), 1234);
    }

    #[test]
    fn test_shard_capacities() {
        assert!(MSG_PER_TOPIC_CAPACITY >= 2);
        assert!(MSG_HIGH_CAPACITY >= 1);
        assert!(MSG_NORMAL_CAPACITY >= 1);
        assert!(MSG_HIGH_CAPACITY + MSG_NORMAL_CAPACITY <= MSG_PER_TOPIC_CAPACITY + 1);
    }
}
