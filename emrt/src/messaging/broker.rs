//! Message broker with per-task mailboxes and pub/sub topics
//!
//! Lookups by task id are O(1) (the mailbox table is indexed by id);
//! lookups by topic id are O(log n) over a table kept sorted by
//! [`crate::core::TopicId`]. Every mailbox carries its own lock; task
//! notification is issued after the lock has been released.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{Deque, Vec};

use crate::config;
use crate::core::{Error, MessageFlags, Result, TaskId, Timeout, TopicId};
use crate::platform::{Platform, TaskHandle, NOTIFY_MESSAGE};

use super::types::Envelope;

/// What a full mailbox does with a new non-persistent message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Drop the oldest queued message to make room
    DropOldest,
    /// Reject the incoming message
    Reject,
}

/// Broker interface, decoupling QoS and coordination clients from the
/// concrete broker instance.
pub trait Broker<T: Envelope>: Sync {
    fn subscribe(&self, topic: TopicId, task: TaskId) -> Result<()>;
    fn publish(&self, topic: TopicId, msg: &mut T, from: TaskId) -> Result<()>;
    fn receive(&self, task: TaskId, timeout: Timeout) -> Result<T>;
    fn try_receive(&self, task: TaskId) -> Result<T>;
}

/// Mailbox registration surface consumed by the task manager
pub trait MailboxRegistry: Sync {
    fn register_task(&self, task: TaskId, handle: Option<TaskHandle>) -> Result<()>;
}

/// Counters of one mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MailboxStats {
    pub queued: usize,
    pub depth_limit: u16,
    pub received: u32,
    pub dropped_overflow: u32,
}

/// One per-topic sub-queue pair inside a mailbox
struct TopicQueue<T> {
    topic: TopicId,
    high: Deque<T, { config::MSG_HIGH_CAPACITY }>,
    normal: Deque<T, { config::MSG_NORMAL_CAPACITY }>,
}

impl<T> TopicQueue<T> {
    fn new(topic: TopicId) -> Self {
        Self {
            topic,
            high: Deque::new(),
            normal: Deque::new(),
        }
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }
}

struct MailboxInner<T> {
    task: Option<TaskId>,
    handle: Option<TaskHandle>,
    /// Soft cap across all sub-queues
    depth_limit: u16,
    policy: OverflowPolicy,
    notify_on_empty_only: bool,
    received: u32,
    dropped_overflow: u32,
    queues: Vec<TopicQueue<T>, { config::MSG_TOPIC_QUEUES_PER_MAILBOX }>,
}

impl<T: Envelope> MailboxInner<T> {
    fn new() -> Self {
        Self {
            task: None,
            handle: None,
            depth_limit: config::MSG_QUEUE_CAPACITY as u16,
            policy: OverflowPolicy::DropOldest,
            notify_on_empty_only: true,
            received: 0,
            dropped_overflow: 0,
            queues: Vec::new(),
        }
    }

    fn total_len(&self) -> usize {
        self.queues.iter().map(TopicQueue::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.queues.iter().all(TopicQueue::is_empty)
    }

    fn queue_index(&self, topic: TopicId) -> Option<usize> {
        self.queues.iter().position(|q| q.topic == topic)
    }

    fn find_or_create_queue(&mut self, topic: TopicId) -> Result<usize> {
        if let Some(idx) = self.queue_index(topic) {
            return Ok(idx);
        }
        self.queues
            .push(TopicQueue::new(topic))
            .map_err(|_| Error::OutOfMemory)?;
        Ok(self.queues.len() - 1)
    }

    /// Drop one queued message to make room, oldest normal traffic first
    fn drop_one(&mut self) -> bool {
        for queue in self.queues.iter_mut() {
            if queue.normal.pop_front().is_some() {
                return true;
            }
        }
        for queue in self.queues.iter_mut() {
            if queue.high.pop_front().is_some() {
                return true;
            }
        }
        false
    }

    /// Enqueue with per-topic routing. Returns whether the owner should be
    /// notified; the caller performs the notification outside the lock.
    fn send(&mut self, msg: &T) -> Result<bool> {
        let header = msg.header();
        let urgent =
            header.flags.contains(MessageFlags::URGENT) || header.priority.is_high();
        let was_empty = self.is_empty();
        let depth_reached = self.total_len() >= self.depth_limit as usize;

        let queue_idx = self.find_or_create_queue(TopicId::new(header.kind))?;

        let target_full = {
            let queue = &self.queues[queue_idx];
            if urgent {
                queue.high.is_full()
            } else {
                queue.normal.is_full()
            }
        };

        if target_full || depth_reached {
            let persistent = header.flags.contains(MessageFlags::PERSISTENT);
            let made_room = !persistent
                && self.policy == OverflowPolicy::DropOldest
                && self.drop_one();
            if made_room {
                self.dropped_overflow += 1;
            } else {
                return Err(Error::OutOfMemory);
            }
        }

        let queue = &mut self.queues[queue_idx];
        let pushed = if urgent {
            queue
                .high
                .push_back(msg.clone())
                .or_else(|m| queue.normal.push_back(m))
                .is_ok()
        } else {
            queue
                .normal
                .push_back(msg.clone())
                .or_else(|m| queue.high.push_back(m))
                .is_ok()
        };
        if !pushed {
            return Err(Error::OutOfMemory);
        }

        Ok(if self.notify_on_empty_only {
            was_empty
        } else {
            true
        })
    }

    /// Dequeue, draining high shards across topics before any normal shard.
    /// The second value reports whether the mailbox is now empty.
    fn receive(&mut self) -> Result<(T, bool)> {
        let mut found = None;
        for queue in self.queues.iter_mut() {
            if let Some(msg) = queue.high.pop_front() {
                found = Some(msg);
                break;
            }
        }
        if found.is_none() {
            for queue in self.queues.iter_mut() {
                if let Some(msg) = queue.normal.pop_front() {
                    found = Some(msg);
                    break;
                }
            }
        }
        match found {
            Some(msg) => {
                self.received += 1;
                let now_empty = self.is_empty();
                Ok((msg, now_empty))
            }
            None => Err(Error::NotFound),
        }
    }
}

struct Mailbox<M: RawMutex, T> {
    inner: Mutex<M, RefCell<MailboxInner<T>>>,
}

impl<M: RawMutex, T: Envelope> Mailbox<M, T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(MailboxInner::new())),
        }
    }

    fn lock<R>(&self, f: impl FnOnce(&mut MailboxInner<T>) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}

#[derive(Clone)]
struct TopicSubscription {
    topic: TopicId,
    /// Soft cap, at most `MSG_MAX_SUBS_PER_TOPIC`
    capacity_limit: u16,
    subscribers: Vec<TaskId, { config::MSG_MAX_SUBS_PER_TOPIC }>,
}

impl TopicSubscription {
    fn new(topic: TopicId) -> Self {
        Self {
            topic,
            capacity_limit: config::MSG_MAX_SUBS_PER_TOPIC as u16,
            subscribers: Vec::new(),
        }
    }
}

type Topics = Vec<TopicSubscription, { config::MSG_MAX_TOPICS }>;

/// The concrete broker
///
/// Generic over the envelope type so the same implementation backs the
/// small, medium and zero-copy instances.
pub struct MessageBroker<M: RawMutex, T: Envelope, const MAX_TASKS: usize> {
    platform: &'static dyn Platform,
    mailboxes: [Mailbox<M, T>; MAX_TASKS],
    topics: Mutex<M, RefCell<Topics>>,
    sequence: AtomicU16,
    sent: AtomicU32,
    received: AtomicU32,
    dropped: AtomicU32,
}

impl<M: RawMutex, T: Envelope, const MAX_TASKS: usize> MessageBroker<M, T, MAX_TASKS> {
    pub fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            mailboxes: core::array::from_fn(|_| Mailbox::new()),
            topics: Mutex::new(RefCell::new(Vec::new())),
            sequence: AtomicU16::new(1),
            sent: AtomicU32::new(0),
            received: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Bind a mailbox to `task` at index == id. Idempotent: repeated
    /// registration only updates the native handle.
    pub fn register_task(&self, task: TaskId, handle: Option<TaskHandle>) -> Result<()> {
        let mailbox = self.mailboxes.get(task.index()).ok_or(Error::OutOfMemory)?;
        mailbox.lock(|inner| {
            inner.task = Some(task);
            inner.handle = handle;
        });
        Ok(())
    }

    pub fn set_mailbox_depth(&self, task: TaskId, depth: usize) -> Result<()> {
        let clamped = depth.min(config::MSG_QUEUE_CAPACITY) as u16;
        self.with_mailbox(task, |inner| inner.depth_limit = clamped)
    }

    pub fn set_overflow_policy(&self, task: TaskId, policy: OverflowPolicy) -> Result<()> {
        self.with_mailbox(task, |inner| inner.policy = policy)
    }

    /// Notify owners only on empty→non-empty transitions (all mailboxes)
    pub fn set_notify_on_empty_only(&self, enabled: bool) {
        for mailbox in &self.mailboxes {
            mailbox.lock(|inner| inner.notify_on_empty_only = enabled);
        }
    }

    /// Cap the subscriber count of one topic, creating the topic entry if
    /// it does not exist yet.
    pub fn set_topic_capacity(&self, topic: TopicId, max_subs: usize) -> Result<()> {
        let clamped = max_subs.min(config::MSG_MAX_SUBS_PER_TOPIC) as u16;
        self.topics.lock(|cell| {
            let topics = &mut *cell.borrow_mut();
            let idx = Self::find_or_insert_topic(topics, topic)?;
            topics[idx].capacity_limit = clamped;
            Ok(())
        })
    }

    pub fn subscribe(&self, topic: TopicId, task: TaskId) -> Result<()> {
        if task.index() >= MAX_TASKS {
            return Err(Error::InvalidParameter);
        }
        self.topics.lock(|cell| {
            let topics = &mut *cell.borrow_mut();
            let idx = Self::find_or_insert_topic(topics, topic)?;
            let entry = &mut topics[idx];
            if entry.subscribers.contains(&task) {
                return Ok(());
            }
            if entry.subscribers.len() >= entry.capacity_limit as usize {
                return Err(Error::OutOfMemory);
            }
            entry.subscribers.push(task).map_err(|_| Error::OutOfMemory)?;
            Ok(())
        })
    }

    /// Stamp the header and fan the message out to every subscriber of
    /// `topic`. Ok iff at least one mailbox accepted it.
    pub fn publish(&self, topic: TopicId, msg: &mut T, from: TaskId) -> Result<()> {
        {
            let header = msg.header_mut();
            header.sender_id = from.into_u16();
            if header.timestamp == 0 {
                header.timestamp = self.platform.now_us();
            }
            if header.sequence == 0 {
                header.sequence = self.next_sequence();
            }
            header.kind = topic.into_u16();
        }

        let subscribers = self
            .topics
            .lock(|cell| {
                let topics = cell.borrow();
                topics
                    .binary_search_by_key(&topic, |t| t.topic)
                    .ok()
                    .map(|idx| topics[idx].subscribers.clone())
            })
            .ok_or(Error::NotFound)?;
        if subscribers.is_empty() {
            return Err(Error::NotFound);
        }

        let mut sent_any = false;
        for task in subscribers {
            if self.deliver(task, &*msg) {
                sent_any = true;
            }
        }
        if sent_any {
            Ok(())
        } else {
            Err(Error::OutOfMemory)
        }
    }

    /// Blocking receive: immediate attempt, then park on the task
    /// notification until `timeout` elapses.
    pub fn receive(&self, task: TaskId, timeout: Timeout) -> Result<T> {
        self.check_registered(task)?;
        if let Ok(msg) = self.take_one(task) {
            return Ok(msg);
        }
        if let Some(value) = self.platform.wait_notification(timeout.as_ms()) {
            if value & NOTIFY_MESSAGE != 0 {
                if let Ok(msg) = self.take_one(task) {
                    return Ok(msg);
                }
            }
        }
        Err(Error::Timeout)
    }

    pub fn try_receive(&self, task: TaskId) -> Result<T> {
        self.check_registered(task)?;
        self.take_one(task)
    }

    /// Enqueue to every registered mailbox. Ok iff at least one accepted.
    pub fn broadcast(&self, msg: &T) -> Result<()> {
        let mut sent_any = false;
        for idx in 0..MAX_TASKS {
            let Some(task) = self.mailboxes[idx].lock(|inner| inner.task) else {
                continue;
            };
            if self.deliver(task, msg) {
                sent_any = true;
            }
        }
        if sent_any {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    pub fn total_sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn total_received(&self) -> u32 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn mailbox_count(&self) -> usize {
        self.mailboxes
            .iter()
            .filter(|mb| mb.lock(|inner| inner.task.is_some()))
            .count()
    }

    pub fn mailbox_stats(&self, task: TaskId) -> Result<MailboxStats> {
        self.with_mailbox(task, |inner| MailboxStats {
            queued: inner.total_len(),
            depth_limit: inner.depth_limit,
            received: inner.received,
            dropped_overflow: inner.dropped_overflow,
        })
    }

    fn next_sequence(&self) -> u16 {
        let mut seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        if seq == 0 {
            seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        }
        seq
    }

    /// Sorted insertion keeps the binary-search invariant
    fn find_or_insert_topic(topics: &mut Topics, topic: TopicId) -> Result<usize> {
        match topics.binary_search_by_key(&topic, |t| t.topic) {
            Ok(idx) => Ok(idx),
            Err(pos) => {
                topics
                    .push(TopicSubscription::new(topic))
                    .map_err(|_| Error::OutOfMemory)?;
                let mut idx = topics.len() - 1;
                while idx > pos {
                    topics.swap(idx - 1, idx);
                    idx -= 1;
                }
                Ok(pos)
            }
        }
    }

    /// Send into one mailbox and notify its owner outside the lock
    fn deliver(&self, task: TaskId, msg: &T) -> bool {
        let Some(mailbox) = self.mailboxes.get(task.index()) else {
            return false;
        };
        let outcome = mailbox.lock(|inner| {
            if inner.task != Some(task) {
                return None;
            }
            Some((inner.send(msg), inner.handle))
        });
        match outcome {
            Some((Ok(notify), handle)) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                if notify {
                    if let Some(handle) = handle {
                        self.platform.notify(handle, NOTIFY_MESSAGE);
                    }
                }
                true
            }
            Some((Err(_), _)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => false,
        }
    }

    fn take_one(&self, task: TaskId) -> Result<T> {
        let (msg, now_empty) = self.with_mailbox(task, MailboxInner::receive)??;
        if now_empty {
            self.platform.clear_notification();
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(msg)
    }

    fn check_registered(&self, task: TaskId) -> Result<()> {
        self.with_mailbox(task, |_| ())
    }

    fn with_mailbox<R>(
        &self,
        task: TaskId,
        f: impl FnOnce(&mut MailboxInner<T>) -> R,
    ) -> Result<R> {
        let mailbox = self.mailboxes.get(task.index()).ok_or(Error::NotFound)?;
        mailbox.lock(|inner| {
            if inner.task == Some(task) {
                Ok(f(inner))
            } else {
                Err(Error::NotFound)
            }
        })
    }
}

impl<M: RawMutex + Sync, T: Envelope + Send, const MAX_TASKS: usize> Broker<T>
    for MessageBroker<M, T, MAX_TASKS>
{
    fn subscribe(&self, topic: TopicId, task: TaskId) -> Result<()> {
        MessageBroker::subscribe(self, topic, task)
    }

    fn publish(&self, topic: TopicId, msg: &mut T, from: TaskId) -> Result<()> {
        MessageBroker::publish(self, topic, msg, from)
    }

    fn receive(&self, task: TaskId, timeout: Timeout) -> Result<T> {
        MessageBroker::receive(self, task, timeout)
    }

    fn try_receive(&self, task: TaskId) -> Result<T> {
        MessageBroker::try_receive(self, task)
    }
}

impl<M: RawMutex + Sync, T: Envelope + Send, const MAX_TASKS: usize> MailboxRegistry
    for MessageBroker<M, T, MAX_TASKS>
{
    fn register_task(&self, task: TaskId, handle: Option<TaskHandle>) -> Result<()> {
        MessageBroker::register_task(self, task, handle)
    }
}
