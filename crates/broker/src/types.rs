use std::time::Duration;

/// How a stream retains messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep up to `max_messages`/`max_age`, oldest falls off the back
    /// (channel streams, inbox streams, the DLQ stream).
    Limits,
    /// A message is deleted as soon as any consumer acks it
    /// (work-queue streams).
    WorkQueue,
}

#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub max_messages: Option<u64>,
    pub max_age: Option<Duration>,
}

/// Stream metadata without consuming anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
}

/// One message read back from a stream, with its broker-assigned sequence.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Durable pull consumer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// Deliver only messages published after consumer creation — REQUIRED
    /// for competing-consumer work queues.
    New,
    /// Deliver the stream's full history — used only for non-destructive
    /// preview consumers (`work_list`).
    All,
}

#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub durable_name: String,
    pub deliver_policy: DeliverPolicy,
    pub ack_wait: Duration,
    pub max_deliver: u32,
}

/// A message fetched from a pull consumer, pending ack.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub seq: u64,
    pub payload: Vec<u8>,
    /// Broker's count of delivery attempts for this message (source of
    /// truth for `WorkItem.attempts`).
    pub delivered_count: u32,
}

/// A KV entry with its revision, used for compare-and-set updates.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub revision: u64,
}
