use crate::{
    host::MessageQueueHost,
    queue::{MessageQueue, QueueFactory},
    Result,
};

fn status(result: Result<()>) -> i32 {
    if result.is_ok() {
        0
    } else {
        -1
    }
}

fn count(result: Result<usize>) -> i32 {
    result.ok().and_then(|n| i32::try_from(n).ok()).unwrap_or(-1)
}

/// Creates a queue, returns `None` on failure (host failures are logged by the factory)
pub fn create_queue<H: MessageQueueHost>(
    factory: &QueueFactory<H>,
    capacity: usize,
    max_message_size: usize,
) -> Option<MessageQueue<H>> {
    factory.create(capacity, max_message_size).ok()
}

/// Sends the first `length` bytes of the buffer, waits forever. Returns `0` on success, `-1` on
/// failure
pub fn send<H: MessageQueueHost>(queue: &MessageQueue<H>, buffer: &[u8], length: usize) -> i32 {
    buffer.get(..length).map_or(-1, |msg| status(queue.send(msg)))
}

/// Sends the first `length` bytes of the buffer, waits up to `timeout` seconds. Returns `0` on
/// success, `-1` on failure
pub fn send_timeout<H: MessageQueueHost>(
    queue: &MessageQueue<H>,
    buffer: &[u8],
    length: usize,
    timeout: f64,
) -> i32 {
    buffer
        .get(..length)
        .map_or(-1, |msg| status(queue.send_timeout(msg, timeout)))
}

/// Sends the first `length` bytes of the buffer without waiting. Returns `0` on success, `-1` on
/// failure
pub fn try_send<H: MessageQueueHost>(queue: &MessageQueue<H>, buffer: &[u8], length: usize) -> i32 {
    buffer
        .get(..length)
        .map_or(-1, |msg| status(queue.try_send(msg)))
}

/// Receives a message, waits forever. Returns the message size or `-1`
pub fn receive<H: MessageQueueHost>(queue: &MessageQueue<H>, buffer: &mut [u8]) -> i32 {
    count(queue.recv(buffer))
}

/// Receives a message, waits up to `timeout` seconds. Returns the message size or `-1`
pub fn receive_timeout<H: MessageQueueHost>(
    queue: &MessageQueue<H>,
    buffer: &mut [u8],
    timeout: f64,
) -> i32 {
    count(queue.recv_timeout(buffer, timeout))
}

/// Receives a message without waiting. Returns the message size or `-1`
pub fn try_receive<H: MessageQueueHost>(queue: &MessageQueue<H>, buffer: &mut [u8]) -> i32 {
    count(queue.try_recv(buffer))
}

/// Returns the number of pending messages or `-1`
pub fn pending_count<H: MessageQueueHost>(queue: &MessageQueue<H>) -> i32 {
    count(queue.pending())
}

/// Writes the queue diagnostics to the log
pub fn show<H: MessageQueueHost>(queue: &MessageQueue<H>, level: u32) {
    queue.show(level);
}
