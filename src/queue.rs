use std::{fmt, sync::Arc};

use tracing::{debug, error, info};

use crate::{
    host::{sim::SimHost, MessageQueueHost, QueueId},
    name::{NameAllocator, QueueName, NAMES},
    timeout::{TickRate, Wait},
    Error, Result,
};

/// Creates message queues on a host
pub struct QueueFactory<H: MessageQueueHost = SimHost> {
    host: Arc<H>,
    tick_rate: TickRate,
    names: &'static NameAllocator,
}

impl Default for QueueFactory<SimHost> {
    fn default() -> Self {
        let host = SimHost::default();
        // a sim host rate is always a valid tick rate
        let tick_rate = TickRate::new(host.ticks_per_second()).unwrap_or_default();
        Self {
            host: Arc::new(host),
            tick_rate,
            names: &NAMES,
        }
    }
}

impl<H: MessageQueueHost> QueueFactory<H> {
    /// Creates a new factory. Timeouts are converted to ticks at the host scheduler rate, the same
    /// rate the host uses to measure waits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if the host reports an invalid tick rate
    pub fn new(host: Arc<H>) -> Result<Self> {
        let tick_rate = TickRate::new(host.ticks_per_second())?;
        Ok(Self {
            host,
            tick_rate,
            names: &NAMES,
        })
    }
    /// Uses a custom name allocator instead of the process-wide one
    pub fn with_names(mut self, names: &'static NameAllocator) -> Self {
        self.names = names;
        self
    }
    /// Returns the host
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }
    /// Returns the host tick rate used to convert timeouts
    pub fn tick_rate(&self) -> TickRate {
        self.tick_rate
    }
    /// Creates a new FIFO queue for up to `capacity` messages of up to `max_message_size` bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if the capacity or the message size is zero. Host failures
    /// are logged and returned.
    pub fn create(&self, capacity: usize, max_message_size: usize) -> Result<MessageQueue<H>> {
        if capacity == 0 {
            return Err(Error::InvalidData("queue capacity MUST be > 0".to_owned()));
        }
        if max_message_size == 0 {
            return Err(Error::InvalidData(
                "queue message size MUST be > 0".to_owned(),
            ));
        }
        let name = self.names.allocate();
        match self
            .host
            .create(name, capacity, max_message_size)
            .into_result(Error::Failed("unsatisfied".to_owned()))
        {
            Ok(id) => {
                debug!(%name, %id, capacity, max_message_size, "message queue created");
                Ok(MessageQueue {
                    host: self.host.clone(),
                    id,
                    name: Some(name),
                    capacity,
                    max_message_size,
                    tick_rate: self.tick_rate,
                })
            }
            Err(error) => {
                error!(%name, capacity, max_message_size, %error, "Can't create message queue");
                Err(error)
            }
        }
    }
    /// Creates a handle for an existing queue, e.g. an id received from another task
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] for unknown ids and [`Error::RemoteObject`] for queues
    /// owned by other nodes
    pub fn attach(&self, id: QueueId) -> Result<MessageQueue<H>> {
        let info = self.host.info(id).into_result(Error::InvalidHandle)?;
        Ok(MessageQueue {
            host: self.host.clone(),
            id,
            name: info.name,
            capacity: info.capacity,
            max_message_size: info.max_message_size,
            tick_rate: self.tick_rate,
        })
    }
}

/// Bounded FIFO queue of byte messages.
///
/// A handle is cheap to clone, all clones refer to the same native queue. The queue is released
/// by [`MessageQueue::destroy`] only, after that all clones report [`Error::InvalidHandle`].
pub struct MessageQueue<H: MessageQueueHost = SimHost> {
    host: Arc<H>,
    id: QueueId,
    name: Option<QueueName>,
    capacity: usize,
    max_message_size: usize,
    tick_rate: TickRate,
}

impl<H: MessageQueueHost> Clone for MessageQueue<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            id: self.id,
            name: self.name,
            capacity: self.capacity,
            max_message_size: self.max_message_size,
            tick_rate: self.tick_rate,
        }
    }
}

impl<H: MessageQueueHost> Eq for MessageQueue<H> {}

impl<H: MessageQueueHost> PartialEq for MessageQueue<H> {
    fn eq(&self, other: &Self) -> bool {
        self.host.instance_id() == other.host.instance_id() && self.id == other.id
    }
}

impl<H: MessageQueueHost> fmt::Debug for MessageQueue<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl<H: MessageQueueHost> MessageQueue<H> {
    /// Native queue id
    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
    }
    /// Queue name (unknown for attached queues on some hosts)
    #[inline]
    pub fn name(&self) -> Option<QueueName> {
        self.name
    }
    /// Maximum number of buffered messages
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Maximum message size in bytes
    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
    /// Sends a message, waits for free space forever
    #[inline]
    pub fn send(&self, message: &[u8]) -> Result<()> {
        self.send_with(message, Wait::Forever)
    }
    /// Sends a message, waits for free space up to `timeout` seconds. A non-positive timeout
    /// means no waiting at all.
    #[inline]
    pub fn send_timeout(&self, message: &[u8], timeout: f64) -> Result<()> {
        self.send_with(message, self.tick_rate.wait_for(timeout))
    }
    /// Tries to send a message (non-blocking)
    #[inline]
    pub fn try_send(&self, message: &[u8]) -> Result<()> {
        self.send_with(message, Wait::NoWait)
    }
    /// Receives a message into the buffer, waits forever. Returns the message size
    #[inline]
    pub fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
        self.recv_with(buffer, Wait::Forever)
    }
    /// Receives a message into the buffer, waits up to `timeout` seconds. A non-positive timeout
    /// means no waiting at all. Returns the message size
    #[inline]
    pub fn recv_timeout(&self, buffer: &mut [u8], timeout: f64) -> Result<usize> {
        self.recv_with(buffer, self.tick_rate.wait_for(timeout))
    }
    /// Tries to receive a message into the buffer (non-blocking). Returns the message size
    #[inline]
    pub fn try_recv(&self, buffer: &mut [u8]) -> Result<usize> {
        self.recv_with(buffer, Wait::NoWait)
    }
    /// Sends a message with an explicit host wait mode
    ///
    /// # Errors
    ///
    /// [`Error::ChannelFull`] if there is no space and no waiting is allowed,
    /// [`Error::Timeout`] if the wait has expired, [`Error::ChannelClosed`] if the queue has been
    /// destroyed while waiting, [`Error::InvalidData`] if the message is too long
    pub fn send_with(&self, message: &[u8], wait: Wait) -> Result<()> {
        if message.len() > self.max_message_size {
            return Err(Error::InvalidData(format!(
                "message size {} exceeds the queue limit {}",
                message.len(),
                self.max_message_size
            )));
        }
        self.host
            .send(self.id, message, wait)
            .into_result(Error::ChannelFull)
    }
    /// Receives a message with an explicit host wait mode. The buffer must be able to hold the
    /// maximum message size of the queue.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelEmpty`] if there is no message and no waiting is allowed,
    /// [`Error::Timeout`] if the wait has expired, [`Error::ChannelClosed`] if the queue has been
    /// destroyed while waiting, [`Error::InvalidData`] if the buffer is too short
    pub fn recv_with(&self, buffer: &mut [u8], wait: Wait) -> Result<usize> {
        if buffer.len() < self.max_message_size {
            return Err(Error::InvalidData(format!(
                "buffer size {} is less than the queue message size {}",
                buffer.len(),
                self.max_message_size
            )));
        }
        self.host
            .receive(self.id, buffer, wait)
            .into_result(Error::ChannelEmpty)
    }
    /// Returns the number of pending messages. The value is a snapshot and may be outdated as
    /// soon as it is returned.
    pub fn pending(&self) -> Result<usize> {
        self.host
            .pending(self.id)
            .into_result(Error::Failed("unsatisfied".to_owned()))
    }
    /// Returns the queue information snapshot
    pub fn info(&self) -> Result<QueueInfo> {
        let info = self
            .host
            .info(self.id)
            .into_result(Error::Failed("unsatisfied".to_owned()))?;
        Ok(QueueInfo {
            name: self.name.or(info.name),
            id: self.id,
            capacity: info.capacity,
            max_message_size: info.max_message_size,
            pending: info.pending,
            waiting_senders: info.waiting_senders,
            waiting_receivers: info.waiting_receivers,
        })
    }
    /// Writes the queue diagnostics to the log. Level 0 prints a summary, higher levels add the
    /// waiting task counters.
    pub fn show(&self, level: u32) {
        match self.info() {
            Ok(info) if level == 0 => {
                info!(queue = %info.display_name(), id = %info.id, pending = info.pending,
                    capacity = info.capacity, "message queue");
            }
            Ok(info) => {
                info!(queue = %info.display_name(), id = %info.id, pending = info.pending,
                    capacity = info.capacity, max_message_size = info.max_message_size,
                    waiting_senders = ?info.waiting_senders,
                    waiting_receivers = ?info.waiting_receivers, "message queue");
            }
            Err(error) => {
                info!(id = %self.id, %error, "message queue unavailable");
            }
        }
    }
    /// Destroys the queue. Tasks waiting on the queue are woken up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the queue has been already destroyed
    pub fn destroy(self) -> Result<()> {
        self.host
            .delete(self.id)
            .into_result(Error::Failed("unsatisfied".to_owned()))?;
        debug!(id = %self.id, "message queue destroyed");
        Ok(())
    }
}

/// Queue information snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue name
    pub name: Option<QueueName>,
    /// Native id
    pub id: QueueId,
    /// Maximum number of buffered messages
    pub capacity: usize,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Number of pending messages
    pub pending: usize,
    /// Number of tasks waiting to send, if known
    pub waiting_senders: Option<usize>,
    /// Number of tasks waiting to receive, if known
    pub waiting_receivers: Option<usize>,
}

impl QueueInfo {
    fn display_name(&self) -> &str {
        self.name.as_ref().map_or("-", QueueName::as_str)
    }
}

impl fmt::Display for QueueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} capacity={} size={} pending={}",
            self.display_name(),
            self.id,
            self.capacity,
            self.max_message_size,
            self.pending
        )?;
        if let Some(senders) = self.waiting_senders {
            write!(f, " senders={}", senders)?;
        }
        if let Some(receivers) = self.waiting_receivers {
            write!(f, " receivers={}", receivers)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::QueueFactory;
    use crate::{
        host::sim::{SimConfig, SimHost},
        name::NameAllocator,
        timeout::TickRate,
        Error, QueueId,
    };

    fn factory() -> QueueFactory {
        QueueFactory::default()
    }

    fn wait_until<F: Fn() -> bool>(f: F) {
        while !f() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_create_empty() {
        let factory = factory();
        for (capacity, size) in [(1, 1), (1, 4), (10, 1), (16, 256)] {
            let q = factory.create(capacity, size).unwrap();
            assert_eq!(q.pending().unwrap(), 0);
            assert_eq!(q.capacity(), capacity);
            assert_eq!(q.max_message_size(), size);
        }
    }

    #[test]
    fn test_create_invalid() {
        let factory = factory();
        assert!(matches!(factory.create(0, 4), Err(Error::InvalidData(_))));
        assert!(matches!(factory.create(4, 0), Err(Error::InvalidData(_))));
        assert_eq!(factory.host().queue_count(), 0);
    }

    #[test]
    fn test_create_exhausted() {
        let host = Arc::new(SimHost::new(SimConfig::new().max_queues(1)));
        let factory = QueueFactory::new(host).unwrap();
        let _q = factory.create(1, 1).unwrap();
        let err = factory.create(1, 1).unwrap_err();
        insta::assert_snapshot!(err, @"operation failed: too many");
    }

    #[test]
    fn test_scenario() {
        let q = factory().create(1, 4).unwrap();
        q.try_send(b"AB").unwrap();
        assert_eq!(q.try_send(b"CD").unwrap_err(), Error::ChannelFull);
        let mut buf = [0u8; 4];
        assert_eq!(q.try_recv(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"AB");
        q.try_send(b"CD").unwrap();
    }

    #[test]
    fn test_capacity_boundary() {
        let q = factory().create(5, 1).unwrap();
        for i in 0..5u8 {
            q.try_send(&[i]).unwrap();
        }
        let start = Instant::now();
        assert_eq!(q.try_send(&[5]).unwrap_err(), Error::ChannelFull);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(q.pending().unwrap(), 5);
    }

    #[test]
    fn test_pending_tracks_transfers() {
        let q = factory().create(8, 2).unwrap();
        let mut buf = [0u8; 2];
        let mut expected = 0;
        for step in 0..20 {
            if step % 3 == 2 {
                q.try_recv(&mut buf).unwrap();
                expected -= 1;
            } else if expected < 8 {
                q.try_send(b"x").unwrap();
                expected += 1;
            }
            assert_eq!(q.pending().unwrap(), expected);
        }
    }

    #[test]
    fn test_fifo() {
        let q = factory().create(4, 4).unwrap();
        let tx = q.clone();
        let producer = thread::spawn(move || {
            for i in 0..1000u32 {
                tx.send(&i.to_le_bytes()).unwrap();
            }
        });
        let mut buf = [0u8; 4];
        for i in 0..1000u32 {
            assert_eq!(q.recv(&mut buf).unwrap(), 4);
            assert_eq!(u32::from_le_bytes(buf), i);
        }
        producer.join().unwrap();
        assert_eq!(q.pending().unwrap(), 0);
    }

    #[test]
    fn test_multiple_producers() {
        let q = factory().create(2, 8).unwrap();
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let tx = q.clone();
            producers.push(thread::spawn(move || {
                for i in 0..200u32 {
                    let mut msg = [0u8; 8];
                    msg[..4].copy_from_slice(&p.to_le_bytes());
                    msg[4..].copy_from_slice(&i.to_le_bytes());
                    tx.send(&msg).unwrap();
                }
            }));
        }
        let mut last = [None::<u32>; 4];
        let mut buf = [0u8; 8];
        for _ in 0..800 {
            assert_eq!(q.recv(&mut buf).unwrap(), 8);
            let p = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
            let i = u32::from_le_bytes(buf[4..].try_into().unwrap());
            assert!(last[p].map_or(true, |prev| prev < i));
            last[p] = Some(i);
        }
        for producer in producers {
            producer.join().unwrap();
        }
        insta::assert_debug_snapshot!(last, @r###"
        [
            Some(
                199,
            ),
            Some(
                199,
            ),
            Some(
                199,
            ),
            Some(
                199,
            ),
        ]
        "###);
    }

    #[test]
    fn test_small_timeout_waits_one_tick() {
        let host = Arc::new(SimHost::new(
            SimConfig::new().tick_rate(TickRate::new(100.0).unwrap()),
        ));
        let q = QueueFactory::new(host).unwrap().create(1, 4).unwrap();
        q.try_send(b"full").unwrap();
        let start = Instant::now();
        assert_eq!(q.send_timeout(b"more", 0.000_000_1).unwrap_err(), Error::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_timeout_follows_host_rate() {
        let host = Arc::new(SimHost::new(
            SimConfig::new().tick_rate(TickRate::new(1000.0).unwrap()),
        ));
        let factory = QueueFactory::new(host).unwrap();
        assert_eq!(factory.tick_rate().ticks_per_second(), 1000.0);
        let q = factory.create(1, 4).unwrap();
        let mut buf = [0u8; 4];
        let start = Instant::now();
        assert_eq!(q.recv_timeout(&mut buf, 0.05).unwrap_err(), Error::Timeout);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(400), "waited {:?}", elapsed);
    }

    #[test]
    fn test_non_positive_timeouts() {
        let q = factory().create(1, 4).unwrap();
        let mut buf = [0u8; 4];
        let start = Instant::now();
        assert_eq!(q.recv_timeout(&mut buf, 0.0).unwrap_err(), Error::ChannelEmpty);
        assert_eq!(q.recv_timeout(&mut buf, -1.0).unwrap_err(), Error::ChannelEmpty);
        q.send_timeout(b"a", 0.0).unwrap();
        assert_eq!(q.send_timeout(b"b", -3.0).unwrap_err(), Error::ChannelFull);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(q.recv_timeout(&mut buf, 0.0).unwrap(), 1);
    }

    #[test]
    fn test_recv_timeout_delivered() {
        let q = factory().create(1, 4).unwrap();
        let tx = q.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(b"late").unwrap();
        });
        let mut buf = [0u8; 4];
        assert_eq!(q.recv_timeout(&mut buf, 5.0).unwrap(), 4);
        assert_eq!(&buf, b"late");
        producer.join().unwrap();
        assert_eq!(q.recv_timeout(&mut buf, 0.05).unwrap_err(), Error::Timeout);
    }

    #[test]
    fn test_sizes_checked() {
        let q = factory().create(2, 4).unwrap();
        assert!(matches!(q.try_send(b"12345"), Err(Error::InvalidData(_))));
        q.try_send(b"1234").unwrap();
        let mut short = [0u8; 3];
        assert!(matches!(q.try_recv(&mut short), Err(Error::InvalidData(_))));
        assert_eq!(q.pending().unwrap(), 1);
        // the caller buffer may be reused right after sending
        let mut msg = *b"abcd";
        q.try_send(&msg).unwrap();
        msg.copy_from_slice(b"zzzz");
        let mut buf = [0u8; 8];
        q.try_recv(&mut buf).unwrap();
        assert_eq!(q.try_recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn test_destroy() {
        let factory = factory();
        let q = factory.create(1, 4).unwrap();
        let rx = q.clone();
        let receiver = thread::spawn(move || {
            let mut buf = [0u8; 4];
            rx.recv(&mut buf)
        });
        wait_until(|| q.info().unwrap().waiting_receivers == Some(1));
        let other = q.clone();
        q.destroy().unwrap();
        assert_eq!(receiver.join().unwrap().unwrap_err(), Error::ChannelClosed);
        assert_eq!(other.try_send(b"x").unwrap_err(), Error::InvalidHandle);
        assert_eq!(other.pending().unwrap_err(), Error::InvalidHandle);
        assert_eq!(other.clone().destroy().unwrap_err(), Error::InvalidHandle);
        assert_eq!(factory.host().queue_count(), 0);
    }

    #[test]
    fn test_attach() {
        let factory = factory();
        let q = factory.create(3, 6).unwrap();
        let attached = factory.attach(q.id()).unwrap();
        assert_eq!(attached, q);
        assert_eq!(attached.name(), q.name());
        assert_eq!(attached.capacity(), 3);
        assert_eq!(attached.max_message_size(), 6);
        attached.try_send(b"hi").unwrap();
        assert_eq!(q.pending().unwrap(), 1);
        assert_eq!(
            factory.attach(QueueId::from_raw(0x0201_0001)).unwrap_err(),
            Error::RemoteObject
        );
        assert_eq!(
            factory.attach(QueueId::from_raw(0x0100_0fff)).unwrap_err(),
            Error::InvalidHandle
        );
    }

    #[test]
    fn test_equality() {
        let factory = factory();
        let q1 = factory.create(1, 1).unwrap();
        let q2 = factory.create(1, 1).unwrap();
        assert_eq!(q1, q1.clone());
        assert_ne!(q1, q2);
        let other = self::factory().create(1, 1).unwrap();
        assert_eq!(other.id(), q1.id());
        assert_ne!(other, q1);
    }

    #[test]
    fn test_info() {
        static NAMES: NameAllocator = NameAllocator::new();
        let factory = self::factory().with_names(&NAMES);
        let q = factory.create(2, 8).unwrap();
        q.try_send(b"abc").unwrap();
        insta::assert_snapshot!(q.info().unwrap(), @"Qaaa 0x01000001 capacity=2 size=8 pending=1 senders=0 receivers=0");
        q.show(0);
        q.show(1);
        let q2 = q.clone();
        q.destroy().unwrap();
        q2.show(1);
    }
}
