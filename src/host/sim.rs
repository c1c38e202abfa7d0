use std::{collections::VecDeque, sync::Arc};

use object_id::UniqueId;
use parking_lot_rt::{Condvar, Mutex, MutexGuard};

use super::{HostQueueInfo, MessageQueueHost, QueueId};
use crate::{
    name::QueueName,
    outcome::{Failure, Outcome},
    timeout::{Deadline, TickRate, Wait},
};

const MAX_OBJECTS: usize = u16::MAX as usize;

/// Native status codes of the simulated kernel
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    /// successful completion
    Successful,
    /// no free object control blocks
    TooMany,
    /// unknown or stale object id
    InvalidId,
    /// message or buffer size is out of range
    InvalidSize,
    /// count is out of range
    InvalidNumber,
    /// the request can not be satisfied without waiting
    Unsatisfied,
    /// the wait has timed out
    Timeout,
    /// the object has been deleted while waiting
    ObjectWasDeleted,
    /// the operation is not allowed on a remote object
    IllegalOnRemoteObject,
    /// kernel inconsistency
    InternalError,
}

impl Status {
    /// Diagnostic text of the status code
    pub fn text(self) -> &'static str {
        match self {
            Status::Successful => "successful completion",
            Status::TooMany => "too many",
            Status::InvalidId => "invalid id",
            Status::InvalidSize => "invalid size",
            Status::InvalidNumber => "invalid number",
            Status::Unsatisfied => "unsatisfied",
            Status::Timeout => "timed out waiting",
            Status::ObjectWasDeleted => "object was deleted while waiting",
            Status::IllegalOnRemoteObject => "illegal on remote object",
            Status::InternalError => "internal error",
        }
    }
}

fn translate<T>(result: Result<T, Status>) -> Outcome<T> {
    match result {
        Ok(value) => Outcome::Success(value),
        Err(Status::InvalidId) => Outcome::InvalidHandle,
        Err(Status::IllegalOnRemoteObject) => Outcome::UnsupportedRemote,
        Err(Status::Unsatisfied) => Outcome::Failure(Failure::WouldBlock),
        Err(Status::Timeout) => Outcome::Failure(Failure::TimedOut),
        Err(Status::ObjectWasDeleted) => Outcome::Failure(Failure::Deleted),
        Err(Status::InvalidSize) => Outcome::Failure(Failure::InvalidSize),
        Err(status @ Status::TooMany) => Outcome::Failure(Failure::Exhausted(status.text().into())),
        Err(status @ (Status::InvalidNumber | Status::InternalError | Status::Successful)) => {
            Outcome::Failure(Failure::Internal(status.text().into()))
        }
    }
}

// node:8 | generation:8 | index:16, index is 1-based
fn encode_id(node: u8, generation: u8, index: usize) -> QueueId {
    #[allow(clippy::cast_possible_truncation)]
    let index = (index + 1) as u32 & 0xffff;
    QueueId::from_raw(u32::from(node) << 24 | u32::from(generation) << 16 | index)
}

#[allow(clippy::cast_possible_truncation)]
fn decode_id(id: QueueId) -> (u8, u8, Option<usize>) {
    let raw = id.as_raw();
    let index = (raw & 0xffff) as usize;
    ((raw >> 24) as u8, (raw >> 16) as u8, index.checked_sub(1))
}

/// Simulated kernel configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SimConfig {
    tick_rate: TickRate,
    max_queues: usize,
    node: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: TickRate::default(),
            max_queues: 64,
            node: 1,
        }
    }
}

impl SimConfig {
    /// Creates the default configuration: 100 ticks per second, 64 queues, node 1
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the scheduler tick rate
    pub fn tick_rate(mut self, tick_rate: TickRate) -> Self {
        self.tick_rate = tick_rate;
        self
    }
    /// Sets the maximum number of simultaneously existing queues (up to 65535)
    pub fn max_queues(mut self, max_queues: usize) -> Self {
        self.max_queues = max_queues.min(MAX_OBJECTS);
        self
    }
    /// Sets the local node number
    pub fn node(mut self, node: u8) -> Self {
        self.node = node;
        self
    }
}

struct Slot {
    generation: u8,
    queue: Option<Arc<CoreQueue>>,
}

enum Location {
    Local(Arc<CoreQueue>),
    Remote,
    Error,
}

/// In-process message queue kernel.
///
/// Mimics a classic RTOS message queue manager: queues live in a fixed-size object table, are
/// addressed by ids carrying the node number and the slot generation, message buffers are
/// allocated once at creation and waits are measured in scheduler ticks.
pub struct SimHost {
    id: UniqueId,
    config: SimConfig,
    objects: Mutex<Vec<Slot>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimHost {
    /// Creates a new kernel instance
    pub fn new(config: SimConfig) -> Self {
        let objects = (0..config.max_queues)
            .map(|_| Slot {
                generation: 0,
                queue: None,
            })
            .collect();
        Self {
            id: <_>::default(),
            config,
            objects: Mutex::new(objects),
        }
    }
    /// Returns the kernel configuration
    pub fn config(&self) -> &SimConfig {
        &self.config
    }
    /// Returns the number of live queues
    pub fn queue_count(&self) -> usize {
        self.objects
            .lock()
            .iter()
            .filter(|slot| slot.queue.is_some())
            .count()
    }
    fn locate(&self, id: QueueId) -> Location {
        let (node, generation, index) = decode_id(id);
        if node != self.config.node {
            return Location::Remote;
        }
        let objects = self.objects.lock();
        match index.and_then(|i| objects.get(i)) {
            Some(Slot {
                generation: g,
                queue: Some(queue),
            }) if *g == generation => Location::Local(queue.clone()),
            _ => Location::Error,
        }
    }
    fn local(&self, id: QueueId) -> Result<Arc<CoreQueue>, Status> {
        match self.locate(id) {
            Location::Local(queue) => Ok(queue),
            Location::Remote => Err(Status::IllegalOnRemoteObject),
            Location::Error => Err(Status::InvalidId),
        }
    }
    fn do_create(
        &self,
        name: QueueName,
        capacity: usize,
        max_message_size: usize,
    ) -> Result<QueueId, Status> {
        if capacity == 0 {
            return Err(Status::InvalidNumber);
        }
        if max_message_size == 0 {
            return Err(Status::InvalidSize);
        }
        let mut objects = self.objects.lock();
        let (index, slot) = objects
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.queue.is_none())
            .ok_or(Status::TooMany)?;
        slot.queue = Some(Arc::new(CoreQueue::new(name, capacity, max_message_size)));
        Ok(encode_id(self.config.node, slot.generation, index))
    }
    fn do_delete(&self, id: QueueId) -> Result<(), Status> {
        let (node, generation, index) = decode_id(id);
        if node != self.config.node {
            return Err(Status::IllegalOnRemoteObject);
        }
        let queue = {
            let mut objects = self.objects.lock();
            let slot = index
                .and_then(|i| objects.get_mut(i))
                .filter(|slot| slot.generation == generation && slot.queue.is_some())
                .ok_or(Status::InvalidId)?;
            slot.generation = slot.generation.wrapping_add(1);
            slot.queue.take().ok_or(Status::InternalError)?
        };
        queue.close();
        Ok(())
    }
}

impl MessageQueueHost for SimHost {
    fn ticks_per_second(&self) -> f64 {
        self.config.tick_rate.ticks_per_second()
    }
    fn create(
        &self,
        name: QueueName,
        capacity: usize,
        max_message_size: usize,
    ) -> Outcome<QueueId> {
        translate(self.do_create(name, capacity, max_message_size))
    }
    fn delete(&self, id: QueueId) -> Outcome<()> {
        translate(self.do_delete(id))
    }
    fn send(&self, id: QueueId, message: &[u8], wait: Wait) -> Outcome<()> {
        translate(
            self.local(id)
                .and_then(|queue| queue.send(message, wait, self.config.tick_rate)),
        )
    }
    fn receive(&self, id: QueueId, buffer: &mut [u8], wait: Wait) -> Outcome<usize> {
        translate(
            self.local(id)
                .and_then(|queue| queue.receive(buffer, wait, self.config.tick_rate)),
        )
    }
    fn pending(&self, id: QueueId) -> Outcome<usize> {
        translate(self.local(id).map(|queue| queue.state.lock().messages.len()))
    }
    fn info(&self, id: QueueId) -> Outcome<HostQueueInfo> {
        translate(self.local(id).map(|queue| queue.info()))
    }
    fn instance_id(&self) -> usize {
        self.id.as_usize()
    }
}

struct Message {
    buf: Box<[u8]>,
    len: usize,
}

struct CoreState {
    messages: VecDeque<Message>,
    free: Vec<Box<[u8]>>,
    waiting_senders: usize,
    waiting_receivers: usize,
    deleted: bool,
}

#[derive(Copy, Clone)]
enum Side {
    Send,
    Receive,
}

struct CoreQueue {
    name: QueueName,
    capacity: usize,
    max_message_size: usize,
    state: Mutex<CoreState>,
    data_available: Condvar,
    space_available: Condvar,
}

impl CoreQueue {
    fn new(name: QueueName, capacity: usize, max_message_size: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0u8; max_message_size].into_boxed_slice())
            .collect();
        Self {
            name,
            capacity,
            max_message_size,
            state: Mutex::new(CoreState {
                messages: VecDeque::with_capacity(capacity),
                free,
                waiting_senders: 0,
                waiting_receivers: 0,
                deleted: false,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
        }
    }
    fn close(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        self.data_available.notify_all();
        self.space_available.notify_all();
    }
    fn info(&self) -> HostQueueInfo {
        let state = self.state.lock();
        HostQueueInfo {
            name: Some(self.name),
            capacity: self.capacity,
            max_message_size: self.max_message_size,
            pending: state.messages.len(),
            waiting_senders: Some(state.waiting_senders),
            waiting_receivers: Some(state.waiting_receivers),
        }
    }
    fn send(&self, message: &[u8], wait: Wait, rate: TickRate) -> Result<(), Status> {
        if message.len() > self.max_message_size {
            return Err(Status::InvalidSize);
        }
        let deadline = deadline_for(wait, rate);
        let mut state = self.state.lock();
        loop {
            if state.deleted {
                return Err(Status::ObjectWasDeleted);
            }
            if let Some(mut buf) = state.free.pop() {
                buf[..message.len()].copy_from_slice(message);
                state.messages.push_back(Message {
                    buf,
                    len: message.len(),
                });
                self.data_available.notify_one();
                return Ok(());
            }
            self.suspend(Side::Send, &mut state, wait, deadline.as_ref())?;
        }
    }
    fn receive(&self, buffer: &mut [u8], wait: Wait, rate: TickRate) -> Result<usize, Status> {
        let deadline = deadline_for(wait, rate);
        let mut state = self.state.lock();
        loop {
            if state.deleted {
                return Err(Status::ObjectWasDeleted);
            }
            if let Some(len) = state.messages.front().map(|m| m.len) {
                if buffer.len() < len {
                    // pass the wakeup on to a receiver which can take the message
                    self.data_available.notify_one();
                    return Err(Status::InvalidSize);
                }
                let message = state.messages.pop_front().ok_or(Status::InternalError)?;
                buffer[..len].copy_from_slice(&message.buf[..len]);
                state.free.push(message.buf);
                self.space_available.notify_one();
                return Ok(len);
            }
            self.suspend(Side::Receive, &mut state, wait, deadline.as_ref())?;
        }
    }
    fn suspend(
        &self,
        side: Side,
        state: &mut MutexGuard<'_, CoreState>,
        wait: Wait,
        deadline: Option<&Deadline>,
    ) -> Result<(), Status> {
        let remaining = match wait {
            Wait::NoWait => return Err(Status::Unsatisfied),
            Wait::Forever => None,
            Wait::Ticks(_) => Some(
                deadline
                    .and_then(Deadline::remaining)
                    .ok_or(Status::Timeout)?,
            ),
        };
        let (cv, waiters) = match side {
            Side::Send => (&self.space_available, &mut state.waiting_senders),
            Side::Receive => (&self.data_available, &mut state.waiting_receivers),
        };
        *waiters += 1;
        if let Some(remaining) = remaining {
            cv.wait_for(state, remaining);
        } else {
            cv.wait(state);
        }
        match side {
            Side::Send => state.waiting_senders -= 1,
            Side::Receive => state.waiting_receivers -= 1,
        }
        Ok(())
    }
}

fn deadline_for(wait: Wait, rate: TickRate) -> Option<Deadline> {
    if let Wait::Ticks(ticks) = wait {
        Some(Deadline::new(rate.duration_of(ticks.get())))
    } else {
        None
    }
}
