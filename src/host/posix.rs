use std::{
    os::fd::{AsRawFd, FromRawFd},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use nix::{
    errno::Errno,
    mqueue::{
        mq_close, mq_getattr, mq_open, mq_timedreceive, mq_unlink, MQ_OFlag, MqAttr, MqdT,
    },
    sys::{stat::Mode, time::TimeSpec},
    time::{clock_gettime, ClockId},
    unistd::{sysconf, SysconfVar},
};
use object_id::UniqueId;
use parking_lot_rt::Mutex;

use super::{HostQueueInfo, MessageQueueHost, QueueId};
use crate::{
    name::QueueName,
    outcome::{Failure, Outcome},
    timeout::{Deadline, TickRate, Wait},
};

// blocked calls re-check the deleted flag at least this often
const WAIT_SLICE: Duration = Duration::from_millis(20);

const MAX_SLOTS: usize = u16::MAX as usize;

fn translate_errno<T>(code: Errno, wait: Wait) -> Outcome<T> {
    match code {
        Errno::EBADF => Outcome::InvalidHandle,
        Errno::EAGAIN => Outcome::Failure(Failure::WouldBlock),
        // a no-wait call is a timed call with an already expired deadline
        Errno::ETIMEDOUT if wait.is_no_wait() => Outcome::Failure(Failure::WouldBlock),
        Errno::ETIMEDOUT => Outcome::Failure(Failure::TimedOut),
        Errno::EMSGSIZE => Outcome::Failure(Failure::InvalidSize),
        Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM | Errno::ENOSPC => {
            Outcome::Failure(Failure::Exhausted(code.desc().to_owned()))
        }
        _ => Outcome::Failure(Failure::Internal(code.desc().to_owned())),
    }
}

// absolute CLOCK_REALTIME time, as required by the timed mq calls
fn realtime_after(wait: Duration) -> nix::Result<TimeSpec> {
    Ok(clock_gettime(ClockId::CLOCK_REALTIME)? + TimeSpec::from_duration(wait))
}

// nix has no wrapper for mq_timedsend
fn timed_send(mqd: &MqdT, message: &[u8], abstime: &TimeSpec) -> nix::Result<()> {
    let res = unsafe {
        libc::mq_timedsend(
            mqd.as_raw_fd(),
            message.as_ptr().cast(),
            message.len(),
            0,
            abstime.as_ref(),
        )
    };
    Errno::result(res).map(drop)
}

struct PosixQueue {
    mqd: MqdT,
    name: QueueName,
    deleted: AtomicBool,
    waiting_senders: AtomicUsize,
    waiting_receivers: AtomicUsize,
}

impl Drop for PosixQueue {
    fn drop(&mut self) {
        // MqdT is a plain descriptor wrapper, mq_close takes it by value
        let mqd = unsafe { MqdT::from_raw_fd(self.mqd.as_raw_fd()) };
        let _ = mq_close(mqd);
    }
}

struct Slot {
    generation: u16,
    queue: Option<Arc<PosixQueue>>,
}

// generation:16 | index:16, index is 1-based
#[allow(clippy::cast_possible_truncation)]
fn encode_id(generation: u16, index: usize) -> QueueId {
    QueueId::from_raw(u32::from(generation) << 16 | (index + 1) as u32 & 0xffff)
}

#[allow(clippy::cast_possible_truncation)]
fn decode_id(id: QueueId) -> (u16, Option<usize>) {
    let raw = id.as_raw();
    ((raw >> 16) as u16, ((raw & 0xffff) as usize).checked_sub(1))
}

/// Linux POSIX message queue host.
///
/// Queues are created with an exclusive name derived from the queue name and the process id and
/// unlinked right after creation, so they are private to the process. Queue ids are slots of a
/// host-owned descriptor table checked by generation, so a destroyed queue is never confused with
/// a newer one which got the same descriptor number. Blocked calls wait in short slices and
/// return as soon as the queue is deleted.
pub struct PosixHost {
    id: UniqueId,
    tick_rate: TickRate,
    queues: Mutex<Vec<Slot>>,
}

impl Default for PosixHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixHost {
    /// Creates a new host, the tick rate is read from the system clock tick
    pub fn new() -> Self {
        #[allow(clippy::cast_precision_loss)]
        let tick_rate = match sysconf(SysconfVar::CLK_TCK) {
            Ok(Some(ticks)) if ticks > 0 => TickRate::new(ticks as f64).unwrap_or_default(),
            _ => TickRate::default(),
        };
        Self {
            id: <_>::default(),
            tick_rate,
            queues: <_>::default(),
        }
    }
    fn get(&self, id: QueueId) -> Option<Arc<PosixQueue>> {
        let (generation, index) = decode_id(id);
        let queues = self.queues.lock();
        index
            .and_then(|i| queues.get(i))
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.queue.clone())
    }
    fn register(&self, queue: PosixQueue) -> Outcome<QueueId> {
        let mut queues = self.queues.lock();
        let index = if let Some(index) = queues.iter().position(|slot| slot.queue.is_none()) {
            index
        } else if queues.len() < MAX_SLOTS {
            queues.push(Slot {
                generation: 0,
                queue: None,
            });
            queues.len() - 1
        } else {
            return Outcome::Failure(Failure::Exhausted("too many".to_owned()));
        };
        let slot = &mut queues[index];
        slot.queue = Some(Arc::new(queue));
        Outcome::Success(encode_id(slot.generation, index))
    }
    // runs a timed mq call until it completes, the wait expires or the queue is deleted
    fn transfer<T, F>(
        &self,
        queue: &PosixQueue,
        wait: Wait,
        waiters: &AtomicUsize,
        mut op: F,
    ) -> Outcome<T>
    where
        F: FnMut(&TimeSpec) -> nix::Result<T>,
    {
        let deadline = match wait {
            Wait::Ticks(ticks) => Some(Deadline::new(self.tick_rate.duration_of(ticks.get()))),
            Wait::NoWait | Wait::Forever => None,
        };
        if !wait.is_no_wait() {
            waiters.fetch_add(1, Ordering::SeqCst);
        }
        let result = loop {
            if queue.deleted.load(Ordering::SeqCst) {
                break Outcome::Failure(Failure::Deleted);
            }
            let slice = match wait {
                Wait::NoWait => Duration::ZERO,
                Wait::Forever => WAIT_SLICE,
                Wait::Ticks(_) => {
                    let Some(remaining) = deadline.as_ref().and_then(Deadline::remaining) else {
                        break Outcome::Failure(Failure::TimedOut);
                    };
                    remaining.min(WAIT_SLICE)
                }
            };
            let abstime = match realtime_after(slice) {
                Ok(t) => t,
                Err(code) => break translate_errno(code, wait),
            };
            match op(&abstime) {
                Ok(value) => break Outcome::Success(value),
                Err(Errno::EINTR) => continue,
                Err(Errno::ETIMEDOUT) if !wait.is_no_wait() => continue,
                Err(code) => break translate_errno(code, wait),
            }
        };
        if !wait.is_no_wait() {
            waiters.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }
}

impl MessageQueueHost for PosixHost {
    fn ticks_per_second(&self) -> f64 {
        self.tick_rate.ticks_per_second()
    }
    fn create(
        &self,
        name: QueueName,
        capacity: usize,
        max_message_size: usize,
    ) -> Outcome<QueueId> {
        let path = format!("/{}.{}", name, std::process::id());
        let (Ok(maxmsg), Ok(msgsize)) = (
            libc::c_long::try_from(capacity),
            libc::c_long::try_from(max_message_size),
        ) else {
            return Outcome::Failure(Failure::InvalidSize);
        };
        let attr = MqAttr::new(0, maxmsg, msgsize, 0);
        let mqd = match mq_open(
            path.as_str(),
            MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        ) {
            Ok(mqd) => mqd,
            // the kernel refuses sizes above the system limits with EINVAL
            Err(code @ Errno::EINVAL) => {
                return Outcome::Failure(Failure::Exhausted(code.desc().to_owned()))
            }
            Err(code) => return translate_errno(code, Wait::NoWait),
        };
        let _ = mq_unlink(path.as_str());
        self.register(PosixQueue {
            mqd,
            name,
            deleted: AtomicBool::new(false),
            waiting_senders: AtomicUsize::new(0),
            waiting_receivers: AtomicUsize::new(0),
        })
    }
    fn delete(&self, id: QueueId) -> Outcome<()> {
        let (generation, index) = decode_id(id);
        let queue = {
            let mut queues = self.queues.lock();
            let Some(slot) = index
                .and_then(|i| queues.get_mut(i))
                .filter(|slot| slot.generation == generation && slot.queue.is_some())
            else {
                return Outcome::InvalidHandle;
            };
            slot.generation = slot.generation.wrapping_add(1);
            slot.queue.take()
        };
        // the descriptor is closed when the last blocked call returns
        if let Some(queue) = queue {
            queue.deleted.store(true, Ordering::SeqCst);
        }
        Outcome::Success(())
    }
    fn send(&self, id: QueueId, message: &[u8], wait: Wait) -> Outcome<()> {
        let Some(queue) = self.get(id) else {
            return Outcome::InvalidHandle;
        };
        self.transfer(&queue, wait, &queue.waiting_senders, |abstime| {
            timed_send(&queue.mqd, message, abstime)
        })
    }
    fn receive(&self, id: QueueId, buffer: &mut [u8], wait: Wait) -> Outcome<usize> {
        let Some(queue) = self.get(id) else {
            return Outcome::InvalidHandle;
        };
        let mut priority = 0;
        self.transfer(&queue, wait, &queue.waiting_receivers, |abstime| {
            mq_timedreceive(&queue.mqd, buffer, &mut priority, abstime)
        })
    }
    fn pending(&self, id: QueueId) -> Outcome<usize> {
        self.info(id).map(|info| info.pending)
    }
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn info(&self, id: QueueId) -> Outcome<HostQueueInfo> {
        let Some(queue) = self.get(id) else {
            return Outcome::InvalidHandle;
        };
        match mq_getattr(&queue.mqd) {
            Ok(attr) => Outcome::Success(HostQueueInfo {
                name: Some(queue.name),
                capacity: attr.maxmsg() as usize,
                max_message_size: attr.msgsize() as usize,
                pending: attr.curmsgs() as usize,
                waiting_senders: Some(queue.waiting_senders.load(Ordering::SeqCst)),
                waiting_receivers: Some(queue.waiting_receivers.load(Ordering::SeqCst)),
            }),
            Err(code) => translate_errno(code, Wait::NoWait),
        }
    }
    fn instance_id(&self) -> usize {
        self.id.as_usize()
    }
}
