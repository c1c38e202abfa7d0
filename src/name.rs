use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

const TAG: u8 = b'Q';
const FIRST: u8 = b'a';
const LETTERS: u32 = 26;

/// Number of distinct names before the rotation repeats
pub const ROTATION_PERIOD: usize = PERIOD as usize;

const PERIOD: u32 = LETTERS * LETTERS * LETTERS;

/// Process-wide name allocator, used by queue factories by default
pub static NAMES: NameAllocator = NameAllocator::new();

/// A compact queue name: the `Q` tag followed by three rotating lowercase letters
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QueueName([u8; 4]);

impl QueueName {
    /// Returns the name as a string slice
    pub fn as_str(&self) -> &str {
        // always ASCII
        core::str::from_utf8(&self.0).unwrap_or("Q???")
    }
    /// Returns the raw name bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
    /// Packs the name into a 32-bit object name, first character in the most significant byte
    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotating queue name allocator.
///
/// The counter is advanced with a single atomic update, so the allocator never blocks and may be
/// used from contexts where blocking is not allowed. Names repeat after [`ROTATION_PERIOD`]
/// allocations.
pub struct NameAllocator {
    // position in the rotation, 0 is "aaa"
    counter: AtomicU32,
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameAllocator {
    /// Creates a new allocator, the first issued name is `Qaaa`
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }
    /// Issues the next name
    pub fn allocate(&self) -> QueueName {
        match self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some((n + 1) % PERIOD)
            }) {
            Ok(n) | Err(n) => make_name(n),
        }
    }
    /// Returns the name which is going to be issued next, without consuming it
    pub fn peek(&self) -> QueueName {
        make_name(self.counter.load(Ordering::SeqCst))
    }
}

// units change first, then tens, then hundreds
#[allow(clippy::cast_possible_truncation)]
fn make_name(n: u32) -> QueueName {
    let letter = |v: u32| FIRST + (v % LETTERS) as u8;
    QueueName([TAG, letter(n / (LETTERS * LETTERS)), letter(n / LETTERS), letter(n)])
}
