use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// 2025-01-01T00:00:00Z in milliseconds.
const EPOCH_MILLIS: u64 = 1_735_689_600_000;
const WORKER_ID_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

pub const MAX_WORKER_ID: u16 = (1 << WORKER_ID_BITS) - 1;

/// Issues time-ordered record ids (decimal strings) for requests and events.
/// Ids from one generator sort in creation order.
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: u64,
    /// Last issued `(millis, sequence)`.
    last: Mutex<(u64, u64)>,
}

impl IdGenerator {
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: u64::from(worker_id.min(MAX_WORKER_ID)),
            last: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> String {
        self.next_raw().to_string()
    }

    fn next_raw(&self) -> u64 {
        let mut last = self.last.lock();
        let (last_millis, last_sequence) = *last;
        let mut now = now_millis().max(last_millis);

        let sequence = if now == last_millis {
            let next = (last_sequence + 1) & SEQUENCE_MASK;
            if next == 0 {
                // Sequence exhausted for this millisecond.
                now = wait_past(last_millis);
            }
            next
        } else {
            0
        };

        *last = (now, sequence);
        compose(now, self.worker_id, sequence)
    }
}

fn compose(millis: u64, worker_id: u64, sequence: u64) -> u64 {
    (millis.saturating_sub(EPOCH_MILLIS) << (WORKER_ID_BITS + SEQUENCE_BITS))
        | (worker_id << SEQUENCE_BITS)
        | sequence
}

/// Creation time encoded in a record id, if it is one of ours.
pub fn issued_at(id: &str) -> Option<DateTime<Utc>> {
    let raw = id.parse::<u64>().ok()?;
    let millis = (raw >> (WORKER_ID_BITS + SEQUENCE_BITS)) + EPOCH_MILLIS;
    DateTime::from_timestamp_millis(i64::try_from(millis).ok()?)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(EPOCH_MILLIS)
}

fn wait_past(millis: u64) -> u64 {
    loop {
        let now = now_millis();
        if now > millis {
            return now;
        }
        thread::sleep(Duration::from_micros(100));
    }
}
