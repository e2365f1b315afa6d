/*
Time-queue for the crossbar model.

Time is kept in ticks; every clocked component owns a ClockDomain that converts cycles into ticks
and snaps arbitrary ticks onto its clock edges.

Each link holds a PacketQueue: a bounded FIFO of payloads ordered by the tick at which they become
visible to the peer on the other side of the link. A full queue hands the payload back as
Backpressure so the caller can retry later instead of dropping it.
*/

use std::collections::VecDeque;

pub type Tick = u64;
pub type Cycle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDomain {
    period: Tick,
}

impl ClockDomain {
    pub fn new(period: Tick) -> Self {
        assert!(period > 0, "clock period must be > 0");
        Self { period }
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    // Ticks spanned by `n` cycles of this clock.
    pub fn cycles(&self, n: Cycle) -> Tick {
        n.saturating_mul(self.period)
    }

    // First clock edge at or after `now`, pushed `n` cycles further out.
    pub fn clock_edge(&self, now: Tick, n: Cycle) -> Tick {
        let aligned = ceil_div_u64(now, self.period).saturating_mul(self.period);
        aligned.saturating_add(self.cycles(n))
    }

    // Ticks needed to move `size_bytes` across a datapath `width` bytes wide.
    pub fn payload_delay(&self, size_bytes: u32, width: u32) -> Tick {
        debug_assert!(width > 0);
        self.cycles(ceil_div_u64(size_bytes as u64, width as u64))
    }
}

// Result of scheduling a payload on a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Tick,
    ready_at: Tick,
    size_bytes: u32,
}

impl Ticket {
    pub fn new(issued_at: Tick, ready_at: Tick, size_bytes: u32) -> Self {
        Self {
            issued_at,
            ready_at,
            size_bytes,
        }
    }

    // Tick at which the payload entered the queue.
    pub fn issued_at(&self) -> Tick {
        self.issued_at
    }

    // Tick at which the payload becomes visible to the peer.
    pub fn ready_at(&self) -> Tick {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Tick) -> bool {
        now >= self.ready_at
    }
}

// Reasons why a queue rejected a payload
#[derive(Debug)]
pub enum Backpressure<T> {
    // The bounded FIFO is full
    QueueFull { payload: T, capacity: usize },
}

impl<T> Backpressure<T> {
    // Recover the payload so it can be retried later.
    pub fn into_payload(self) -> T {
        match self {
            Backpressure::QueueFull { payload, .. } => payload,
        }
    }
}

#[derive(Debug)]
struct Scheduled<T> {
    payload: T,
    ticket: Ticket,
}

// Bounded queue of payloads waiting for their ready tick.  Entries are kept sorted by ready tick;
// entries with equal ready ticks keep their insertion order.
#[derive(Debug)]
pub struct PacketQueue<T> {
    capacity: usize,
    entries: VecDeque<Scheduled<T>>,
}

impl<T> PacketQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    // Schedule `payload` to become visible at `ready_at`.  Fails without side effects when full.
    pub fn schedule(
        &mut self,
        now: Tick,
        payload: T,
        ready_at: Tick,
        size_bytes: u32,
    ) -> Result<Ticket, Backpressure<T>> {
        if self.is_full() {
            return Err(Backpressure::QueueFull {
                payload,
                capacity: self.capacity,
            });
        }
        Ok(self.insert(now, payload, ready_at, size_bytes))
    }

    // Schedule regardless of capacity.  Used for traffic that already owns a slot on the wire.
    pub fn force_schedule(&mut self, now: Tick, payload: T, ready_at: Tick, size_bytes: u32) -> Ticket {
        self.insert(now, payload, ready_at, size_bytes)
    }

    fn insert(&mut self, now: Tick, payload: T, ready_at: Tick, size_bytes: u32) -> Ticket {
        let ticket = Ticket::new(now, ready_at.max(now), size_bytes);
        let pos = self
            .entries
            .iter()
            .rposition(|entry| entry.ticket.ready_at() <= ticket.ready_at())
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.entries.insert(pos, Scheduled { payload, ticket });
        ticket
    }

    pub fn peek_ready(&self, now: Tick) -> Option<&T> {
        self.entries
            .front()
            .filter(|entry| entry.ticket.is_ready(now))
            .map(|entry| &entry.payload)
    }

    pub fn pop_ready(&mut self, now: Tick) -> Option<T> {
        if !self.entries.front()?.ticket.is_ready(now) {
            return None;
        }
        self.entries.pop_front().map(|entry| entry.payload)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.payload)
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.entries.iter_mut().map(|entry| &mut entry.payload)
    }

    // Most recently scheduled entry in delivery order.
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.entries.back_mut().map(|entry| &mut entry.payload)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        self.entries.pop_back().map(|entry| entry.payload)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn ceil_div_u64(nom: u64, denom: u64) -> u64 {
    debug_assert!(denom > 0);
    (nom + denom - 1) / denom
}
