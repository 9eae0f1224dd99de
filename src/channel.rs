//! Channel state: three co-located ring queues and a capacity bound.
//!
//! The give/take/select algorithms live with the scheduler in
//! [`evloop`](crate::evloop); they need the run queue and the fiber table.
//! This module owns the data and the pending-waiter records.

use crate::fiber::FiberId;
use crate::queue::RingQueue;

/// Handle to a channel owned by a [`Loop`](crate::Loop).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChannelId(pub(crate) usize);

pub const MAX_CHANNEL_CAPACITY: i32 = 0xFF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PendingMode {
    /// A plain give or take.
    Item,
    /// A read clause registered by a select.
    ChoiceRead,
    /// A write clause registered by a select.
    ChoiceWrite,
}

/// A fiber parked on a channel. `sched_id` snapshots the fiber's epoch at
/// registration; a mismatch when popped means the fiber has moved on and the
/// record is dropped.
#[derive(Clone, Copy, Debug)]
pub struct Pending {
    pub fiber: FiberId,
    pub sched_id: u32,
    pub mode: PendingMode,
}

pub struct Channel<V> {
    pub items: RingQueue<V>,
    pub read_pending: RingQueue<Pending>,
    pub write_pending: RingQueue<Pending>,
    /// Writers block once `items` exceeds this. Zero means rendezvous: the
    /// item overshoots into `items` by one slot while the writer sleeps.
    pub limit: i32,
}

impl<V> Channel<V> {
    pub fn new(limit: i32) -> Channel<V> {
        Channel {
            items: RingQueue::new(),
            read_pending: RingQueue::new(),
            write_pending: RingQueue::new(),
            limit,
        }
    }

    pub fn count(&self) -> i32 {
        self.items.count()
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.limit
    }
}

#[cfg(test)]
mod test {
    use super::Channel;

    #[test]
    fn unbuffered_is_born_full() {
        let chan: Channel<i32> = Channel::new(0);
        assert_eq!(chan.count(), 0);
        assert!(chan.is_full());
    }

    #[test]
    fn buffered_fills_at_limit() {
        let mut chan: Channel<i32> = Channel::new(2);
        assert!(!chan.is_full());
        chan.items.push(1).unwrap();
        assert!(!chan.is_full());
        chan.items.push(2).unwrap();
        assert!(chan.is_full());
        assert_eq!(chan.count(), 2);
    }
}
