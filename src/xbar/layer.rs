//! Per-link arbitration.  A layer lets one header through at a time, remembers who was turned
//! away, and hands the layer to the oldest waiter when it frees up.

use std::collections::VecDeque;

use crate::timeq::Tick;
use crate::xbar::types::LinkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Idle,
    /// Occupied by a transfer (or a failed attempt) until the given tick.
    Busy { until: Tick },
    /// Held for a notified source until the given tick.
    Retry { port: LinkId, until: Tick },
}

#[derive(Debug)]
pub struct ArbitrationLayer {
    name: String,
    state: LayerState,
    retry_later: Option<Tick>,
    waiting: VecDeque<LinkId>,
    retry_window: Tick,
}

impl ArbitrationLayer {
    /// `retry_window` is how long a notified source keeps its claim on the layer.
    pub fn new(name: impl Into<String>, retry_window: Tick) -> Self {
        Self {
            name: name.into(),
            state: LayerState::Idle,
            retry_later: None,
            waiting: VecDeque::new(),
            retry_window,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn retry_later(&self) -> Option<Tick> {
        self.retry_later
    }

    pub fn waiting(&self) -> impl Iterator<Item = &LinkId> {
        self.waiting.iter()
    }

    pub fn is_busy(&self, now: Tick) -> bool {
        matches!(self.state, LayerState::Busy { until } if now < until)
    }

    /// Earliest tick at which the layer could grant again, if it is currently occupied.
    pub fn busy_until(&self) -> Option<Tick> {
        match self.state {
            LayerState::Idle => None,
            LayerState::Busy { until } | LayerState::Retry { until, .. } => Some(until),
        }
    }

    /// Ask for the layer.  A refused source is remembered and will be notified in order.
    pub fn try_timing(&mut self, src: LinkId, now: Tick) -> bool {
        let granted = match self.state {
            LayerState::Busy { until } if now < until => false,
            LayerState::Retry { port, until } if now < until => port == src,
            // free, but sources that were turned away earlier go first
            _ => self.waiting.front().map_or(true, |&head| head == src),
        };
        if !granted {
            self.enqueue(src);
            return false;
        }
        self.waiting.retain(|&port| port != src);
        true
    }

    /// The granted transfer went through; hold the layer until its header has left.
    pub fn succeeded_timing(&mut self, busy_until: Tick) {
        self.state = LayerState::Busy { until: busy_until };
        self.retry_later = None;
    }

    /// The granted source could not be forwarded.  It goes to the head of the queue and the layer
    /// stays occupied until `busy_until`, after which the source is retried.
    pub fn failed_timing(&mut self, src: LinkId, busy_until: Tick) {
        self.waiting.retain(|&port| port != src);
        self.waiting.push_front(src);
        self.state = LayerState::Busy { until: busy_until };
        self.retry_later = Some(busy_until);
    }

    /// Advance the layer to `now`.  Returns the source to notify when the layer is handed on.
    pub fn release(&mut self, now: Tick) -> Option<LinkId> {
        match self.state {
            LayerState::Busy { until } | LayerState::Retry { until, .. } if now >= until => {
                self.state = LayerState::Idle;
                self.retry_later = None;
            }
            _ => {}
        }
        if self.state != LayerState::Idle {
            return None;
        }
        let port = self.waiting.pop_front()?;
        self.state = LayerState::Retry {
            port,
            until: now.saturating_add(self.retry_window),
        };
        Some(port)
    }

    /// Give up a retry claim held by `src` without using it.
    pub fn cancel(&mut self, src: LinkId) {
        if matches!(self.state, LayerState::Retry { port, .. } if port == src) {
            self.state = LayerState::Idle;
        }
    }

    pub fn reset(&mut self) {
        self.state = LayerState::Idle;
        self.retry_later = None;
        self.waiting.clear();
    }

    fn enqueue(&mut self, src: LinkId) {
        if !self.waiting.contains(&src) {
            self.waiting.push_back(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_layer_queues_sources_in_order() {
        let mut layer = ArbitrationLayer::new("reqLayer0", 10);
        assert!(layer.try_timing(0, 0));
        layer.succeeded_timing(20);
        assert!(!layer.try_timing(1, 5));
        assert!(!layer.try_timing(2, 5));
        assert!(!layer.try_timing(1, 6));
        assert_eq!(layer.waiting().copied().collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(layer.release(19), None);
        assert_eq!(layer.release(20), Some(1));
        assert!(matches!(layer.state(), LayerState::Retry { port: 1, .. }));
    }

    #[test]
    fn retry_window_reserves_layer_for_notified_source() {
        let mut layer = ArbitrationLayer::new("reqLayer0", 10);
        layer.succeeded_timing(5);
        assert!(!layer.try_timing(1, 0));
        assert!(!layer.try_timing(2, 0));
        assert_eq!(layer.release(5), Some(1));

        assert!(!layer.try_timing(2, 6));
        assert!(layer.try_timing(1, 7));
        layer.succeeded_timing(12);
        assert_eq!(layer.waiting().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(layer.release(12), Some(2));
    }

    #[test]
    fn unanswered_retry_expires_and_moves_on() {
        let mut layer = ArbitrationLayer::new("respLayer0", 4);
        layer.succeeded_timing(1);
        assert!(!layer.try_timing(3, 0));
        assert!(!layer.try_timing(4, 0));
        assert_eq!(layer.release(1), Some(3));
        assert_eq!(layer.release(3), None);
        assert_eq!(layer.release(5), Some(4));
    }

    #[test]
    fn failed_timing_keeps_source_first_and_sets_deadline() {
        let mut layer = ArbitrationLayer::new("reqLayer0", 10);
        layer.succeeded_timing(5);
        assert!(!layer.try_timing(2, 0));
        assert_eq!(layer.release(5), Some(2));
        assert!(!layer.try_timing(3, 6));
        assert!(layer.try_timing(2, 6));
        layer.failed_timing(2, 8);

        assert!(layer.is_busy(7));
        assert_eq!(layer.retry_later(), Some(8));
        assert_eq!(layer.waiting().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(layer.release(7), None);
        assert_eq!(layer.release(8), Some(2));
        assert_eq!(layer.retry_later(), None);
    }

    #[test]
    fn free_layer_with_waiters_refuses_newcomers() {
        let mut layer = ArbitrationLayer::new("reqLayer0", 10);
        layer.succeeded_timing(2);
        assert!(!layer.try_timing(1, 0));
        assert!(!layer.try_timing(5, 3));
        assert_eq!(layer.waiting().copied().collect::<Vec<_>>(), vec![1, 5]);
        assert!(layer.try_timing(1, 3));
    }

    #[test]
    fn cancelled_claim_frees_layer_for_others() {
        let mut layer = ArbitrationLayer::new("reqLayer0", 10);
        layer.succeeded_timing(2);
        assert!(!layer.try_timing(1, 0));
        assert_eq!(layer.release(2), Some(1));
        assert!(layer.try_timing(1, 3));

        // someone else's claim is left alone
        layer.cancel(4);
        assert!(matches!(layer.state(), LayerState::Retry { port: 1, .. }));
        layer.cancel(1);
        assert_eq!(layer.state(), LayerState::Idle);
        assert!(layer.try_timing(4, 3));
    }

    #[test]
    fn expired_retry_returns_layer_to_idle() {
        let mut layer = ArbitrationLayer::new("reqLayer0", 10);
        layer.succeeded_timing(2);
        assert!(!layer.try_timing(1, 0));
        layer.release(2);
        layer.release(20);
        assert_eq!(layer.state(), LayerState::Idle);
        assert!(layer.waiting().next().is_none());
        assert!(layer.try_timing(5, 21));
    }
}
