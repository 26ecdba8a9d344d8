//! Non-blocking alert channel
//!
//! Bounded FIFO decoupling anomaly production from consumption. Producers
//! never block: when the channel is full the oldest item is evicted, since
//! recent signal is the more actionable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::ml::AnomalyScore;
use crate::resilience::{CircuitState, Component};
use crate::response::ResponseAction;

/// Items flowing through the alert channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    /// An anomalous detection
    Anomaly(AnomalyScore),
    /// A decided response action (executed or dry-run)
    Response(ResponseAction),
    /// A component's breaker left the CLOSED state while handling a
    /// high-risk detection
    ComponentDegraded {
        component: Component,
        state: CircuitState,
    },
}

/// Bounded drop-oldest FIFO, safe for concurrent producers and consumers
pub struct AlertChannel {
    capacity: usize,
    queue: Mutex<VecDeque<AlertEvent>>,
    dropped: AtomicU64,
}

impl AlertChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an alert; evicts the oldest entry instead of blocking when full
    pub fn push(&self, alert: AlertEvent) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(alert);
    }

    /// Pop the oldest alert
    pub fn pop(&self) -> Option<AlertEvent> {
        self.queue.lock().pop_front()
    }

    /// Drain all queued alerts in arrival order
    pub fn drain(&self) -> Vec<AlertEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Total alerts evicted due to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for AlertChannel {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn degraded(n: u8) -> AlertEvent {
        // Cheap distinguishable payloads for ordering checks
        AlertEvent::ComponentDegraded {
            component: if n % 2 == 0 {
                Component::Response
            } else {
                Component::Scoring
            },
            state: CircuitState::Open,
        }
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let channel = AlertChannel::new(5);

        for i in 0..100u8 {
            channel.push(degraded(i));
        }

        assert_eq!(channel.len(), 5);
        assert_eq!(channel.dropped(), 95);

        // The five most recently pushed remain, in arrival order:
        // 95..=99 alternate Scoring (odd) / Response (even)
        let drained = channel.drain();
        assert_eq!(drained.len(), 5);
        for (offset, alert) in drained.iter().enumerate() {
            let expected_even = (95 + offset) % 2 == 0;
            match alert {
                AlertEvent::ComponentDegraded { component, .. } => {
                    let is_even = *component == Component::Response;
                    assert_eq!(is_even, expected_even);
                }
                _ => panic!("unexpected alert variant"),
            }
        }
        assert!(channel.is_empty());
    }

    #[test]
    fn test_pop_fifo_order() {
        let channel = AlertChannel::new(10);
        channel.push(degraded(1));
        channel.push(degraded(2));

        match channel.pop().unwrap() {
            AlertEvent::ComponentDegraded { component, .. } => {
                assert_eq!(component, Component::Scoring)
            }
            _ => panic!("unexpected alert variant"),
        }
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_concurrent_push_and_drain() {
        let channel = Arc::new(AlertChannel::new(64));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                std::thread::spawn(move || {
                    for i in 0..100u8 {
                        channel.push(degraded(i));
                    }
                })
            })
            .collect();

        let consumer = {
            let channel = channel.clone();
            std::thread::spawn(move || {
                let mut seen = 0usize;
                for _ in 0..50 {
                    seen += channel.drain().len();
                    std::thread::yield_now();
                }
                seen
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        let seen = consumer.join().unwrap();
        let remaining = channel.len();

        // Everything produced was either consumed, still queued, or evicted
        assert_eq!(seen + remaining + channel.dropped() as usize, 400);
    }
}
