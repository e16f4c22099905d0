//! Coordinator / Broadcast (§4.9, optional): lets parallel workers share
//! short-lived, priority-scored notices ("I touched file X", "watch out for
//! Y") without a shared mutable task list. New — the teacher's loops never
//! talked to each other.

use crate::model::{Broadcast, BroadcastPriority};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    broadcast: Broadcast,
    received_at: Instant,
}

pub struct Coordinator {
    history: Mutex<VecDeque<Entry>>,
    ttl: Duration,
    capacity: usize,
}

impl Coordinator {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { history: Mutex::new(VecDeque::with_capacity(capacity)), ttl, capacity }
    }

    pub fn publish(&self, broadcast: Broadcast) {
        let mut history = self.history.lock().unwrap();
        self.evict_expired(&mut history);
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(Entry { broadcast, received_at: Instant::now() });
    }

    /// Broadcasts still within TTL, most relevant first. Relevance is a
    /// simple function of priority and how many of `touched_files` overlap
    /// `affected_files` — not a learned ranking, just enough signal for a
    /// worker to skip noise.
    pub fn relevant_to(&self, touched_files: &[String]) -> Vec<(Broadcast, f64)> {
        let mut history = self.history.lock().unwrap();
        self.evict_expired(&mut history);

        let mut scored: Vec<(Broadcast, f64)> = history
            .iter()
            .map(|entry| {
                let overlap = entry
                    .broadcast
                    .affected_files
                    .iter()
                    .filter(|f| touched_files.contains(f))
                    .count();
                let priority_weight = match entry.broadcast.priority {
                    BroadcastPriority::Low => 0.25,
                    BroadcastPriority::Normal => 0.5,
                    BroadcastPriority::High => 0.75,
                    BroadcastPriority::Critical => 1.0,
                };
                let score = priority_weight + overlap as f64 * 0.5;
                (entry.broadcast.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn evict_expired(&self, history: &mut VecDeque<Entry>) {
        let ttl = self.ttl;
        history.retain(|entry| entry.received_at.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(category: &str, priority: BroadcastPriority, files: &[&str]) -> Broadcast {
        Broadcast {
            category: category.to_string(),
            summary: category.to_string(),
            details: String::new(),
            affected_files: files.iter().map(|s| s.to_string()).collect(),
            priority,
        }
    }

    #[test]
    fn relevant_to_ranks_overlapping_high_priority_first() {
        let coordinator = Coordinator::new(Duration::from_secs(60), 10);
        coordinator.publish(broadcast("low-no-overlap", BroadcastPriority::Low, &["other.rs"]));
        coordinator.publish(broadcast("high-overlap", BroadcastPriority::High, &["shared.rs"]));

        let ranked = coordinator.relevant_to(&["shared.rs".to_string()]);
        assert_eq!(ranked[0].0.category, "high-overlap");
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let coordinator = Coordinator::new(Duration::from_millis(10), 10);
        coordinator.publish(broadcast("stale", BroadcastPriority::Critical, &[]));
        std::thread::sleep(Duration::from_millis(50));
        assert!(coordinator.relevant_to(&[]).is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let coordinator = Coordinator::new(Duration::from_secs(60), 1);
        coordinator.publish(broadcast("first", BroadcastPriority::Low, &[]));
        coordinator.publish(broadcast("second", BroadcastPriority::Low, &[]));

        let ranked = coordinator.relevant_to(&[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.category, "second");
    }
}
