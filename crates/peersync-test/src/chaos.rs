//! Chaos delivery for peersync replicas
//!
//! Simulates a hostile path between replicas:
//! - Loss
//! - Reordering
//! - Duplication
//!
//! Merge must absorb all three; a final anti-entropy pass repairs loss.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Delivery chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Reorder probability
    pub reorder_prob: f64,
    /// Reorder depth (max items an item can jump)
    pub reorder_depth: usize,
    /// Duplicate probability
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.01,
            reorder_prob: 0.05,
            reorder_depth: 3,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Every item delivered once, in order
    pub fn perfect() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        ChaosConfig {
            loss_rate: 0.05,
            reorder_prob: 0.2,
            reorder_depth: 5,
            duplicate_prob: 0.1,
        }
    }

    /// Hostile network conditions
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.15,
            reorder_prob: 0.4,
            reorder_depth: 10,
            duplicate_prob: 0.3,
        }
    }
}

/// Chaos statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicated: u64,
}

/// Seeded chaos queue carrying any payload
pub struct ChaosNetwork<T> {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: VecDeque<T>,
    stats: ChaosStats,
}

impl<T: Clone> ChaosNetwork<T> {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: VecDeque::new(),
            stats: ChaosStats::default(),
        }
    }

    /// Send an item into the network
    pub fn send(&mut self, item: T) {
        self.stats.sent += 1;

        if self.rng.gen::<f64>() < self.config.loss_rate {
            self.stats.lost += 1;
            return;
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            self.stats.duplicated += 1;
            self.enqueue(item.clone());
        }
        self.enqueue(item);
    }

    fn enqueue(&mut self, item: T) {
        if !self.in_flight.is_empty() && self.rng.gen::<f64>() < self.config.reorder_prob {
            let depth = self.config.reorder_depth.min(self.in_flight.len());
            let jump = self.rng.gen_range(0..=depth);
            let at = self.in_flight.len() - jump;
            self.in_flight.insert(at, item);
            self.stats.reordered += 1;
        } else {
            self.in_flight.push_back(item);
        }
    }

    /// Next item, if any
    pub fn recv(&mut self) -> Option<T> {
        let item = self.in_flight.pop_front()?;
        self.stats.delivered += 1;
        Some(item)
    }

    /// Everything still in flight, in delivery order
    pub fn drain(&mut self) -> Vec<T> {
        let items: Vec<T> = self.in_flight.drain(..).collect();
        self.stats.delivered += items.len() as u64;
        items
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }
}
