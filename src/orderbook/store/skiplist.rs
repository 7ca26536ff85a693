//! Arena-backed skip list keyed by price.
//!
//! Nodes live in a `Vec` and link to each other through slot indices, so
//! there are no raw pointers or reference cycles. Slot `0` is the head
//! sentinel; removed slots are recycled through a free list.

use super::{PriceLevelStore, StoreConfig};
use crate::orderbook::level::{PriceLevel, SortOrder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::fmt;

const HEAD: usize = 0;

#[derive(Debug, Clone)]
struct Node {
    level: PriceLevel,
    /// `forward[i]` is the next slot at level `i`.
    forward: Vec<Option<usize>>,
}

/// Probabilistic skip list implementation of [`PriceLevelStore`].
pub struct SkipListStore {
    order: SortOrder,
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// Highest level currently in use (0-based).
    level: usize,
    max_level: usize,
    probability: f64,
    len: usize,
    rng: StdRng,
    /// Scratch predecessor vector reused by mutating walks.
    update: Vec<usize>,
}

impl fmt::Debug for SkipListStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipListStore")
            .field("order", &self.order)
            .field("len", &self.len)
            .field("level", &self.level)
            .field("max_level", &self.max_level)
            .finish()
    }
}

impl SkipListStore {
    fn head_node(max_level: usize) -> Node {
        Node {
            level: PriceLevel::new(Decimal::ZERO, Decimal::ZERO, 0),
            forward: vec![None; max_level],
        }
    }

    /// Draws a node height with independent coin flips, capped at `max_level`.
    fn random_level(&mut self) -> usize {
        let mut lvl = 0;
        while lvl + 1 < self.max_level && self.rng.gen_bool(self.probability) {
            lvl += 1;
        }
        lvl
    }

    /// Walks from the top populated level down, filling `self.update` with
    /// the last node before `price` on every level. Returns the level-0
    /// successor candidate.
    fn find_predecessors(&mut self, price: Decimal) -> Option<usize> {
        let mut current = HEAD;
        for i in (0..=self.level).rev() {
            while let Some(next) = self.nodes[current].forward[i] {
                if self.order.precedes(self.nodes[next].level.price, price) {
                    current = next;
                } else {
                    break;
                }
            }
            self.update[i] = current;
        }
        self.nodes[current].forward[0]
    }

    fn find(&self, price: Decimal) -> Option<usize> {
        let mut current = HEAD;
        for i in (0..=self.level).rev() {
            while let Some(next) = self.nodes[current].forward[i] {
                if self.order.precedes(self.nodes[next].level.price, price) {
                    current = next;
                } else {
                    break;
                }
            }
        }
        self.nodes[current]
            .forward[0]
            .filter(|&idx| self.nodes[idx].level.price == price)
    }

    fn allocate(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn insert(&mut self, price: Decimal, quantity: Decimal, seq: u64) -> bool {
        if let Some(idx) = self.find_predecessors(price) {
            let level = &mut self.nodes[idx].level;
            if level.price == price {
                level.quantity = quantity;
                level.last_touched_seq = seq;
                return false;
            }
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for i in (self.level + 1)..=new_level {
                self.update[i] = HEAD;
            }
            self.level = new_level;
        }

        let slot = self.allocate(Node {
            level: PriceLevel::new(price, quantity, seq),
            forward: vec![None; new_level + 1],
        });
        for i in 0..=new_level {
            let pred = self.update[i];
            self.nodes[slot].forward[i] = self.nodes[pred].forward[i];
            self.nodes[pred].forward[i] = Some(slot);
        }
        self.len += 1;
        true
    }

    /// Height of the tallest node currently linked (0-based).
    pub fn height(&self) -> usize {
        self.level
    }
}

impl PriceLevelStore for SkipListStore {
    fn new(order: SortOrder, config: &StoreConfig) -> Self {
        let max_level = config.max_level.max(1);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            order,
            nodes: vec![Self::head_node(max_level)],
            free: Vec::new(),
            level: 0,
            max_level,
            probability: config.probability.clamp(0.0, 0.999),
            len: 0,
            rng,
            update: vec![HEAD; max_level],
        }
    }

    fn upsert(&mut self, price: Decimal, quantity: Decimal, seq: u64) -> bool {
        if quantity.is_zero() {
            self.remove(price);
            return false;
        }
        self.insert(price, quantity, seq)
    }

    fn remove(&mut self, price: Decimal) -> bool {
        let target = match self.find_predecessors(price) {
            Some(idx) if self.nodes[idx].level.price == price => idx,
            _ => return false,
        };

        for i in 0..=self.level {
            let pred = self.update[i];
            if self.nodes[pred].forward[i] != Some(target) {
                break;
            }
            self.nodes[pred].forward[i] = self.nodes[target].forward[i];
        }
        while self.level > 0 && self.nodes[HEAD].forward[self.level].is_none() {
            self.level -= 1;
        }

        self.nodes[target].forward.clear();
        self.free.push(target);
        self.len -= 1;
        true
    }

    fn get(&self, price: Decimal) -> Option<PriceLevel> {
        self.find(price).map(|idx| self.nodes[idx].level)
    }

    fn peek_top(&self) -> Option<PriceLevel> {
        self.nodes[HEAD].forward[0].map(|idx| self.nodes[idx].level)
    }

    fn top_n(&self, k: usize) -> Vec<PriceLevel> {
        let mut out = Vec::with_capacity(k.min(self.len));
        let mut cursor = self.nodes[HEAD].forward[0];
        while let Some(idx) = cursor {
            if out.len() == k {
                break;
            }
            out.push(self.nodes[idx].level);
            cursor = self.nodes[idx].forward[0];
        }
        out
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[HEAD] = Self::head_node(self.max_level);
        self.free.clear();
        self.level = 0;
        self.len = 0;
    }

    fn order(&self) -> SortOrder {
        self.order
    }
}
