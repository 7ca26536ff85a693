//! Array-backed binary heap with a price → slot index.
//!
//! Max-heap for bids, min-heap for asks. The index makes arbitrary-price
//! updates and removals O(log n) instead of O(n).
//!
//! `top_n` never pops: it walks the heap tree best-first with a small
//! frontier of candidate slots. Each step pops the best candidate and
//! pushes its two children, so an ordered slice of `k` levels costs
//! O(k log k) and only needs `&self`, which keeps it safe behind a read
//! lock.

use super::{PriceLevelStore, StoreConfig};
use crate::orderbook::level::{PriceLevel, SortOrder};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Indexed binary heap implementation of [`PriceLevelStore`].
#[derive(Debug, Clone)]
pub struct IndexedHeapStore {
    order: SortOrder,
    heap: Vec<PriceLevel>,
    index: HashMap<Decimal, usize>,
}

/// Frontier entry for the best-first walk in `top_n`.
struct Candidate {
    price: Decimal,
    slot: usize,
    order: SortOrder,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // BinaryHeap pops the greatest element, so "greater" means "better".
    fn cmp(&self, other: &Self) -> Ordering {
        match self.order {
            SortOrder::Descending => self.price.cmp(&other.price),
            SortOrder::Ascending => other.price.cmp(&self.price),
        }
    }
}

impl IndexedHeapStore {
    #[inline]
    fn parent(i: usize) -> usize {
        (i - 1) / 2
    }

    #[inline]
    fn left(i: usize) -> usize {
        2 * i + 1
    }

    #[inline]
    fn better(&self, a: usize, b: usize) -> bool {
        self.order.precedes(self.heap[a].price, self.heap[b].price)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].price, a);
        self.index.insert(self.heap[b].price, b);
    }

    fn sift_up(&mut self, mut i: usize) -> usize {
        while i > 0 {
            let parent = Self::parent(i);
            if !self.better(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
        i
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = Self::left(i);
            let right = left + 1;
            let mut best = i;
            if left < len && self.better(left, best) {
                best = left;
            }
            if right < len && self.better(right, best) {
                best = right;
            }
            if best == i {
                break;
            }
            self.swap(i, best);
            i = best;
        }
    }

    /// Restores the heap property around slot `i` after its key changed.
    fn reheapify(&mut self, i: usize) {
        let settled = self.sift_up(i);
        self.sift_down(settled);
    }

    /// Checks the heap property and index consistency. Used by tests.
    pub fn is_consistent(&self) -> bool {
        if self.index.len() != self.heap.len() {
            return false;
        }
        self.heap.iter().enumerate().all(|(i, level)| {
            let indexed = self.index.get(&level.price) == Some(&i);
            let ordered = i == 0 || !self.better(i, Self::parent(i));
            indexed && ordered
        })
    }
}

impl PriceLevelStore for IndexedHeapStore {
    fn new(order: SortOrder, _config: &StoreConfig) -> Self {
        Self {
            order,
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn upsert(&mut self, price: Decimal, quantity: Decimal, seq: u64) -> bool {
        if quantity.is_zero() {
            self.remove(price);
            return false;
        }
        if let Some(&slot) = self.index.get(&price) {
            // The heap key is the price, so a quantity change never moves the slot.
            let level = &mut self.heap[slot];
            level.quantity = quantity;
            level.last_touched_seq = seq;
            return false;
        }
        let slot = self.heap.len();
        self.heap.push(PriceLevel::new(price, quantity, seq));
        self.index.insert(price, slot);
        self.sift_up(slot);
        true
    }

    fn remove(&mut self, price: Decimal) -> bool {
        let slot = match self.index.remove(&price) {
            Some(slot) => slot,
            None => return false,
        };
        let last = self.heap.len() - 1;
        if slot == last {
            self.heap.pop();
            return true;
        }
        self.heap.swap_remove(slot);
        self.index.insert(self.heap[slot].price, slot);
        self.reheapify(slot);
        true
    }

    fn get(&self, price: Decimal) -> Option<PriceLevel> {
        self.index.get(&price).map(|&slot| self.heap[slot])
    }

    fn peek_top(&self) -> Option<PriceLevel> {
        self.heap.first().copied()
    }

    fn top_n(&self, k: usize) -> Vec<PriceLevel> {
        let k = k.min(self.heap.len());
        let mut out = Vec::with_capacity(k);
        if k == 0 {
            return out;
        }
        let mut frontier = BinaryHeap::with_capacity(k + 1);
        frontier.push(Candidate {
            price: self.heap[0].price,
            slot: 0,
            order: self.order,
        });
        while out.len() < k {
            let Some(best) = frontier.pop() else {
                break;
            };
            out.push(self.heap[best.slot]);
            let left = Self::left(best.slot);
            for child in [left, left + 1] {
                if child < self.heap.len() {
                    frontier.push(Candidate {
                        price: self.heap[child].price,
                        slot: child,
                        order: self.order,
                    });
                }
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn order(&self) -> SortOrder {
        self.order
    }
}
