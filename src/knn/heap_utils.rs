//! This module contains the bounded "ball" of best candidates kept during a search.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat; // For using f64 in BinaryHeap

/// Represents an element in the KBestNeighbors heap, pairing a distance with data.
#[derive(Debug)]
pub struct HeapElement<P> {
    pub distance: OrderedFloat<f64>,
    pub data: P,
}

impl<P: Ord> PartialEq for HeapElement<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl<P: Ord> Eq for HeapElement<P> {}

impl<P: Ord> PartialOrd for HeapElement<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord> Ord for HeapElement<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on (distance, data): the top is the worst kept candidate, and among
        // equal distances the one with the largest data is evicted first.
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.data.cmp(&other.data))
    }
}

/// Keeps the `capacity` smallest `(distance, data)` pairs seen so far.
#[derive(Debug)]
pub struct KBestNeighbors<P> {
    capacity: usize,
    heap: BinaryHeap<HeapElement<P>>,
}

impl<P: Ord> KBestNeighbors<P> {
    pub fn new(capacity: usize) -> Self {
        KBestNeighbors {
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    /// Offers a candidate; returns whether it was kept.
    pub fn add(&mut self, distance: f64, data: P) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let item = HeapElement {
            distance: OrderedFloat(distance),
            data,
        };
        if self.heap.len() < self.capacity {
            self.heap.push(item);
            return true;
        }
        match self.heap.peek_mut() {
            Some(mut worst) if item < *worst => {
                *worst = item;
                true
            }
            _ => false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() == self.capacity
    }

    /// The worst kept distance once full, `None` before that.
    pub fn current_farthest_distance(&self) -> Option<f64> {
        if self.is_full() {
            self.heap.peek().map(|heap_elem| heap_elem.distance.0)
        } else {
            None
        }
    }

    /// Pruning radius: the worst kept distance, or infinity while the ball is not full.
    pub fn radius(&self) -> f64 {
        self.current_farthest_distance().unwrap_or(f64::INFINITY)
    }

    /// Returns the current number of neighbors stored.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drains the ball, best candidate first.
    pub fn into_sorted_vec(self) -> Vec<(f64, P)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|elem| (elem.distance.0, elem.data))
            .collect()
    }
}
