/// Bounded ring buffer of the most recent trade ticks
use std::collections::VecDeque;

use crate::types::TradeTick;

pub struct TickBuffer {
    buffer: VecDeque<TradeTick>,
    capacity: usize,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        TickBuffer {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a tick, evicting the oldest one when full
    pub fn push(&mut self, tick: TradeTick) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(tick);
    }

    pub fn get_last(&self) -> Option<&TradeTick> {
        self.buffer.back()
    }

    /// Most recent `n` ticks, oldest first
    pub fn get_recent(&self, n: usize) -> Vec<TradeTick> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn get_all(&self) -> Vec<TradeTick> {
        self.buffer.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
