// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The AND-gate variant: fires once exactly `k` `set`s have arrived.

pub(crate) struct AndState {
    remaining: i64,
    initial: i64,
    error: Option<i32>,
}

impl AndState {
    pub(crate) fn new(count: u32) -> Self {
        let initial = i64::from(count);
        Self {
            remaining: initial,
            initial,
            error: None,
        }
    }

    /// Decrements the pending count. Returns `true` iff this call is the one
    /// that brought the gate to zero.
    pub(crate) fn set(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.remaining -= 1;
        self.remaining <= 0
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.remaining <= 0 || self.error.is_some()
    }

    pub(crate) fn error_code(&self) -> Option<i32> {
        self.error
    }

    pub(crate) fn error(&mut self, code: i32) -> bool {
        if self.is_triggered() {
            return false;
        }
        self.error = Some(code);
        true
    }

    pub(crate) fn reset(&mut self) {
        self.remaining = self.initial;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_the_kth_set() {
        let mut g = AndState::new(3);
        assert!(!g.set());
        assert!(!g.set());
        assert!(g.set());
        assert!(g.is_triggered());
    }
}
