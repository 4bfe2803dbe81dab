// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The all-gather and all-to-all variants, which share a phase-alternating
//! gather/read protocol over a shared buffer (spec §3/§4.4).

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Gather,
    Read,
}

/// Whether a call landed in the wrong phase (and should park) or completed,
/// and if it completed, whether this call was the one that flipped the
/// phase.
pub(crate) enum StepOutcome {
    WrongPhase,
    Done { flipped: bool },
}

pub(crate) struct GatherState {
    participants: usize,
    elt_size: usize,
    all_to_all: bool,
    buf: Vec<u8>,
    phase: Phase,
    arrivals: usize,
    error: Option<i32>,
}

impl GatherState {
    pub(crate) fn new(participants: usize, elt_size: usize, all_to_all: bool) -> Self {
        let len = if all_to_all {
            participants * participants * elt_size
        } else {
            participants * elt_size
        };
        Self {
            participants,
            elt_size,
            all_to_all,
            buf: vec![0u8; len],
            phase: Phase::Gather,
            arrivals: 0,
            error: None,
        }
    }

    fn row_len(&self) -> usize {
        if self.all_to_all {
            self.participants * self.elt_size
        } else {
            self.elt_size
        }
    }

    /// Contributes participant `id`'s row. Must be called exactly once per
    /// participant per gather phase.
    pub(crate) fn setid(&mut self, id: usize, bytes: &[u8]) -> StepOutcome {
        if self.phase != Phase::Gather {
            return StepOutcome::WrongPhase;
        }
        let row_len = self.row_len();
        let start = id * row_len;
        let n = bytes.len().min(row_len);
        self.buf[start..start + n].copy_from_slice(&bytes[..n]);
        self.arrivals += 1;
        if self.arrivals == self.participants {
            self.phase = Phase::Read;
            self.arrivals = 0;
            StepOutcome::Done { flipped: true }
        } else {
            StepOutcome::Done { flipped: false }
        }
    }

    /// Reads participant `id`'s view of the gathered data: the whole buffer
    /// for an all-gather, column `id` of the matrix for an all-to-all.
    pub(crate) fn getid(&mut self, id: usize, out: &mut [u8]) -> StepOutcome {
        if self.phase != Phase::Read {
            return StepOutcome::WrongPhase;
        }
        if self.all_to_all {
            let stride = self.participants * self.elt_size;
            for row in 0..self.participants {
                let src = row * stride + id * self.elt_size;
                let dst = row * self.elt_size;
                if dst + self.elt_size <= out.len() {
                    out[dst..dst + self.elt_size]
                        .copy_from_slice(&self.buf[src..src + self.elt_size]);
                }
            }
        } else {
            let n = out.len().min(self.buf.len());
            out[..n].copy_from_slice(&self.buf[..n]);
        }
        self.arrivals += 1;
        if self.arrivals == self.participants {
            self.phase = Phase::Gather;
            self.arrivals = 0;
            StepOutcome::Done { flipped: true }
        } else {
            StepOutcome::Done { flipped: false }
        }
    }

    pub(crate) fn error_code(&self) -> Option<i32> {
        self.error
    }

    pub(crate) fn error(&mut self, code: i32) {
        self.error = Some(code);
    }

    pub(crate) fn reset(&mut self) {
        self.phase = Phase::Gather;
        self.arrivals = 0;
        self.error = None;
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.phase == Phase::Read
    }

    pub(crate) fn size(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gather_every_reader_sees_full_array() {
        let mut g = GatherState::new(4, 8, false);
        for i in 0..4u64 {
            let bytes = (i as f64).to_le_bytes();
            assert!(matches!(g.setid(i as usize, &bytes), StepOutcome::Done { .. }));
        }
        for i in 0..4usize {
            let mut out = [0u8; 32];
            assert!(matches!(g.getid(i, &mut out), StepOutcome::Done { .. }));
            for p in 0..4u64 {
                let v = f64::from_le_bytes(out[p as usize * 8..p as usize * 8 + 8].try_into().unwrap());
                assert_eq!(v, p as f64);
            }
        }
    }

    #[test]
    fn all_to_all_getid_extracts_a_column() {
        let n = 3;
        let mut g = GatherState::new(n, 1, true);
        // Row i is [i*n, i*n+1, ..] so column j is [0*n+j, 1*n+j, 2*n+j].
        for i in 0..n {
            let row: Vec<u8> = (0..n).map(|j| (i * n + j) as u8).collect();
            g.setid(i, &row);
        }
        let mut out = vec![0u8; n];
        g.getid(1, &mut out);
        assert_eq!(out, vec![1u8, 1 + 3, 1 + 6]);
    }

    #[test]
    fn last_reader_resets_the_phase() {
        let mut g = GatherState::new(2, 1, false);
        g.setid(0, &[1]);
        g.setid(1, &[2]);
        let mut out = [0u8; 2];
        assert!(matches!(g.getid(0, &mut out), StepOutcome::Done { flipped: false }));
        assert!(matches!(g.getid(1, &mut out), StepOutcome::Done { flipped: true }));
        assert!(matches!(g.setid(0, &[9]), StepOutcome::Done { .. }));
    }
}
