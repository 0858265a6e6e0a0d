//! Adaptive batch sizing
//!
//! The sizer owns the one piece of mutable state shared by every batch in a
//! run: the current batch size. It moves for three reasons:
//!
//! - **Initial sizing** from available memory, once per run
//! - **Memory pressure** after every completed batch: shrink by 3/4 above the
//!   threshold, grow by 5/4 well below it (only while under the default)
//! - **Out-of-memory** from a write: halve at once
//!
//! Every transition clamps to the configured bounds. The size sits behind a
//! mutex so parallel waves can read and adjust it safely.

use crate::config::BatchSizeLimits;
use crate::types::LoaderError;
use parking_lot::Mutex;

/// Available memory (MB) above which runs start with a doubled batch
pub const HIGH_AVAILABLE_MB: u64 = 1000;
/// Available memory (MB) below which runs start with a halved batch
pub const LOW_AVAILABLE_MB: u64 = 200;

#[derive(Debug)]
struct SizerState {
    current: usize,
    /// Size given to `set_manual`; every run starts from it
    manual: Option<usize>,
}

/// Owner of the current batch size
#[derive(Debug)]
pub struct AdaptiveBatchSizer {
    limits: BatchSizeLimits,
    memory_threshold_mb: u64,
    state: Mutex<SizerState>,
}

impl AdaptiveBatchSizer {
    /// Create a sizer starting at the default size
    pub fn new(limits: BatchSizeLimits, memory_threshold_mb: u64) -> Self {
        Self {
            limits,
            memory_threshold_mb,
            state: Mutex::new(SizerState {
                current: limits.default,
                manual: None,
            }),
        }
    }

    pub fn limits(&self) -> BatchSizeLimits {
        self.limits
    }

    pub fn current(&self) -> usize {
        self.state.lock().current
    }

    pub fn is_pinned(&self) -> bool {
        self.state.lock().manual.is_some()
    }

    /// Choose the starting size for a run from available memory
    ///
    /// A manually pinned size is restored, whatever earlier runs shrank it
    /// to. Otherwise plenty of memory (> 1000 MB) doubles the default and
    /// scarce memory (< 200 MB) halves it.
    pub fn initial_size(&self, available_mb: u64) -> usize {
        let mut state = self.state.lock();
        if let Some(size) = state.manual {
            state.current = size;
            return size;
        }

        let proposed = if available_mb > HIGH_AVAILABLE_MB {
            self.limits.max.min(self.limits.default * 2)
        } else if available_mb < LOW_AVAILABLE_MB {
            self.limits.min.max(self.limits.default / 2)
        } else {
            self.limits.default
        };

        state.current = self.limits.clamp(proposed);
        state.current
    }

    /// React to a memory reading taken after a batch
    ///
    /// # Returns
    ///
    /// The size now in effect and whether it changed.
    pub fn adjust_for_memory_pressure(&self, used_mb: u64) -> (usize, bool) {
        let mut state = self.state.lock();
        let size = state.current;

        let proposed = if used_mb > self.memory_threshold_mb {
            (size * 3 / 4).max(self.limits.min)
        } else if used_mb < self.memory_threshold_mb / 2 && size < self.limits.default {
            (size * 5 / 4).min(self.limits.max)
        } else {
            size
        };

        state.current = self.limits.clamp(proposed);
        (state.current, state.current != size)
    }

    /// Halve the size after a write ran out of memory
    pub fn halve_on_out_of_memory(&self) -> usize {
        let mut state = self.state.lock();
        state.current = self.limits.clamp((state.current / 2).max(self.limits.min));
        state.current
    }

    /// Set the size explicitly
    ///
    /// # Errors
    ///
    /// `LoaderError::BatchSizeOutOfRange` when `size` is outside the bounds;
    /// the current size is left untouched.
    pub fn set_manual(&self, size: usize) -> Result<(), LoaderError> {
        if !self.limits.contains(size) {
            return Err(LoaderError::BatchSizeOutOfRange {
                requested: size,
                min: self.limits.min,
                max: self.limits.max,
            });
        }

        let mut state = self.state.lock();
        state.current = size;
        state.manual = Some(size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sizer() -> AdaptiveBatchSizer {
        AdaptiveBatchSizer::new(BatchSizeLimits::default(), 500)
    }

    #[rstest]
    #[case::below_min(49, false)]
    #[case::at_min(50, true)]
    #[case::at_max(2000, true)]
    #[case::above_max(2001, false)]
    fn test_set_manual_bounds(#[case] size: usize, #[case] accepted: bool) {
        let sizer = sizer();
        let result = sizer.set_manual(size);

        assert_eq!(result.is_ok(), accepted);
        if accepted {
            assert_eq!(sizer.current(), size);
        } else {
            assert_eq!(sizer.current(), 500);
        }
    }

    #[rstest]
    #[case::plenty(4096, 1000)]
    #[case::exactly_high(1000, 500)]
    #[case::middle(600, 500)]
    #[case::exactly_low(200, 500)]
    #[case::scarce(199, 250)]
    fn test_initial_size(#[case] available_mb: u64, #[case] expected: usize) {
        assert_eq!(sizer().initial_size(available_mb), expected);
    }

    #[test]
    fn test_initial_size_respects_max() {
        let limits = BatchSizeLimits {
            min: 50,
            default: 1500,
            max: 2000,
        };
        let sizer = AdaptiveBatchSizer::new(limits, 500);
        assert_eq!(sizer.initial_size(8000), 2000);
    }

    #[test]
    fn test_initial_size_keeps_pinned_size() {
        let sizer = sizer();
        sizer.set_manual(120).unwrap();
        assert_eq!(sizer.initial_size(8000), 120);
        assert!(sizer.is_pinned());
    }

    #[test]
    fn test_pinned_size_restored_after_previous_run_shrank_it() {
        let sizer = sizer();
        sizer.set_manual(400).unwrap();
        assert_eq!(sizer.initial_size(600), 400);

        sizer.adjust_for_memory_pressure(600);
        sizer.halve_on_out_of_memory();
        assert_eq!(sizer.current(), 150);

        assert_eq!(sizer.initial_size(600), 400);
        assert_eq!(sizer.current(), 400);
    }

    #[test]
    fn test_memory_pressure_sequence() {
        let sizer = sizer();
        assert_eq!(sizer.current(), 500);

        assert_eq!(sizer.adjust_for_memory_pressure(600), (375, true));
        assert_eq!(sizer.adjust_for_memory_pressure(600), (281, true));
        assert_eq!(sizer.adjust_for_memory_pressure(100), (351, true));
    }

    #[rstest]
    #[case::at_threshold_no_shrink(500, 500)]
    #[case::just_above_threshold(501, 375)]
    #[case::low_but_at_default(100, 500)]
    fn test_threshold_comparisons_at_default(#[case] used_mb: u64, #[case] expected: usize) {
        let sizer = sizer();
        assert_eq!(sizer.adjust_for_memory_pressure(used_mb).0, expected);
    }

    #[test]
    fn test_growth_needs_strictly_below_half_threshold() {
        let sizer = sizer();
        sizer.adjust_for_memory_pressure(600);
        assert_eq!(sizer.current(), 375);

        assert_eq!(sizer.adjust_for_memory_pressure(250), (375, false));
        assert_eq!(sizer.adjust_for_memory_pressure(249), (468, true));
    }

    #[test]
    fn test_shrink_floors_at_min() {
        let sizer = sizer();
        for _ in 0..20 {
            sizer.adjust_for_memory_pressure(10_000);
        }
        assert_eq!(sizer.current(), 50);
        assert_eq!(sizer.adjust_for_memory_pressure(10_000), (50, false));
    }

    #[test]
    fn test_halve_on_out_of_memory() {
        let sizer = sizer();
        assert_eq!(sizer.halve_on_out_of_memory(), 250);
        assert_eq!(sizer.halve_on_out_of_memory(), 125);
        assert_eq!(sizer.halve_on_out_of_memory(), 62);
        assert_eq!(sizer.halve_on_out_of_memory(), 50);
        assert_eq!(sizer.halve_on_out_of_memory(), 50);
    }
}
