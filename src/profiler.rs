//! Profiler, plain counters exported from VM runs.
//!
//! The fields are ordinary integers an external tiering compiler can
//! poll between runs: hot-path detection keys off instruction and
//! typed-bank traffic, deoptimization pressure off the sync counter.

/// Execution counters of one VM instance, reset per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Profiler {
    /// Instructions executed.
    pub instructions: u64,
    /// Typed-bank reads and writes that stayed unboxed.
    pub typed_hits: u64,
    /// Typed reads that fell back to the boxed view.
    pub typed_misses: u64,
    /// Boxed/typed reconciliations (deoptimization pressure).
    pub syncs: u64,
    /// Call frames pushed.
    pub frames_pushed: u64,
    /// Deepest observed frame stack.
    pub peak_frame_depth: usize,
    /// Completed collection cycles during the run.
    pub gc_cycles: u64,
}

impl Profiler {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all counters for the next run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn on_instruction(&mut self) {
        self.instructions += 1;
    }

    pub(crate) fn on_frame_push(&mut self, depth: usize) {
        self.frames_pushed += 1;
        self.peak_frame_depth = self.peak_frame_depth.max(depth);
    }
}
