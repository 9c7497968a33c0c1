//! Middle-end settings.

/// Tuning flags for one compilation.
#[derive(Clone, Debug)]
pub struct Flags {
    max_optimizable_size: usize,
    log_passes: bool,
}

impl Flags {
    /// The default flags.
    pub fn new() -> Self {
        Self {
            // Beyond this many instructions the optimizing passes are
            // skipped to cap worst-case compile cost.
            max_optimizable_size: 25_000,
            log_passes: false,
        }
    }

    /// Instruction count above which GVN, DCE, and GCM are bypassed.
    pub fn max_optimizable_size(&self) -> usize {
        self.max_optimizable_size
    }

    /// Change the optimization size guard.
    pub fn set_max_optimizable_size(&mut self, limit: usize) -> &mut Self {
        self.max_optimizable_size = limit;
        self
    }

    /// Should each pass log the pretty-printed IR it produced?
    pub fn log_passes(&self) -> bool {
        self.log_passes
    }

    /// Toggle per-pass IR logging.
    pub fn set_log_passes(&mut self, enable: bool) -> &mut Self {
        self.log_passes = enable;
        self
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}
