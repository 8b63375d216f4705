//! Shared tuning knobs for transforms.

use mend_plan::DEFAULT_MAX_EXTRA_PARAMS;

/// Configuration shared by all transforms.
///
/// Defaults are deliberately conservative; callers loosen them per run
/// rather than per operation.
#[derive(Debug, Clone)]
pub struct TransformContext {
    max_extra_params: usize,
    min_nested_lines: usize,
    min_block_lines: usize,
    min_class_methods: usize,
    companion_stem: String,
}

impl TransformContext {
    /// Create a context with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_extra_params: DEFAULT_MAX_EXTRA_PARAMS,
            min_nested_lines: 3,
            min_block_lines: 5,
            min_class_methods: 1,
            companion_stem: "_extracted".to_owned(),
        }
    }

    /// Cap on extra parameters an extraction may introduce.
    #[must_use]
    pub fn with_max_extra_params(mut self, cap: usize) -> Self {
        self.max_extra_params = cap;
        self
    }

    /// Minimum body lines for a nested function to qualify for extraction.
    #[must_use]
    pub fn with_min_nested_lines(mut self, lines: usize) -> Self {
        self.min_nested_lines = lines;
        self
    }

    /// Minimum body lines for a block to qualify for helper extraction.
    #[must_use]
    pub fn with_min_block_lines(mut self, lines: usize) -> Self {
        self.min_block_lines = lines;
        self
    }

    /// Minimum movable methods for an `ExtractClass` to go ahead.
    #[must_use]
    pub fn with_min_class_methods(mut self, methods: usize) -> Self {
        self.min_class_methods = methods;
        self
    }

    #[inline]
    #[must_use]
    pub fn max_extra_params(&self) -> usize {
        self.max_extra_params
    }

    #[inline]
    #[must_use]
    pub fn min_nested_lines(&self) -> usize {
        self.min_nested_lines
    }

    #[inline]
    #[must_use]
    pub fn min_block_lines(&self) -> usize {
        self.min_block_lines
    }

    #[inline]
    #[must_use]
    pub fn min_class_methods(&self) -> usize {
        self.min_class_methods
    }

    /// Suffix appended to a module stem when naming a split companion.
    #[inline]
    #[must_use]
    pub fn companion_stem(&self) -> &str {
        &self.companion_stem
    }
}

impl Default for TransformContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let ctx = TransformContext::new();
        assert_eq!(ctx.max_extra_params(), DEFAULT_MAX_EXTRA_PARAMS);
        assert_eq!(ctx.min_nested_lines(), 3);
        assert_eq!(ctx.min_block_lines(), 5);
        assert_eq!(ctx.companion_stem(), "_extracted");
    }

    #[test]
    fn builders_override_single_fields() {
        let ctx = TransformContext::new()
            .with_max_extra_params(5)
            .with_min_block_lines(2);
        assert_eq!(ctx.max_extra_params(), 5);
        assert_eq!(ctx.min_block_lines(), 2);
        assert_eq!(ctx.min_nested_lines(), 3);
    }
}
