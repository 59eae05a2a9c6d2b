//! Construction settings shared by every handle a factory builds.

use crate::budget::MemoryBudget;
use std::sync::Arc;

/// Settings for [`HandleFactory`](crate::HandleFactory).
///
/// # Example
///
/// ```
/// use shared_array::{MemoryBudget, SharedConfig};
/// use std::sync::Arc;
///
/// let config = SharedConfig::new()
///     .use_uncounted(false)
///     .budget(Arc::new(MemoryBudget::new(64 * 1024 * 1024)));
/// assert!(!config.uses_uncounted());
/// ```
#[derive(Clone, Debug)]
pub struct SharedConfig {
    use_uncounted: bool,
    budget: Option<Arc<MemoryBudget>>,
}

impl SharedConfig {
    pub fn new() -> Self {
        Self {
            use_uncounted: true,
            budget: None,
        }
    }

    /// Allow pure-scalar arrays to be stored as flattened, uncounted copies.
    ///
    /// Default: `true`
    pub fn use_uncounted(mut self, enabled: bool) -> Self {
        self.use_uncounted = enabled;
        self
    }

    /// Charge every block against `budget`. Without one, sizes are only
    /// reported.
    pub fn budget(mut self, budget: Arc<MemoryBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn uses_uncounted(&self) -> bool {
        self.use_uncounted
    }

    pub fn memory_budget(&self) -> Option<&Arc<MemoryBudget>> {
        self.budget.as_ref()
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new()
    }
}
