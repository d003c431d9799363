//! Compensating steps for multi-step operations.
//!
//! Each side effect that must be undone on a later failure registers an undo
//! closure. On failure the closures run newest first. A [`Rollback`] that is
//! dropped without [`Rollback::commit`] unwinds itself, so an early `?`
//! return or a cancelled future gets the same cleanup as an explicit error.

use tracing::debug;

type Undo<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Ordered list of undo steps.
#[must_use = "an uncommitted rollback unwinds when dropped"]
pub struct Rollback<'a> {
    steps: Vec<(&'static str, Undo<'a>)>,
    committed: bool,
}

impl<'a> Rollback<'a> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            committed: false,
        }
    }

    /// Registers the undo for a step that just succeeded.
    pub fn push(&mut self, step: &'static str, undo: impl FnOnce() + Send + 'a) {
        self.steps.push((step, Box::new(undo)));
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keeps every side effect; no undo will run.
    pub fn commit(mut self) {
        self.committed = true;
        self.steps.clear();
    }

    /// Runs every undo step, newest first.
    pub fn unwind(mut self) {
        self.run();
    }

    fn run(&mut self) {
        while let Some((step, undo)) = self.steps.pop() {
            debug!(step, "Rolling back");
            undo();
        }
    }
}

impl Default for Rollback<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.run();
        }
    }
}

impl std::fmt::Debug for Rollback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field(
                "steps",
                &self.steps.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .field("committed", &self.committed)
            .finish()
    }
}
