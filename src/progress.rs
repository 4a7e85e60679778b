/// Progress reporting and cooperative cancellation for long-running work.
///
/// Cancellation is advisory: the reader and the analyzer poll
/// [`Progress::is_interrupted`] between waypoints and stop early.
pub trait Progress {
    fn start_work(&mut self, _total: usize) {}

    fn progress(&mut self, _delta: usize) {}

    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Progress sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Counts reported work; handy for callers that poll instead of listening.
#[derive(Debug, Default, Clone)]
pub struct ProgressCounter {
    pub total: usize,
    pub done: usize,
    pub cancel: bool,
}

impl Progress for ProgressCounter {
    fn start_work(&mut self, total: usize) {
        self.total = total;
        self.done = 0;
    }

    fn progress(&mut self, delta: usize) {
        self.done += delta;
    }

    fn is_interrupted(&self) -> bool {
        self.cancel
    }
}
