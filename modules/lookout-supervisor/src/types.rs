use std::fmt;

/// Stats from one reconcile cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub eligible: usize,
    pub running: usize,
    pub started: u64,
    pub stopped: u64,
    pub forced_stops: u64,
    pub restarted: u64,
    /// Relaunches that do not count toward escalation (start failures,
    /// self-stops of accounts that are eligible again).
    pub relaunched: u64,
    pub marked_error: u64,
    /// Accounts whose reconcile step failed (logged, retried next cycle).
    pub errors: u64,
}

impl ReconcileStats {
    pub fn is_noop(&self) -> bool {
        self.started == 0
            && self.stopped == 0
            && self.restarted == 0
            && self.relaunched == 0
            && self.marked_error == 0
    }
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eligible={} running={} started={} stopped={} forced_stops={} restarted={} relaunched={} marked_error={} errors={}",
            self.eligible,
            self.running,
            self.started,
            self.stopped,
            self.forced_stops,
            self.restarted,
            self.relaunched,
            self.marked_error,
            self.errors,
        )
    }
}
