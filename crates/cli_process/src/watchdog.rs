use std::time::Duration;

pub const DEFAULT_IDLE_WARN: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_KILL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    Active,
    Warn { idle: Duration, cancel_in: Duration },
    Cancel { idle: Duration },
}

/// Turns a [`crate::ProcessHandle::idle_for`] reading into an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWatchdog {
    warn_after: Duration,
    kill_after: Duration,
}

impl Default for IdleWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_WARN, DEFAULT_IDLE_KILL)
    }
}

impl IdleWatchdog {
    /// `kill_after` below `warn_after` is raised to it.
    pub fn new(warn_after: Duration, kill_after: Duration) -> Self {
        Self {
            warn_after,
            kill_after: kill_after.max(warn_after),
        }
    }

    /// Builds a watchdog from second counts; a zero kill threshold disables it.
    pub fn from_secs(warn_secs: u64, kill_secs: u64) -> Option<Self> {
        (kill_secs > 0).then(|| Self::new(Duration::from_secs(warn_secs), Duration::from_secs(kill_secs)))
    }

    pub fn check(&self, idle: Duration) -> IdleVerdict {
        if idle >= self.kill_after {
            IdleVerdict::Cancel { idle }
        } else if idle >= self.warn_after {
            IdleVerdict::Warn {
                idle,
                cancel_in: self.kill_after - idle,
            }
        } else {
            IdleVerdict::Active
        }
    }
}
