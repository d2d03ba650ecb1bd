use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared pause flag for a session.
///
/// Pausing is cooperative in the same way cancellation is: the runner parks
/// at the next step boundary while the switch is engaged and resumes from
/// the same step when it is released. An in-flight locator call is never
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct PauseSwitch {
    engaged: Arc<AtomicBool>,
}

impl PauseSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_round_trip() {
        let switch = PauseSwitch::new();
        assert!(!switch.is_paused());

        switch.pause();
        assert!(switch.is_paused());

        // Clones observe the same flag.
        let other = switch.clone();
        other.resume();
        assert!(!switch.is_paused());
    }
}
