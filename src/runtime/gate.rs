use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

const TURN_UNSET: u8 = 0;
const TURN_FOLLOWER: u8 = 1;
const TURN_LEADER: u8 = 2;

/// Two-of-two join between "sync handshake sent" and "leader turn assigned".
///
/// Both latches only ever go from unset to set. [`ConvergenceGate::try_fire`]
/// succeeds for exactly one caller, and only after both latches are set.
#[derive(Debug, Default)]
pub struct ConvergenceGate {
    sync_complete: AtomicBool,
    turn: AtomicU8,
    fired: AtomicBool,
}

impl ConvergenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call set the latch.
    pub fn latch_sync(&self) -> bool {
        !self.sync_complete.swap(true, Ordering::SeqCst)
    }

    /// Latch the first turn assignment. Later assignments do not change the
    /// latched value. Returns true if this call set the latch.
    pub fn latch_turn(&self, is_leader: bool) -> bool {
        let value = if is_leader { TURN_LEADER } else { TURN_FOLLOWER };
        self.turn
            .compare_exchange(TURN_UNSET, value, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn sync_complete(&self) -> bool {
        self.sync_complete.load(Ordering::SeqCst)
    }

    pub fn turn(&self) -> Option<bool> {
        match self.turn.load(Ordering::SeqCst) {
            TURN_UNSET => None,
            value => Some(value == TURN_LEADER),
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.sync_complete() && self.turn().is_some()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Evaluate the conjunction and fire once. Returns the latched leader flag
    /// to the single winning caller.
    pub fn try_fire(&self) -> Option<bool> {
        let is_leader = self.turn()?;
        if !self.sync_complete() {
            return None;
        }
        self.fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| is_leader)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    use super::*;

    #[test]
    fn test_fires_only_after_both_latches() {
        let gate = ConvergenceGate::new();
        assert_eq!(gate.try_fire(), None);
        assert!(gate.latch_turn(false));
        assert_eq!(gate.try_fire(), None);
        assert!(gate.latch_sync());
        assert_eq!(gate.try_fire(), Some(false));
        assert_eq!(gate.try_fire(), None);
        assert!(gate.has_fired());
    }

    #[test]
    fn test_first_turn_wins() {
        let gate = ConvergenceGate::new();
        assert!(gate.latch_turn(true));
        assert!(!gate.latch_turn(false));
        assert_eq!(gate.turn(), Some(true));
        assert!(!gate.is_satisfied());
    }

    #[test]
    fn test_concurrent_latches_fire_once() {
        for _ in 0..200 {
            let gate = Arc::new(ConvergenceGate::new());
            let fires = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(2));

            let workers: Vec<_> = (0..2)
                .map(|i| {
                    let gate = gate.clone();
                    let fires = fires.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        if i == 0 {
                            gate.latch_sync();
                        } else {
                            gate.latch_turn(true);
                        }
                        if gate.try_fire().is_some() {
                            fires.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }

            assert_eq!(fires.load(Ordering::SeqCst), 1);
        }
    }
}
