//! Retry state machine for one exercise.
//!
//! ```text
//! Pending ──► Attempting(0) ──pass──► Passed
//!                  │
//!                  └─fail─► Retrying(1) ──► Attempting(1) ── ... ──fail──► Exhausted
//! ```

/// Where an exercise is in its attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Nothing attempted yet.
    Pending,
    /// Attempt `i` (0-based) is about to run or running.
    Attempting(usize),
    /// Attempt `i` will run next with failure feedback.
    Retrying(usize),
    /// The last attempt passed.
    Passed,
    /// Every attempt in the budget failed.
    Exhausted,
}

impl AttemptState {
    /// Moves `Pending` and `Retrying` into the next attempt.
    ///
    /// A zero budget goes straight to `Exhausted`. Other states are unchanged.
    pub fn next_attempt(self, max_attempts: usize) -> Self {
        match self {
            Self::Pending if max_attempts == 0 => Self::Exhausted,
            Self::Pending => Self::Attempting(0),
            Self::Retrying(i) => Self::Attempting(i),
            other => other,
        }
    }

    /// Records the outcome of the current attempt.
    pub fn after_attempt(self, passed: bool, max_attempts: usize) -> Self {
        match self {
            Self::Attempting(_) if passed => Self::Passed,
            Self::Attempting(i) if i + 1 < max_attempts => Self::Retrying(i + 1),
            Self::Attempting(_) => Self::Exhausted,
            other => other,
        }
    }

    /// True for `Passed` and `Exhausted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the machine with scripted outcomes and returns the recorded ones.
    fn drive(script: &[bool], max_attempts: usize) -> (Vec<bool>, AttemptState) {
        let mut outcomes = Vec::new();
        let mut state = AttemptState::Pending.next_attempt(max_attempts);
        let mut script = script.iter().copied();
        while !state.is_terminal() {
            match state {
                AttemptState::Attempting(_) => {
                    let passed = script.next().unwrap_or(false);
                    outcomes.push(passed);
                    state = state.after_attempt(passed, max_attempts);
                }
                _ => state = state.next_attempt(max_attempts),
            }
        }
        (outcomes, state)
    }

    #[test]
    fn test_pass_on_first_attempt() {
        let (outcomes, state) = drive(&[true], 2);
        assert_eq!(outcomes, vec![true]);
        assert_eq!(state, AttemptState::Passed);
    }

    #[test]
    fn test_fail_then_pass() {
        let (outcomes, state) = drive(&[false, true], 2);
        assert_eq!(outcomes, vec![false, true]);
        assert_eq!(state, AttemptState::Passed);
    }

    #[test]
    fn test_exhausted() {
        let (outcomes, state) = drive(&[false, false, false], 2);
        assert_eq!(outcomes, vec![false, false]);
        assert_eq!(state, AttemptState::Exhausted);
    }

    #[test]
    fn test_zero_budget() {
        assert_eq!(AttemptState::Pending.next_attempt(0), AttemptState::Exhausted);
    }

    #[test]
    fn test_retry_bound_holds_for_all_scripts() {
        for max_attempts in 1..=4 {
            for bits in 0u32..(1 << 5) {
                let script: Vec<bool> = (0..5).map(|i| bits & (1 << i) != 0).collect();
                let (outcomes, _) = drive(&script, max_attempts);
                assert!(outcomes.len() <= max_attempts);
                if outcomes.len() < max_attempts {
                    assert_eq!(outcomes.last(), Some(&true));
                }
                // Only the final attempt can pass.
                let failures = &outcomes[..outcomes.len() - 1];
                assert!(failures.iter().all(|passed| !passed));
            }
        }
    }

    #[test]
    fn test_retrying_moves_to_attempting() {
        let state = AttemptState::Attempting(0).after_attempt(false, 3);
        assert_eq!(state, AttemptState::Retrying(1));
        assert_eq!(state.next_attempt(3), AttemptState::Attempting(1));
    }
}
