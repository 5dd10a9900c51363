/// Last text fragment seen and how many times in a row it has repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepetitionState {
    pub last_text: Option<String>,
    pub repeat_count: u32,
}

/// Decide whether `candidate` may be emitted and return the next state.
///
/// A fragment equal to the previous one bumps the counter, anything else
/// resets it. Emission stops once the counter reaches `threshold` and does
/// not resume until a different fragment arrives; the counter keeps growing
/// meanwhile.
#[must_use]
pub fn check_repetition(
    candidate: &str,
    state: RepetitionState,
    threshold: u32,
) -> (bool, RepetitionState) {
    let RepetitionState {
        last_text,
        repeat_count,
    } = state;
    let next = if last_text.as_deref() == Some(candidate) {
        RepetitionState {
            last_text,
            repeat_count: repeat_count.saturating_add(1),
        }
    } else {
        RepetitionState {
            last_text: Some(candidate.to_string()),
            repeat_count: 0,
        }
    };
    (next.repeat_count < threshold, next)
}

/// In-place wrapper over [`check_repetition`] held by the streaming state.
#[derive(Debug, Clone, Default)]
pub struct RepetitionGuard {
    state: RepetitionState,
    suppressed: u64,
}

impl RepetitionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `candidate` and report whether it may be emitted.
    pub fn admit(&mut self, candidate: &str, threshold: u32) -> bool {
        let (allowed, next) = check_repetition(candidate, std::mem::take(&mut self.state), threshold);
        if !allowed {
            if next.repeat_count == threshold {
                tracing::warn!(
                    repeat_count = next.repeat_count,
                    threshold,
                    "upstream is repeating the same text fragment; suppressing"
                );
            }
            self.suppressed += 1;
        }
        self.state = next;
        allowed
    }

    /// Total fragments dropped so far.
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    #[must_use]
    pub fn state(&self) -> &RepetitionState {
        &self.state
    }
}
