/// Classification of one inbound arrival against the dedup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// First sight of this identifier in the current window.
    Unique,
    /// Already seen in the current window; suppressed.
    Duplicate,
}

impl ArrivalOutcome {
    pub fn is_unique(&self) -> bool {
        matches!(self, ArrivalOutcome::Unique)
    }
}
