use derive_more::Display;

/// Scheduling class of a job.
///
/// Lower numeric value runs first. Archival jobs are submitted as
/// [`Background`](Self::Background) so user-facing work can overtake them.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    #[display("urgent")]
    Urgent,
    #[default]
    #[display("normal")]
    Normal,
    #[display("background")]
    Background,
}

impl Priority {
    #[inline]
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::Normal => 1,
            Self::Background => 2,
        }
    }

    /// Whether a job of this priority should be dequeued before one of `other`.
    #[inline]
    #[must_use]
    pub const fn runs_before(self, other: Self) -> bool {
        self.value() < other.value()
    }
}
