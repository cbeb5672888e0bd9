use serde::{Deserialize, Serialize};

/// Lifecycle of a single recording
///
/// `Idle → Prepared → Recording ⇄ Paused`, then `Finished` or `Failed`.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordingStatus {
    #[default]
    Idle,
    Prepared,
    Recording,
    Paused,
    Finished,
    Failed,
}

impl RecordingStatus {
    pub fn is_idle(&self) -> bool {
        *self == RecordingStatus::Idle
    }

    pub fn is_prepared(&self) -> bool {
        *self == RecordingStatus::Prepared
    }

    pub fn is_recording(&self) -> bool {
        *self == RecordingStatus::Recording
    }

    pub fn is_paused(&self) -> bool {
        *self == RecordingStatus::Paused
    }

    pub fn is_failed(&self) -> bool {
        *self == RecordingStatus::Failed
    }

    pub fn is_final(&self) -> bool {
        matches!(self, RecordingStatus::Finished | RecordingStatus::Failed)
    }

    /// Samples are worth sending to the recorder: it either writes them or
    /// anchors its timeline on the first one.
    pub fn is_recording_or_prepared(&self) -> bool {
        matches!(self, RecordingStatus::Recording | RecordingStatus::Prepared)
    }

    /// Can be finished (and can have its timeline paused or resumed)
    pub fn is_active(&self) -> bool {
        matches!(self, RecordingStatus::Recording | RecordingStatus::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        use RecordingStatus::*;
        assert!(Idle.is_idle());
        assert!(Prepared.is_recording_or_prepared());
        assert!(Recording.is_recording_or_prepared());
        assert!(!Paused.is_recording_or_prepared());
        assert!(Paused.is_active() && Recording.is_active());
        assert!(!Prepared.is_active());
        assert!(Finished.is_final() && Failed.is_final());
        assert!(!Recording.is_final());
    }
}
