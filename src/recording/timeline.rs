use crate::timing::MediaTime;

/// Pause bookkeeping for one recording
///
/// Paused wall time is collected as a pending gap on resume and only folded
/// into the cumulative offset by the next video sample. Audio is shifted by
/// whatever offset is current.
///
/// The gap is the clock time between `pause` and `resume`, not the distance
/// between the last video sample before the pause and the first one after.
/// Pausing at 0 s and resuming at 2 s writes the next frame, stamped 2.03 s,
/// at 0.03 s however long ago the previous frame was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseTimeline {
    offset: MediaTime,
    pending_gap: MediaTime,
    paused_at: Option<MediaTime>,
}

impl PauseTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset subtracted from every written timestamp
    pub fn offset(&self) -> MediaTime {
        self.offset
    }

    pub fn pending_gap(&self) -> MediaTime {
        self.pending_gap
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// A second pause keeps the first start.
    pub fn pause(&mut self, at: MediaTime) {
        if self.paused_at.is_none() {
            self.paused_at = Some(at);
        }
    }

    pub fn resume(&mut self, at: MediaTime) {
        if let Some(paused_at) = self.paused_at.take() {
            let gap = (at - paused_at).max(MediaTime::ZERO);
            self.pending_gap += gap;
        }
    }

    /// Written timestamp for a video sample, folding any pending gap first
    pub fn video_pts(&mut self, timestamp: MediaTime) -> MediaTime {
        if self.pending_gap > MediaTime::ZERO {
            self.offset += self.pending_gap;
            self.pending_gap = MediaTime::ZERO;
        }
        timestamp - self.offset
    }

    pub fn audio_pts(&self, timestamp: MediaTime) -> MediaTime {
        timestamp - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> MediaTime {
        MediaTime::from_secs_f64(s)
    }

    #[test]
    fn test_no_pause_passes_through() {
        let mut timeline = PauseTimeline::new();
        assert_eq!(timeline.video_pts(secs(1.5)), secs(1.5));
        assert_eq!(timeline.audio_pts(secs(1.6)), secs(1.6));
    }

    #[test]
    fn test_gap_folds_on_next_video() {
        let mut timeline = PauseTimeline::new();
        timeline.video_pts(secs(0.0));
        timeline.pause(secs(10.0));
        timeline.resume(secs(12.0));
        assert_eq!(timeline.offset(), MediaTime::ZERO);
        assert_eq!(timeline.pending_gap(), secs(2.0));

        assert_eq!(timeline.video_pts(secs(2.03)), secs(0.03));
        assert_eq!(timeline.offset(), secs(2.0));
        assert_eq!(timeline.pending_gap(), MediaTime::ZERO);
    }

    #[test]
    fn test_gap_ignores_frame_spacing() {
        let mut timeline = PauseTimeline::new();
        timeline.video_pts(secs(0.0));
        timeline.pause(secs(1.0));
        timeline.resume(secs(3.0));
        // 3.03 s after the last frame, but only 2 s of it were paused.
        assert_eq!(timeline.video_pts(secs(3.03)), secs(1.03));
    }

    #[test]
    fn test_audio_does_not_fold() {
        let mut timeline = PauseTimeline::new();
        timeline.pause(secs(1.0));
        timeline.resume(secs(3.0));
        assert_eq!(timeline.audio_pts(secs(3.5)), secs(3.5));
        assert_eq!(timeline.offset(), MediaTime::ZERO);
        timeline.video_pts(secs(3.6));
        assert_eq!(timeline.audio_pts(secs(3.7)), secs(1.7));
    }

    #[test]
    fn test_gaps_accumulate() {
        let mut timeline = PauseTimeline::new();
        timeline.pause(secs(1.0));
        timeline.resume(secs(2.0));
        timeline.video_pts(secs(2.0));
        timeline.pause(secs(3.0));
        timeline.pause(secs(3.5));
        timeline.resume(secs(6.0));
        assert_eq!(timeline.video_pts(secs(6.0)), secs(2.0));
        assert_eq!(timeline.offset(), secs(4.0));
    }

    #[test]
    fn test_resume_without_pause_is_ignored() {
        let mut timeline = PauseTimeline::new();
        timeline.resume(secs(5.0));
        assert_eq!(timeline.pending_gap(), MediaTime::ZERO);
    }

    #[test]
    fn test_backwards_clock_adds_nothing() {
        let mut timeline = PauseTimeline::new();
        timeline.pause(secs(5.0));
        timeline.resume(secs(4.0));
        assert_eq!(timeline.pending_gap(), MediaTime::ZERO);
    }
}
