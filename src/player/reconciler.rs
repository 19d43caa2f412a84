use tracing::trace;

use crate::config::PlaybackConfig;
use crate::models::{BackendKind, PlaybackWindow};

/// Outcome of a periodic position check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Forward this logical position to the caller.
    Report(f64),
    /// The end of the window was reached: pause, seek here, report here.
    Rewind(f64),
}

/// What to do once a backend finished loading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadPlan {
    pub seek_to: Option<f64>,
    pub play: bool,
}

/// Holds the desired playback window and decides how a backend must be
/// corrected to match it. All positions are logical seconds.
#[derive(Debug, Clone)]
pub struct Reconciler {
    window: PlaybackWindow,
    autoplay: bool,
    embedded_tolerance: f64,
    direct_tolerance: f64,
}

impl Reconciler {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            window: PlaybackWindow::default(),
            autoplay: config.autoplay,
            embedded_tolerance: config.embedded_drift_tolerance.max(0.0),
            direct_tolerance: config.direct_drift_tolerance.max(0.0),
        }
    }

    pub fn window(&self) -> PlaybackWindow {
        self.window
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn set_target(&mut self, window: PlaybackWindow, autoplay: bool) {
        self.window = window.normalized();
        self.autoplay = autoplay;
        trace!(
            "Reconcile target {:?}, autoplay {}",
            self.window, self.autoplay
        );
    }

    /// Stream-backed media is positioned exactly when it loads; afterwards it
    /// is an ordinary media surface.
    pub fn tolerance(&self, backend: BackendKind, at_load: bool) -> f64 {
        match backend {
            BackendKind::Embedded => self.embedded_tolerance,
            BackendKind::AuthenticatedStream if at_load => 0.0,
            BackendKind::AuthenticatedStream | BackendKind::DirectFile => self.direct_tolerance,
        }
    }

    /// Seek target when `reported` is further than `tolerance` from the
    /// window start. An unknown position always needs a seek.
    pub fn correct_drift(&self, reported: Option<f64>, tolerance: f64) -> Option<f64> {
        let start = self.window.start_seconds;
        match reported {
            Some(position) if (position - start).abs() <= tolerance => None,
            _ => Some(start),
        }
    }

    pub fn plan_load(&self, reported: Option<f64>, backend: BackendKind) -> LoadPlan {
        LoadPlan {
            seek_to: self.correct_drift(reported, self.tolerance(backend, true)),
            play: self.autoplay,
        }
    }

    pub fn on_tick(&self, reported: f64) -> TickOutcome {
        if self.window.has_reached_end(reported) {
            TickOutcome::Rewind(self.window.start_seconds)
        } else {
            TickOutcome::Report(reported)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler(start: f64, end: Option<f64>) -> Reconciler {
        let mut reconciler = Reconciler::new(&PlaybackConfig::default());
        reconciler.set_target(PlaybackWindow::new(start, end), true);
        reconciler
    }

    #[test]
    fn test_embedded_tolerates_two_seconds() {
        let r = reconciler(60.0, None);
        let tolerance = r.tolerance(BackendKind::Embedded, false);
        assert_eq!(r.correct_drift(Some(61.9), tolerance), None);
        assert_eq!(r.correct_drift(Some(58.0), tolerance), None);
        assert_eq!(r.correct_drift(Some(62.5), tolerance), Some(60.0));
    }

    #[test]
    fn test_direct_tolerates_one_second() {
        let r = reconciler(60.0, None);
        let tolerance = r.tolerance(BackendKind::DirectFile, false);
        assert_eq!(r.correct_drift(Some(60.8), tolerance), None);
        assert_eq!(r.correct_drift(Some(61.5), tolerance), Some(60.0));
    }

    #[test]
    fn test_stream_load_is_exact() {
        let r = reconciler(60.0, None);
        let plan = r.plan_load(Some(60.2), BackendKind::AuthenticatedStream);
        assert_eq!(plan.seek_to, Some(60.0));
        assert!(plan.play);

        let plan = r.plan_load(Some(60.0), BackendKind::AuthenticatedStream);
        assert_eq!(plan.seek_to, None);

        // After load the stream surface uses the direct tolerance
        assert_eq!(r.tolerance(BackendKind::AuthenticatedStream, false), 1.0);
    }

    #[test]
    fn test_unknown_position_seeks() {
        let r = reconciler(12.0, None);
        assert_eq!(r.correct_drift(None, 2.0), Some(12.0));
    }

    #[test]
    fn test_end_boundary_rewinds() {
        let r = reconciler(100.0, Some(110.0));
        assert_eq!(r.on_tick(105.0), TickOutcome::Report(105.0));
        assert_eq!(r.on_tick(110.5), TickOutcome::Rewind(100.0));
        assert_eq!(r.on_tick(110.0), TickOutcome::Rewind(100.0));
    }

    #[test]
    fn test_open_window_never_rewinds() {
        let r = reconciler(100.0, None);
        assert_eq!(r.on_tick(5000.0), TickOutcome::Report(5000.0));
    }

    #[test]
    fn test_autoplay_off_plans_no_play() {
        let mut r = Reconciler::new(&PlaybackConfig::default());
        r.set_target(PlaybackWindow::starting_at(0.0), false);
        assert!(!r.plan_load(Some(0.0), BackendKind::DirectFile).play);
    }
}
