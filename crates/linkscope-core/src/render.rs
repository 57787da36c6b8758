//! Render tick and chart frame model.
//!
//! The tick fires on wall-clock time regardless of how fast samples arrive.
//! On each tick the dashboard takes one store snapshot and turns it into a
//! [`ChartFrame`]: one [`PanelFrame`] per panel of the session kind, with plot
//! points and axis bounds already computed. Building a frame only reads the
//! snapshot.

use std::time::{Duration, Instant};

use crate::metric::{Panel, SessionKind};
use crate::store::Snapshot;

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(1);
pub const MIN_REFRESH: Duration = Duration::from_millis(100);
pub const MAX_REFRESH: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Fixed-interval tick driven by the UI loop.
#[derive(Debug, Clone)]
pub struct RenderTicker {
    interval: Duration,
    last: Option<Instant>,
}

impl RenderTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.clamp(MIN_REFRESH, MAX_REFRESH),
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True if a tick is due at `now`; the first call always fires.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Halve the interval.
    pub fn faster(&mut self) {
        self.interval = (self.interval / 2).max(MIN_REFRESH);
    }

    /// Double the interval.
    pub fn slower(&mut self) {
        self.interval = (self.interval * 2).min(MAX_REFRESH);
    }
}

impl Default for RenderTicker {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH)
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One metric plotted within a panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub metric: &'static str,
    /// `(sample index, value)`; absent samples leave a gap in x.
    pub points: Vec<(f64, f64)>,
    pub latest: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelFrame {
    pub title: &'static str,
    pub y_label: &'static str,
    pub traces: Vec<Trace>,
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
}

impl PanelFrame {
    pub fn build(panel: &Panel, snapshot: &Snapshot) -> Self {
        let traces: Vec<Trace> = panel
            .metrics
            .iter()
            .map(|&metric| {
                let series = snapshot.series(metric);
                Trace {
                    metric,
                    points: series
                        .iter()
                        .enumerate()
                        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
                        .collect(),
                    latest: snapshot.latest(metric),
                }
            })
            .collect();

        let len = panel
            .metrics
            .iter()
            .map(|m| snapshot.series(m).len())
            .max()
            .unwrap_or(0);
        let values = traces.iter().flat_map(|t| t.points.iter().map(|&(_, y)| y));

        Self {
            title: panel.title,
            y_label: panel.y_label,
            x_bounds: [0.0, (len as f64).max(10.0)],
            y_bounds: y_bounds(values),
            traces,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.traces.iter().all(|t| t.points.is_empty())
    }
}

/// Padded min/max of `values`. Flat or empty series get a unit range.
fn y_bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if min > max {
        return [0.0, 1.0];
    }
    let span = max - min;
    if span == 0.0 {
        let pad = (min.abs() * 0.1).max(1.0);
        return [min - pad, max + pad];
    }
    let pad = span * 0.1;
    [min - pad, max + pad]
}

/// Everything the dashboard draws for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFrame {
    pub kind: SessionKind,
    pub updates: u64,
    pub panels: Vec<PanelFrame>,
}

impl ChartFrame {
    pub fn build(kind: SessionKind, snapshot: &Snapshot) -> Self {
        Self {
            kind,
            updates: snapshot.updates,
            panels: kind
                .panels()
                .iter()
                .map(|p| PanelFrame::build(p, snapshot))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{RSRP, RSRQ, RSSI, RTT};
    use crate::store::SeriesStore;
    use std::sync::Arc;

    #[test]
    fn ticker_fires_first_then_on_interval() {
        let mut ticker = RenderTicker::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(ticker.due(t0));
        assert!(!ticker.due(t0 + Duration::from_millis(500)));
        assert!(ticker.due(t0 + Duration::from_millis(1000)));
        assert!(!ticker.due(t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn ticker_rate_is_clamped() {
        let mut ticker = RenderTicker::new(Duration::from_secs(1));
        for _ in 0..10 {
            ticker.faster();
        }
        assert_eq!(ticker.interval(), MIN_REFRESH);
        for _ in 0..10 {
            ticker.slower();
        }
        assert_eq!(ticker.interval(), MAX_REFRESH);
        assert_eq!(RenderTicker::new(Duration::ZERO).interval(), MIN_REFRESH);
    }

    #[test]
    fn bandwidth_frame_has_four_panels() {
        let frame = ChartFrame::build(SessionKind::Bandwidth, &Snapshot::default());
        let titles: Vec<_> = frame.panels.iter().map(|p| p.title).collect();
        assert_eq!(
            titles,
            vec!["Queue Delay", "RTT", "Transmit Rate", "Packet Loss Rate"]
        );
        assert!(frame.panels.iter().all(PanelFrame::is_empty));
        assert_eq!(frame.panels[0].y_bounds, [0.0, 1.0]);
    }

    #[test]
    fn radio_panel_overlays_three_metrics_and_skips_gaps() {
        let store = Arc::new(SeriesStore::new(100));
        let writer = store.begin_session(SessionKind::Radio.metrics());
        writer.append_group(&[(RSSI, Some(-65.0)), (RSRP, None), (RSRQ, Some(-10.0))]);
        writer.append_group(&[(RSSI, Some(-70.0)), (RSRP, Some(-95.0)), (RSRQ, None)]);

        let frame = ChartFrame::build(SessionKind::Radio, &store.snapshot());
        let panel = &frame.panels[0];
        assert_eq!(panel.title, "RSSI, RSRP, RSRQ");
        assert_eq!(panel.traces.len(), 3);
        assert_eq!(panel.traces[0].points, vec![(0.0, -65.0), (1.0, -70.0)]);
        assert_eq!(panel.traces[1].points, vec![(1.0, -95.0)]);
        assert_eq!(panel.traces[1].latest, Some(-95.0));
        assert_eq!(panel.traces[2].latest, Some(-10.0));
        assert!(panel.y_bounds[0] < -95.0);
        assert!(panel.y_bounds[1] > -10.0);
        assert_eq!(frame.updates, 2);
    }

    #[test]
    fn building_a_frame_leaves_store_untouched() {
        let store = Arc::new(SeriesStore::new(100));
        let writer = store.begin_session(SessionKind::Bandwidth.metrics());
        writer.append(RTT, Some(0.02));
        let before = store.snapshot();
        let _ = ChartFrame::build(SessionKind::Bandwidth, &before);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn flat_series_gets_padded_range() {
        assert_eq!(y_bounds([5.0, 5.0].into_iter()), [4.0, 6.0]);
        assert_eq!(y_bounds([100.0].into_iter()), [90.0, 110.0]);
        let [lo, hi] = y_bounds([0.0, 10.0].into_iter());
        assert!((lo + 1.0).abs() < 1e-9 && (hi - 11.0).abs() < 1e-9);
    }
}
