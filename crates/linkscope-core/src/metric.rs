//! Metric names and chart groupings for each kind of session.
//!
//! Every session kind has a fixed, known set of metrics. The store is keyed
//! by these names and the dashboard draws one panel per [`Panel`].

use serde::Serialize;

// ---------------------------------------------------------------------------
// Metric names
// ---------------------------------------------------------------------------

pub const QUEUE_DELAY: &str = "Queue Delay";
pub const RTT: &str = "RTT";
pub const TRANSMIT_RATE: &str = "Transmit Rate";
pub const PACKET_LOSS_RATE: &str = "Packet Loss Rate";

pub const RSSI: &str = "RSSI";
pub const RSRP: &str = "RSRP";
pub const SINR: &str = "SINR";
pub const RSRQ: &str = "RSRQ";
pub const TX: &str = "TX";
pub const RX: &str = "RX";

const BANDWIDTH_METRICS: &[&str] = &[QUEUE_DELAY, RTT, TRANSMIT_RATE, PACKET_LOSS_RATE];

/// Order matches the group appended for every remote poll.
const RADIO_METRICS: &[&str] = &[RSSI, RSRP, SINR, RSRQ, TX, RX];

// ---------------------------------------------------------------------------
// Panels
// ---------------------------------------------------------------------------

/// One chart panel: a title, a Y axis label and the metrics plotted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panel {
    pub title: &'static str,
    pub y_label: &'static str,
    pub metrics: &'static [&'static str],
}

const BANDWIDTH_PANELS: &[Panel] = &[
    Panel {
        title: "Queue Delay",
        y_label: "Seconds",
        metrics: &[QUEUE_DELAY],
    },
    Panel {
        title: "RTT",
        y_label: "Seconds",
        metrics: &[RTT],
    },
    Panel {
        title: "Transmit Rate",
        y_label: "Bits per second",
        metrics: &[TRANSMIT_RATE],
    },
    Panel {
        title: "Packet Loss Rate",
        y_label: "Rate",
        metrics: &[PACKET_LOSS_RATE],
    },
];

const RADIO_PANELS: &[Panel] = &[
    Panel {
        title: "RSSI, RSRP, RSRQ",
        y_label: "Values",
        metrics: &[RSSI, RSRP, RSRQ],
    },
    Panel {
        title: "SINR",
        y_label: "SINR",
        metrics: &[SINR],
    },
    Panel {
        title: "TX",
        y_label: "TX",
        metrics: &[TX],
    },
    Panel {
        title: "RX",
        y_label: "RX",
        metrics: &[RX],
    },
];

// ---------------------------------------------------------------------------
// SessionKind
// ---------------------------------------------------------------------------

/// Which family of source a session reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionKind {
    /// Local bandwidth-test process (status lines or CSV log).
    Bandwidth,
    /// Cellular router polled over a remote shell.
    Radio,
}

impl SessionKind {
    pub fn metrics(self) -> &'static [&'static str] {
        match self {
            Self::Bandwidth => BANDWIDTH_METRICS,
            Self::Radio => RADIO_METRICS,
        }
    }

    pub fn panels(self) -> &'static [Panel] {
        match self {
            Self::Bandwidth => BANDWIDTH_PANELS,
            Self::Radio => RADIO_PANELS,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bandwidth => write!(f, "bandwidth"),
            Self::Radio => write!(f, "radio"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_panel_metric_belongs_to_its_kind() {
        for kind in [SessionKind::Bandwidth, SessionKind::Radio] {
            for panel in kind.panels() {
                for m in panel.metrics {
                    assert!(kind.metrics().contains(m), "{m} missing from {kind}");
                }
            }
        }
    }

    #[test]
    fn every_metric_is_charted_once() {
        for kind in [SessionKind::Bandwidth, SessionKind::Radio] {
            let charted: Vec<&str> = kind
                .panels()
                .iter()
                .flat_map(|p| p.metrics.iter().copied())
                .collect();
            assert_eq!(charted.len(), kind.metrics().len());
        }
    }

    #[test]
    fn kind_display() {
        assert_eq!(SessionKind::Bandwidth.to_string(), "bandwidth");
        assert_eq!(SessionKind::Radio.to_string(), "radio");
    }
}
