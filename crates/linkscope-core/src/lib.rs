//! # linkscope-core
//!
//! **Live link telemetry from a bandwidth test and a cellular router.**
//!
//! `linkscope-core` runs one acquisition session at a time: it spawns a
//! bandwidth-test process (reading its status lines or its CSV log) or polls a
//! router over an interactive shell, parses what comes back into typed samples
//! and keeps a rolling window of each metric for a dashboard to draw.
//!
//! ## Quick Start
//!
//! ```no_run
//! use linkscope_core::{BandwidthConfig, Controller, Profile, SessionConfig};
//!
//! let mut controller = Controller::default();
//! controller
//!     .start(SessionConfig::Bandwidth(BandwidthConfig {
//!         receiver: "10.0.0.2".into(),
//!         port: "5000".into(),
//!         profile: Profile::Verbose,
//!         ..Default::default()
//!     }))
//!     .expect("start");
//!
//! let snapshot = controller.snapshot();
//! println!("RTT now: {:?}", snapshot.latest(linkscope_core::metric::RTT));
//! controller.stop().expect("stop");
//! ```
//!
//! ## Architecture
//!
//! Source → raw text → Parser → samples → [`SeriesStore`] ← snapshot ← render tick
//!
//! The [`Controller`] owns the store and the running session. Each session
//! runs one producer on its own thread; the dashboard snapshots the store on
//! a fixed tick and never blocks the producer.

pub mod config;
pub mod error;
pub mod metric;
pub mod parser;
pub mod recorder;
pub mod render;
pub mod session;
pub mod signal;
pub mod sources;
pub mod store;

pub use config::{BandwidthConfig, Profile, RadioConfig, SessionConfig};
pub use error::{Error, ParseError, Result};
pub use metric::{Panel, SessionKind};
pub use parser::{BlockOutcome, Reading, ShellBlockParser, parse_log, parse_status_line};
pub use recorder::{RadioLogWriter, RecordMeta};
pub use render::{ChartFrame, PanelFrame, RenderTicker, Trace};
pub use session::{Controller, SessionState};
pub use signal::StopSignal;
pub use sources::LoopCounters;
pub use sources::remote::{Connector, RemoteShell, SshConnector};
pub use store::{DEFAULT_CAPACITY, SeriesStore, Snapshot, StoreWriter};

/// Library version, recorded in log sidecars.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
