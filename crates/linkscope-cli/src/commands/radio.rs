//! `linkscope radio`: poll a cellular router and chart its radio state.

use std::path::PathBuf;

use linkscope_core::{RadioConfig, SessionConfig};

use super::DisplayOptions;

pub struct RadioCommandConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub output_dir: PathBuf,
    pub display: DisplayOptions,
}

pub fn run(cfg: RadioCommandConfig) {
    let config = SessionConfig::Radio(RadioConfig {
        host: cfg.host,
        port: cfg.port,
        user: cfg.user,
        password: cfg.password.filter(|p| !p.is_empty()),
        output_dir: cfg.output_dir,
        ..RadioConfig::default()
    });

    super::run_session(config, cfg.display);
}
