//! `linkscope bandwidth`: run the bandwidth-test sender and chart its output.

use std::path::PathBuf;

use linkscope_core::{BandwidthConfig, Profile, SessionConfig};

use super::DisplayOptions;

pub struct BandwidthCommandConfig<'a> {
    pub receiver: String,
    pub port: String,
    pub profile: &'a str,
    pub program: PathBuf,
    pub log_file: PathBuf,
    pub display: DisplayOptions,
}

pub fn run(cfg: BandwidthCommandConfig<'_>) {
    let profile: Profile = match cfg.profile.parse() {
        Ok(p) => p,
        Err(e) => {
            let names: Vec<&str> = Profile::ALL.iter().map(|p| p.name()).collect();
            eprintln!("Error: {e} (expected one of: {})", names.join(", "));
            std::process::exit(1);
        }
    };

    let config = SessionConfig::Bandwidth(BandwidthConfig {
        receiver: cfg.receiver,
        port: cfg.port,
        profile,
        program: cfg.program,
        log_file: cfg.log_file,
        ..BandwidthConfig::default()
    });

    super::run_session(config, cfg.display);
}
