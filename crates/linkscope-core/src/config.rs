//! Session configuration.
//!
//! Defaults carry the constants of the bandwidth-test tool and the router
//! this project was built against. Validation runs before any resource is
//! allocated; an invalid config never starts a session.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::metric::SessionKind;

pub const DEFAULT_PROGRAM: &str = "./scream-master/bin/scream_bw_test_tx";
pub const DEFAULT_LOG_FILE: &str = "MWA_Demo1.csv";

pub const DEFAULT_HOST: &str = "192.168.1.1";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_POLL_COMMAND: &str = "gpsctl -t -i -x -u; gsmctl -e eth0 -r eth0 -q";
pub const DEFAULT_PROMPT_SENTINEL: &str = "root@RUTX50";

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Option profile passed to the bandwidth-test process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Profile {
    #[default]
    Verbose,
    Log,
    Key,
    MinRate,
    MaxRate,
    DelayTarget,
}

impl Profile {
    pub const ALL: [Profile; 6] = [
        Self::Verbose,
        Self::Log,
        Self::Key,
        Self::MinRate,
        Self::MaxRate,
        Self::DelayTarget,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Verbose => "verbose",
            Self::Log => "log",
            Self::Key => "key",
            Self::MinRate => "minrate",
            Self::MaxRate => "maxrate",
            Self::DelayTarget => "delaytarget",
        }
    }

    /// Concrete argument list; `log_file` fills the profiles that name one.
    pub fn args(self, log_file: &str) -> Vec<String> {
        let args = match self {
            Self::Verbose => vec!["-verbose"],
            Self::Log => vec!["-log", log_file, "-itemlist"],
            Self::Key => vec!["-key", "2", "10", log_file, "-itemlist"],
            Self::MinRate => vec!["-minrate", "2000", log_file, "-itemlist"],
            Self::MaxRate => vec!["-maxrate", "20000", log_file, "-itemlist"],
            Self::DelayTarget => vec!["-delaytarget", "0.05", log_file, "-itemlist"],
        };
        args.into_iter().map(String::from).collect()
    }

    /// Whether samples come from the CSV log instead of stdout.
    pub fn reads_log(self) -> bool {
        self == Self::Log
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = Error;

    /// Accepts `log` as well as the tool's own spelling `-log`.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().trim_start_matches('-').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::invalid(format!("unknown profile '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Bandwidth
// ---------------------------------------------------------------------------

/// Local bandwidth-test process.
#[derive(Debug, Clone)]
pub struct BandwidthConfig {
    pub receiver: String,
    pub port: String,
    pub profile: Profile,
    pub program: PathBuf,
    /// Log file name, relative to `working_dir`.
    pub log_file: PathBuf,
    /// Directory the process runs in. `None` means the current directory.
    pub working_dir: Option<PathBuf>,
    pub log_poll_interval: Duration,
    /// How long a graceful stop waits before killing the process.
    pub shutdown_grace: Duration,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            receiver: String::new(),
            port: String::new(),
            profile: Profile::default(),
            program: PathBuf::from(DEFAULT_PROGRAM),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            working_dir: None,
            log_poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl BandwidthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.receiver.trim().is_empty() {
            return Err(Error::invalid("receiver address is empty"));
        }
        let port = self.port.trim();
        if port.is_empty() {
            return Err(Error::invalid("port is empty"));
        }
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(Error::invalid(format!("port '{port}' is not a valid port"))),
        }
        if self.program.as_os_str().is_empty() {
            return Err(Error::invalid("program path is empty"));
        }
        Ok(())
    }

    /// Arguments after the program name.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.profile.args(&self.log_file.to_string_lossy());
        argv.push(self.receiver.trim().to_string());
        argv.push(self.port.trim().to_string());
        argv
    }

    /// Where the `log` profile's CSV ends up.
    pub fn log_path(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) => dir.join(&self.log_file),
            None => self.log_file.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

/// Router polled over an interactive remote shell.
#[derive(Debug, Clone)]
pub struct RadioConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub poll_command: String,
    pub prompt_sentinel: String,
    /// Last character of the shell prompt; marks the end of a response.
    pub prompt_suffix: char,
    /// Directory for the `PHY_TEST_*.csv` log.
    pub output_dir: PathBuf,
    pub connect_timeout: Duration,
    /// Longest wait for one complete response before the session fails.
    pub response_timeout: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_SSH_PORT,
            user: DEFAULT_USER.to_string(),
            password: None,
            poll_command: DEFAULT_POLL_COMMAND.to_string(),
            prompt_sentinel: DEFAULT_PROMPT_SENTINEL.to_string(),
            prompt_suffix: '#',
            output_dir: PathBuf::from("."),
            connect_timeout: Duration::from_secs(15),
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::invalid("host is empty"));
        }
        if self.port == 0 {
            return Err(Error::invalid("port must be non-zero"));
        }
        if self.user.trim().is_empty() {
            return Err(Error::invalid("user is empty"));
        }
        if self.poll_command.trim().is_empty() {
            return Err(Error::invalid("poll command is empty"));
        }
        Ok(())
    }

    /// `user@host:port`, for logs and errors.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SessionConfig {
    Bandwidth(BandwidthConfig),
    Radio(RadioConfig),
}

impl SessionConfig {
    pub fn kind(&self) -> SessionKind {
        match self {
            Self::Bandwidth(_) => SessionKind::Bandwidth,
            Self::Radio(_) => SessionKind::Radio,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Bandwidth(c) => c.validate(),
            Self::Radio(c) => c.validate(),
        }
    }

    /// One-line description for the dashboard title and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Bandwidth(c) => format!("{}:{} [{}]", c.receiver, c.port, c.profile),
            Self::Radio(c) => c.target(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bandwidth(receiver: &str, port: &str) -> BandwidthConfig {
        BandwidthConfig {
            receiver: receiver.into(),
            port: port.into(),
            ..Default::default()
        }
    }

    #[test]
    fn profile_parses_with_or_without_dash() {
        assert_eq!("log".parse::<Profile>().unwrap(), Profile::Log);
        assert_eq!("-delaytarget".parse::<Profile>().unwrap(), Profile::DelayTarget);
        assert_eq!(" MinRate ".parse::<Profile>().unwrap(), Profile::MinRate);
    }

    #[test]
    fn profile_unknown_is_invalid_config() {
        let err = "-turbo".parse::<Profile>().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn profile_names_roundtrip() {
        for p in Profile::ALL {
            assert_eq!(p.name().parse::<Profile>().unwrap(), p);
        }
    }

    #[test]
    fn profile_args_match_tool_options() {
        assert_eq!(Profile::Verbose.args("x.csv"), vec!["-verbose"]);
        assert_eq!(
            Profile::Log.args("x.csv"),
            vec!["-log", "x.csv", "-itemlist"]
        );
        assert_eq!(
            Profile::Key.args("x.csv"),
            vec!["-key", "2", "10", "x.csv", "-itemlist"]
        );
        assert!(Profile::Log.reads_log());
        assert!(!Profile::MinRate.reads_log());
    }

    #[test]
    fn bandwidth_argv_appends_target() {
        let mut c = bandwidth("10.0.0.2", "5000");
        c.profile = Profile::MaxRate;
        assert_eq!(
            c.argv(),
            vec!["-maxrate", "20000", "MWA_Demo1.csv", "-itemlist", "10.0.0.2", "5000"]
        );
    }

    #[test]
    fn bandwidth_validation() {
        assert!(bandwidth("10.0.0.2", "5000").validate().is_ok());
        assert!(bandwidth("", "5000").validate().is_err());
        assert!(bandwidth("  ", "5000").validate().is_err());
        assert!(bandwidth("10.0.0.2", "").validate().is_err());
        assert!(bandwidth("10.0.0.2", "0").validate().is_err());
        assert!(bandwidth("10.0.0.2", "http").validate().is_err());
        assert!(bandwidth("10.0.0.2", "70000").validate().is_err());
    }

    #[test]
    fn log_path_honours_working_dir() {
        let mut c = bandwidth("h", "1");
        assert_eq!(c.log_path(), PathBuf::from(DEFAULT_LOG_FILE));
        c.working_dir = Some(PathBuf::from("/tmp/run"));
        assert_eq!(c.log_path(), PathBuf::from("/tmp/run/MWA_Demo1.csv"));
    }

    #[test]
    fn radio_defaults_validate() {
        let c = RadioConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.target(), "root@192.168.1.1:22");
    }

    #[test]
    fn radio_validation() {
        let mut c = RadioConfig::default();
        c.host = String::new();
        assert!(c.validate().is_err());

        let mut c = RadioConfig::default();
        c.port = 0;
        assert!(c.validate().is_err());

        let mut c = RadioConfig::default();
        c.poll_command = " ".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn session_config_kind_and_describe() {
        let mut bw = bandwidth("10.0.0.2", "5000");
        bw.profile = Profile::Log;
        let c = SessionConfig::Bandwidth(bw);
        assert_eq!(c.kind(), SessionKind::Bandwidth);
        assert_eq!(c.describe(), "10.0.0.2:5000 [log]");

        let c = SessionConfig::Radio(RadioConfig::default());
        assert_eq!(c.kind(), SessionKind::Radio);
    }
}
