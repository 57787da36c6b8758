pub mod bandwidth;
pub mod headless;
pub mod radio;

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use linkscope_core::{Controller, SessionConfig};

/// Options shared by every dashboard command.
pub struct DisplayOptions {
    pub refresh: f64,
    pub capacity: usize,
    pub headless: bool,
    pub log_output: PathBuf,
}

impl DisplayOptions {
    fn refresh_interval(&self) -> Duration {
        if self.refresh.is_finite() && self.refresh > 0.0 {
            Duration::from_secs_f64(self.refresh)
        } else {
            linkscope_core::render::DEFAULT_REFRESH
        }
    }
}

/// Route `log` output. The dashboard owns the terminal, so logs go to a file
/// there; headless mode logs to stderr. `RUST_LOG` overrides the level.
fn init_logging(options: &DisplayOptions) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if !options.headless {
        match File::create(&options.log_output) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!(
                    "Warning: cannot open log file {}: {e}; logging disabled",
                    options.log_output.display()
                );
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }
    let _ = builder.try_init();
}

/// Validate, then hand the session to the dashboard or the headless loop.
fn run_session(config: SessionConfig, options: DisplayOptions) {
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    init_logging(&options);

    let controller = Controller::new(options.capacity);
    let refresh = options.refresh_interval();

    if options.headless {
        headless::run(controller, config, refresh);
        return;
    }

    let mut app = crate::tui::app::App::new(controller, config, refresh);
    if let Err(e) = app.run() {
        eprintln!("TUI error: {e}");
        std::process::exit(1);
    }
}
