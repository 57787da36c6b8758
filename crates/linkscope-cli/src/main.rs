//! CLI for linkscope: live dashboards for bandwidth tests and cellular radio state.

mod commands;
mod tui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use linkscope_core::config::{
    DEFAULT_HOST, DEFAULT_LOG_FILE, DEFAULT_PROGRAM, DEFAULT_SSH_PORT, DEFAULT_USER,
};

#[derive(Parser)]
#[command(name = "linkscope")]
#[command(about = "linkscope: live dashboards for bandwidth tests and cellular radio state")]
#[command(version = linkscope_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bandwidth-test sender and chart queue delay, RTT, rate and loss
    Bandwidth {
        /// Receiver address
        #[arg(long)]
        receiver: String,

        /// Receiver port
        #[arg(long)]
        port: String,

        /// Option profile: verbose, log, key, minrate, maxrate, delaytarget
        #[arg(long, default_value = "verbose")]
        profile: String,

        /// Path to the bandwidth-test sender binary
        #[arg(long, default_value = DEFAULT_PROGRAM)]
        program: PathBuf,

        /// Log file name used by the log-writing profiles
        #[arg(long, default_value = DEFAULT_LOG_FILE)]
        log_file: PathBuf,

        /// Dashboard refresh interval in seconds
        #[arg(long, default_value = "1.0")]
        refresh: f64,

        /// Samples kept per metric
        #[arg(long, default_value_t = linkscope_core::DEFAULT_CAPACITY)]
        capacity: usize,

        /// Print a summary line per refresh instead of drawing the dashboard
        #[arg(long)]
        headless: bool,

        /// Where diagnostic logs go in dashboard mode
        #[arg(long, default_value = "linkscope.log")]
        log_output: PathBuf,
    },

    /// Poll a cellular router over ssh and chart RSSI, RSRP, RSRQ, SINR, TX and RX
    Radio {
        /// Router address
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// SSH port
        #[arg(long, default_value_t = DEFAULT_SSH_PORT)]
        port: u16,

        /// Login user
        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        /// Login password (uses sshpass); key authentication when omitted
        #[arg(long, env = "LINKSCOPE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Directory for PHY_TEST_*.csv logs
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Dashboard refresh interval in seconds
        #[arg(long, default_value = "1.0")]
        refresh: f64,

        /// Samples kept per metric
        #[arg(long, default_value_t = linkscope_core::DEFAULT_CAPACITY)]
        capacity: usize,

        /// Print a summary line per refresh instead of drawing the dashboard
        #[arg(long)]
        headless: bool,

        /// Where diagnostic logs go in dashboard mode
        #[arg(long, default_value = "linkscope.log")]
        log_output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bandwidth {
            receiver,
            port,
            profile,
            program,
            log_file,
            refresh,
            capacity,
            headless,
            log_output,
        } => commands::bandwidth::run(commands::bandwidth::BandwidthCommandConfig {
            receiver,
            port,
            profile: &profile,
            program,
            log_file,
            display: commands::DisplayOptions {
                refresh,
                capacity,
                headless,
                log_output,
            },
        }),
        Commands::Radio {
            host,
            port,
            user,
            password,
            output_dir,
            refresh,
            capacity,
            headless,
            log_output,
        } => commands::radio::run(commands::radio::RadioCommandConfig {
            host,
            port,
            user,
            password,
            output_dir,
            display: commands::DisplayOptions {
                refresh,
                capacity,
                headless,
                log_output,
            },
        }),
    }
}
