//! Headless mode: one summary line per refresh tick until Ctrl+C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use linkscope_core::{Controller, RenderTicker, SessionConfig, SessionState, Snapshot};

pub fn run(mut controller: Controller, config: SessionConfig, refresh: Duration) {
    let kind = config.kind();
    let description = config.describe();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    if let Err(e) = controller.start(config) {
        eprintln!("Error starting session: {e}");
        std::process::exit(1);
    }

    println!("Acquiring {kind} telemetry");
    println!("  Target:   {description}");
    println!("  Refresh:  {:.1}s", refresh.as_secs_f64());
    println!("  Capacity: {} samples per metric", controller.capacity());
    println!();

    let start = Instant::now();
    let mut ticker = RenderTicker::new(refresh);

    while running.load(Ordering::SeqCst) {
        if ticker.due(Instant::now()) {
            let snapshot = controller.snapshot();
            let counters = controller.counters();
            println!(
                "[{:>7.1}s] {:<8} updates {:<6} skipped {:<4} errors {:<4} {}",
                start.elapsed().as_secs_f64(),
                controller.state().to_string(),
                snapshot.updates,
                counters.skipped,
                counters.parse_errors,
                latest_values(kind.metrics(), &snapshot),
            );
        }
        if controller.state() == SessionState::Idle {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    if let Err(e) = controller.stop() {
        eprintln!("Error stopping session: {e}");
    }

    println!();
    match controller.last_error() {
        Some(reason) => {
            eprintln!("Session ended: {reason}");
            std::process::exit(1);
        }
        None => println!("Session stopped after {:.1}s", start.elapsed().as_secs_f64()),
    }
}

/// `RTT=0.012 Queue Delay=0.25 ...`, with `-` for metrics that have no value.
fn latest_values(metrics: &[&str], snapshot: &Snapshot) -> String {
    metrics
        .iter()
        .map(|m| match snapshot.latest(m) {
            Some(v) => format!("{m}={v}"),
            None => format!("{m}=-"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn latest_values_marks_missing() {
        let mut series = BTreeMap::new();
        series.insert("RTT".to_string(), vec![Some(0.5), None]);
        series.insert("TX".to_string(), vec![None]);
        let snapshot = Snapshot {
            series,
            updates: 2,
            epoch: 1,
        };
        assert_eq!(latest_values(&["RTT", "TX"], &snapshot), "RTT=0.5 TX=-");
    }
}
