//! TUI rendering: a status title, a 2x2 grid of live charts, and a key bar.
//!
//! ┌──────────────────────────────────────────────┐
//! │  📡 linkscope  radio  root@192.168.1.1:22    │
//! ├──────────────────────┬───────────────────────┤
//! │  RSSI, RSRP, RSRQ    │  SINR                 │
//! │  ⣀⡠⠤⠒⠉               │  ⠒⠒⠤⣀                 │
//! ├──────────────────────┼───────────────────────┤
//! │  TX                  │  RX                   │
//! │  ⣀⣀⡠⠔                │  ⠉⠒⠤⣀                 │
//! ├──────────────────────┴───────────────────────┤
//! │  started root@192.168.1.1:22                 │
//! ├──────────────────────────────────────────────┤
//! │  s: start  x: stop  t: terminate  q: quit    │
//! └──────────────────────────────────────────────┘

use super::app::App;
use linkscope_core::{PanelFrame, SessionState};
use ratatui::{prelude::*, widgets::*};

const TRACE_COLORS: [Color; 3] = [Color::Cyan, Color::Yellow, Color::Magenta];

pub fn draw(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Min(10),   // charts
            Constraint::Length(3), // status
            Constraint::Length(1), // keys
        ])
        .split(f.area());

    draw_title(f, rows[0], app);
    draw_charts(f, rows[1], app);
    draw_status(f, rows[2], app);
    draw_keys(f, rows[3]);
}

fn draw_title(f: &mut Frame, area: Rect, app: &App) {
    let state = app.state();
    let updates = app.frame().updates;
    let counters = app.counters();
    let refresh = app.refresh_rate_secs();
    let elapsed = app
        .elapsed()
        .map(|d| format!("  {:.0}s", d.as_secs_f64()))
        .unwrap_or_default();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Line::from(vec![
            Span::styled(" 📡 linkscope ", Style::default().bold().fg(Color::Cyan)),
            Span::raw(format!(" {}  ", app.kind())),
            Span::styled(app.description(), Style::default().bold().fg(Color::Yellow)),
            Span::raw("  "),
            Span::styled(state.to_string(), state_style(state)),
            Span::styled(
                format!(
                    "  #{updates}  skipped {}  errors {}  {refresh:.1}s{elapsed} ",
                    counters.skipped, counters.parse_errors
                ),
                Style::default().fg(Color::DarkGray),
            ),
        ]));

    f.render_widget(block, area);
}

fn state_style(state: SessionState) -> Style {
    match state {
        SessionState::Running => Style::default().bold().fg(Color::Green),
        SessionState::Idle => Style::default().fg(Color::DarkGray),
        SessionState::Stopping | SessionState::Terminating => {
            Style::default().bold().fg(Color::Yellow)
        }
    }
}

fn draw_charts(f: &mut Frame, area: Rect, app: &App) {
    let halves = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let cells: Vec<Rect> = halves
        .iter()
        .flat_map(|half| {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(*half)
                .to_vec()
        })
        .collect();

    for (panel, cell) in app.frame().panels.iter().zip(cells) {
        draw_panel(f, cell, panel);
    }
}

fn draw_panel(f: &mut Frame, area: Rect, panel: &PanelFrame) {
    if panel.is_empty() {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", panel.title));
        let p = Paragraph::new("Waiting for samples")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(p, area);
        return;
    }

    let datasets: Vec<Dataset> = panel
        .traces
        .iter()
        .enumerate()
        .map(|(i, trace)| {
            let latest = match trace.latest {
                Some(v) => format_value(v),
                None => "-".into(),
            };
            Dataset::default()
                .name(format!("{} {latest}", trace.metric))
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(TRACE_COLORS[i % TRACE_COLORS.len()]))
                .data(&trace.points)
        })
        .collect();

    let [x_min, x_max] = panel.x_bounds;
    let [y_min, y_max] = panel.y_bounds;

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", panel.title)),
        )
        .x_axis(Axis::default().bounds(panel.x_bounds).labels(vec![
            Line::from(format!("{x_min:.0}")),
            Line::from(format!("{x_max:.0}")),
        ]))
        .y_axis(
            Axis::default()
                .title(panel.y_label)
                .bounds(panel.y_bounds)
                .labels(vec![
                    Line::from(format_value(y_min)),
                    Line::from(format_value(y_max)),
                ]),
        )
        .legend_position(Some(LegendPosition::TopLeft));

    f.render_widget(chart, area);
}

/// Compact axis and legend numbers: bit rates in the millions read as `4.2M`.
fn format_value(v: f64) -> String {
    let a = v.abs();
    if a >= 1e9 {
        format!("{:.1}G", v / 1e9)
    } else if a >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if a >= 1e4 {
        format!("{:.1}k", v / 1e3)
    } else if a != 0.0 && a < 0.01 {
        format!("{v:.2e}")
    } else {
        format!("{v:.2}")
    }
}

fn draw_status(f: &mut Frame, area: Rect, app: &App) {
    let (text, style) = match (app.last_error(), app.message()) {
        (Some(err), _) => (format!("error: {err}"), Style::default().fg(Color::Red)),
        (None, Some(msg)) => (msg.to_string(), Style::default().fg(Color::Yellow)),
        (None, None) => (String::new(), Style::default()),
    };
    let block = Block::default().borders(Borders::ALL).title(" Status ");
    let p = Paragraph::new(text).style(style).block(block);
    f.render_widget(p, area);
}

fn draw_keys(f: &mut Frame, area: Rect) {
    let bar = Paragraph::new(
        " s: start/restart   x: stop   t: terminate+quit   e: export   +/-: refresh   q: quit",
    )
    .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_value_scales_large_and_small() {
        assert_eq!(format_value(4_200_000.0), "4.2M");
        assert_eq!(format_value(-65.0), "-65.00");
        assert_eq!(format_value(0.0), "0.00");
        assert_eq!(format_value(12_500.0), "12.5k");
        assert_eq!(format_value(0.001), "1.00e-3");
    }
}
