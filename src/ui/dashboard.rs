use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    widgets::{Block, Borders, List, ListItem, Paragraph, Sparkline, Tabs},
    Terminal,
};

use chunkpace::metrics::AnsweredRate;
use chunkpace::sim::TICK;
use chunkpace::{ControllerConfig, TickRecord};

const SPARK_LEN: usize = 200;
const MAX_EVENTS: usize = 100;

/// Where the allowed budget sits relative to its clamp bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Band {
    Floor,
    Free,
    Ceiling,
}

pub struct DashboardState {
    config: ControllerConfig,
    pub last: Option<TickRecord>,
    pub budgets: VecDeque<u64>,
    pub desired: VecDeque<u64>,
    pub events: Vec<String>,
    pub finished: bool,
    throughput: AnsweredRate,
    band: Option<Band>,
    warm: bool,
}

impl DashboardState {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            last: None,
            budgets: VecDeque::with_capacity(SPARK_LEN),
            desired: VecDeque::with_capacity(SPARK_LEN),
            events: Vec::new(),
            finished: false,
            throughput: AnsweredRate::new(TICK, 20),
            band: None,
            warm: false,
        }
    }

    pub fn push(&mut self, record: TickRecord) {
        // hundredths of a millisecond / hundredths of a unit
        push_capped(&mut self.budgets, (record.allowed_budget / 10_000.0) as u64);
        push_capped(&mut self.desired, (record.desired_units * 100.0) as u64);
        self.throughput.record(record.answered_units);

        if !self.warm && record.boost == 0.0 {
            self.warm = true;
            self.event(format!("tick {}: warm-up over after {} batches", record.tick, record.batches_answered));
        }
        let band = if record.allowed_budget <= self.config.min_budget_per_tick {
            Band::Floor
        } else if record.allowed_budget >= self.config.max_budget_per_tick {
            Band::Ceiling
        } else {
            Band::Free
        };
        if self.band != Some(band) {
            let what = match band {
                Band::Floor => "budget pinned at floor",
                Band::Free => "budget within bounds",
                Band::Ceiling => "budget pinned at ceiling",
            };
            self.event(format!(
                "tick {}: {what} ({:.2} ms, est {:.2} ms/unit)",
                record.tick,
                record.allowed_budget / 1e6,
                record.estimated_cost / 1e6
            ));
            self.band = Some(band);
        }
        self.last = Some(record);
    }

    pub fn units_per_sec(&self) -> f64 {
        self.throughput.per_sec()
    }

    fn event(&mut self, line: String) {
        self.events.push(line);
        if self.events.len() > MAX_EVENTS {
            self.events.remove(0);
        }
    }
}

fn push_capped(buf: &mut VecDeque<u64>, v: u64) {
    buf.push_back(v);
    if buf.len() > SPARK_LEN {
        buf.pop_front();
    }
}

pub fn run_dashboard(config: ControllerConfig, records: Receiver<TickRecord>, stop: Arc<AtomicBool>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = DashboardState::new(config);
    let mut active_tab: usize = 0; // 0: Overview, 1: History
    let mut event_scroll: usize = 0;

    while !stop.load(Ordering::Relaxed) {
        loop {
            match records.try_recv() {
                Ok(r) => state.push(r),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !state.finished {
                        state.finished = true;
                        let tick = state.last.as_ref().map(|r| r.tick).unwrap_or(0);
                        state.event(format!("tick {tick}: simulation finished"));
                    }
                    break;
                }
            }
        }

        terminal.draw(|f| {
            let outer = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1), // Tabs header
                    Constraint::Min(0),    // Main
                    Constraint::Length(1), // Footer
                ].as_ref())
                .split(f.size());

            let titles = ["Overview", "History"].iter().map(|t| (*t).to_string());
            f.render_widget(Tabs::new(titles).select(active_tab), outer[0]);

            if active_tab == 0 {
                let sub = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Length(6), // Status
                        Constraint::Length(6), // Budget spark
                        Constraint::Length(6), // Units spark
                        Constraint::Min(0),    // Events
                    ].as_ref())
                    .split(outer[1]);

                let status = match &state.last {
                    Some(r) => format!(
                        "tick {}{} | cost true {:.2} ms est {:.2} ms | batches answered {}\n\
                         ratio {:.3} | boost {:.3} | multiplier {:.3} | average {}\n\
                         budget {:.2} ms (raw {:.2} ms) | desired {:.2} units/tick\n\
                         requested {} | in flight {} | answered {:.1} units/s",
                        r.tick,
                        if state.finished { " (finished)" } else { "" },
                        r.true_cost / 1e6,
                        r.estimated_cost / 1e6,
                        r.batches_answered,
                        r.ratio,
                        r.boost,
                        r.multiplier,
                        r.average.map(|a| format!("{a:.3}")).unwrap_or_else(|| "-".into()),
                        r.allowed_budget / 1e6,
                        r.raw_budget / 1e6,
                        r.desired_units,
                        r.requested,
                        r.in_flight,
                        state.units_per_sec(),
                    ),
                    None => "waiting for first tick".to_string(),
                };
                let status = Paragraph::new(status).block(Block::default().title("Controller").borders(Borders::ALL));
                f.render_widget(status, sub[0]);

                let budgets: Vec<u64> = state.budgets.iter().copied().collect();
                let spark = Sparkline::default()
                    .block(Block::default().title("Allowed budget").borders(Borders::ALL))
                    .data(&budgets);
                f.render_widget(spark, sub[1]);

                let desired: Vec<u64> = state.desired.iter().copied().collect();
                let spark = Sparkline::default()
                    .block(Block::default().title("Desired units per tick").borders(Borders::ALL))
                    .data(&desired);
                f.render_widget(spark, sub[2]);

                let viewport = sub[3].height.saturating_sub(2) as usize;
                let start = state.events.len().saturating_sub(viewport + event_scroll);
                let items: Vec<ListItem> = state.events.iter().skip(start).map(|l| ListItem::new(l.clone())).collect();
                let list = List::new(items).block(Block::default().title("Events").borders(Borders::ALL));
                f.render_widget(list, sub[3]);
            } else {
                let (history, cursor, window) = match &state.last {
                    Some(r) => (r.history.clone(), r.write_index, r.batches_answered as usize),
                    None => (Vec::new(), 0, 0),
                };
                let items: Vec<ListItem> = history
                    .iter()
                    .enumerate()
                    .map(|(i, m)| {
                        let cursor_mark = if i == cursor { ">" } else { " " };
                        let window_mark = if i < window { "*" } else { " " };
                        ListItem::new(format!("{cursor_mark}{window_mark} slot {i:>2}  {m:>10.4}"))
                    })
                    .collect();
                let title = format!("Multiplier history ({:?} window, * = averaged, > = next write)", state.config.smoothing);
                let list = List::new(items).block(Block::default().title(title).borders(Borders::ALL));
                f.render_widget(list, outer[1]);
            }

            let footer = if active_tab == 0 {
                Paragraph::new("Tab: history | q: quit | ↑/↓/Home: scroll events | c: clear events")
            } else {
                Paragraph::new("Tab: overview | q: quit")
            };
            f.render_widget(footer, outer[2]);
        })?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q')
                    || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
                {
                    stop.store(true, Ordering::Relaxed);
                } else if key.code == KeyCode::Tab {
                    active_tab = (active_tab + 1) % 2;
                } else if active_tab == 0 {
                    match key.code {
                        KeyCode::Up => event_scroll = event_scroll.saturating_add(1),
                        KeyCode::Down => event_scroll = event_scroll.saturating_sub(1),
                        KeyCode::Home => event_scroll = 0,
                        KeyCode::Char('c') => {
                            state.events.clear();
                            event_scroll = 0;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
