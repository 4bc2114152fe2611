//! Terminal output: the live queue monitor and the maintenance confirmation.
//!
//! Uses `indicatif` for one bar per queue and `console` for colors.

use std::collections::HashMap;

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Bars are scaled to this many queued items; longer queues pin the bar.
const BAR_SCALE: u64 = 50;

/// How worrying a queue length is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backlog {
    Empty,
    Flowing,
    Congested,
}

impl Backlog {
    pub fn of(len: usize) -> Self {
        match len {
            0 => Backlog::Empty,
            n if n < BAR_SCALE as usize / 2 => Backlog::Flowing,
            _ => Backlog::Congested,
        }
    }
}

/// One bar per stage queue, refreshed on every poll.
pub struct QueueMonitor {
    _multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    green: Style,
    yellow: Style,
    red: Style,
}

impl QueueMonitor {
    pub fn start(queues: &[String]) -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::default_bar()
            .template("{prefix:>10.bold} [{bar:40.cyan/blue}] {pos:>4} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bars = queues
            .iter()
            .map(|name| {
                let bar = multi.add(ProgressBar::new(BAR_SCALE));
                bar.set_style(style.clone());
                bar.set_prefix(name.clone());
                (name.clone(), bar)
            })
            .collect();

        Self {
            _multi: multi,
            bars,
            green: Style::new().green(),
            yellow: Style::new().yellow(),
            red: Style::new().red().bold(),
        }
    }

    pub fn update(&self, lengths: &[(String, usize)]) {
        for (name, len) in lengths {
            let Some(bar) = self.bars.get(name) else {
                continue;
            };
            bar.set_position((*len as u64).min(BAR_SCALE));
            let label = match Backlog::of(*len) {
                Backlog::Empty => self.green.apply_to(format!("{len} queued")),
                Backlog::Flowing => self.yellow.apply_to(format!("{len} queued")),
                Backlog::Congested => self.red.apply_to(format!("{len} queued, backlog")),
            };
            bar.set_message(label.to_string());
        }
    }

    /// Prints a transport error above the bars without tearing them.
    pub fn warn(&self, message: &str) {
        if let Some(bar) = self.bars.values().next() {
            bar.println(format!("  {} {message}", self.red.apply_to("✗")));
        }
    }

    pub fn finish(&self) {
        for bar in self.bars.values() {
            bar.abandon();
        }
    }
}

pub fn maintenance_requested(stage: &str) {
    println!(
        "  {} Maintenance requested for {}",
        Style::new().green().bold().apply_to("✓"),
        Style::new().bold().apply_to(stage)
    );
}
