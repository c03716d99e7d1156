//! Query performance monitor
//!
//! Observability only; nothing here affects correctness. Each executed
//! statement is classified by verb and its latency kept in a bounded
//! per-class window.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Durations retained per statement class
const WINDOW_CAP: usize = 1000;

/// Statement class, by leading SQL verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementClass {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementClass::Select => "SELECT",
            StatementClass::Insert => "INSERT",
            StatementClass::Update => "UPDATE",
            StatementClass::Delete => "DELETE",
            StatementClass::Other => "OTHER",
        }
    }
}

/// Aggregated latency stats for one statement class
#[derive(Debug, Clone, Serialize)]
pub struct ClassStats {
    pub class: StatementClass,
    /// Statements recorded since service start
    pub count: u64,
    /// Stats below cover the retained window only
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub total_ms: f64,
}

#[derive(Default)]
struct ClassWindow {
    count: u64,
    durations: VecDeque<Duration>,
}

/// Per-class latency accounting
#[derive(Default)]
pub struct PerfMonitor {
    classes: Mutex<HashMap<StatementClass, ClassWindow>>,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed statement
    pub fn record(&self, class: StatementClass, duration: Duration) {
        let mut classes = self.classes.lock().unwrap();
        let window = classes.entry(class).or_default();
        window.count += 1;
        if window.durations.len() == WINDOW_CAP {
            window.durations.pop_front();
        }
        window.durations.push_back(duration);
    }

    /// Statements recorded for one class since service start
    pub fn count(&self, class: StatementClass) -> u64 {
        self.classes
            .lock()
            .unwrap()
            .get(&class)
            .map(|w| w.count)
            .unwrap_or(0)
    }

    /// Snapshot of stats for every class seen so far
    pub fn snapshot(&self) -> Vec<ClassStats> {
        let classes = self.classes.lock().unwrap();
        let mut stats: Vec<ClassStats> = classes
            .iter()
            .map(|(class, window)| {
                let ms: Vec<f64> = window
                    .durations
                    .iter()
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .collect();
                let total: f64 = ms.iter().sum();
                ClassStats {
                    class: *class,
                    count: window.count,
                    min_ms: ms.iter().copied().fold(f64::INFINITY, f64::min),
                    max_ms: ms.iter().copied().fold(0.0, f64::max),
                    avg_ms: if ms.is_empty() {
                        0.0
                    } else {
                        total / ms.len() as f64
                    },
                    total_ms: total,
                }
            })
            .collect();
        stats.sort_by_key(|s| s.class.as_str());
        stats
    }
}
