//! Predictor input features
//!
//! For a window of N+1 executions (ascending):
//!
//! ```text
//! [Δ1 .. ΔN, sin(2π·h/24), cos(2π·h/24), sin(2π·w/7), cos(2π·w/7)]
//! ```
//!
//! Δ are inter-arrival times in seconds, `h` the hour of day and `w` the
//! weekday (Monday = 0) of the most recent execution.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Feature vector plus the anchor time the prediction is relative to
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    pub features: Vec<f64>,
    /// Most recent execution in the window
    pub last: DateTime<Utc>,
}

impl FeatureWindow {
    /// Build from at least `window_size + 1` timestamps, in any order
    ///
    /// Only the most recent `window_size + 1` are used.
    pub fn from_timestamps(timestamps: &[DateTime<Utc>], window_size: usize) -> Option<Self> {
        if window_size == 0 || timestamps.len() < window_size + 1 {
            return None;
        }

        let mut sorted = timestamps.to_vec();
        sorted.sort();
        let window = &sorted[sorted.len() - (window_size + 1)..];
        let last = *window.last()?;

        let mut features: Vec<f64> = window
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        features.extend(cyclical(last));

        Some(Self { features, last })
    }

    /// Number of features for a given window size
    pub fn width(window_size: usize) -> usize {
        window_size + 4
    }
}

fn cyclical(at: DateTime<Utc>) -> [f64; 4] {
    let hour = 2.0 * PI * at.hour() as f64 / 24.0;
    let weekday = 2.0 * PI * at.weekday().num_days_from_monday() as f64 / 7.0;
    [hour.sin(), hour.cos(), weekday.sin(), weekday.cos()]
}
