//! Byte progress for client transfers.
//!
//! A thin wrapper over an indicatif bar so the transfer engine only sees
//! `inc`/`set_length`. A hidden bar costs nothing when progress is off.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(label: &str, total: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());
        if visible {
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self::new("", 0, false)
    }

    /// Total becomes known once the length header arrives.
    pub fn set_length(&self, total: u64) {
        self.bar.set_length(total);
    }

    pub fn inc(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_counts() {
        let p = TransferProgress::hidden();
        p.set_length(10);
        p.inc(4);
        p.inc(6);
        assert_eq!(p.position(), 10);
        p.finish();
    }
}
