//! Live view: one spinner line per target showing its latest output.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use orgtree::Target;
use std::collections::HashMap;
use std::time::Duration;

use super::Renderer;
use crate::runner::Stream;

/// Keeps one progress line per target.
pub struct LiveRenderer {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl LiveRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_for(&mut self, target: &Target) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(target.key.clone()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {prefix:.bold} {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_prefix(target.label.clone());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        })
    }
}

impl Default for LiveRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for LiveRenderer {
    fn line(&mut self, target: &Target, text: &str, _stream: Stream) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.bar_for(target).set_message(text.to_string());
    }

    fn finish(&mut self) {
        for bar in self.bars.values() {
            bar.finish();
        }
    }
}
