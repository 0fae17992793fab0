//! Line-by-line output, each target prefixed with a stable color.

use colored::{Color, Colorize};
use orgtree::Target;
use std::collections::HashMap;

use super::Renderer;
use crate::runner::Stream;

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::Yellow,
    Color::BrightCyan,
];

/// Prefix width before labels are padded no further.
const MAX_LABEL_WIDTH: usize = 40;

/// Prints `label | text` lines to stdout.
#[derive(Debug, Default)]
pub struct StdoutRenderer {
    colors: HashMap<String, Color>,
    width: usize,
}

impl StdoutRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Color for `key`, assigned on first sight and stable afterwards.
    fn color_for(&mut self, key: &str) -> Color {
        let next = PALETTE[self.colors.len() % PALETTE.len()];
        *self.colors.entry(key.to_string()).or_insert(next)
    }

    fn format(&mut self, target: &Target, text: &str, stream: Stream) -> String {
        self.width = self.width.max(target.label.len()).min(MAX_LABEL_WIDTH);
        let label = format!("{:<width$}", target.label, width = self.width);
        let color = self.color_for(&target.key);
        let text = match stream {
            Stream::Stdout => text.normal(),
            Stream::Stderr => text.dimmed(),
        };
        format!("{} {} {}", label.color(color).bold(), "|".dimmed(), text)
    }
}

impl Renderer for StdoutRenderer {
    fn line(&mut self, target: &Target, text: &str, stream: Stream) {
        println!("{}", self.format(target, text, stream));
    }
}
