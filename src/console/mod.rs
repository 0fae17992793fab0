//! Console sinks
//!
//! Every print and every subprocess line goes to a single renderer thread
//! over a channel. The renderer owns all display state (colors, panes), so
//! account tasks never share anything but the sender.

mod live;
mod stdout;

pub use live::LiveRenderer;
pub use stdout::StdoutRenderer;

use orgtree::{ConsoleSink, Target};
use std::process::{Command, ExitStatus};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::runner::{self, Stream};

/// Draws lines for targets. Runs on the renderer thread only.
pub trait Renderer: Send + 'static {
    fn line(&mut self, target: &Target, text: &str, stream: Stream);

    /// Called once after the last line.
    fn finish(&mut self) {}
}

struct Line {
    target: Target,
    text: String,
    stream: Stream,
}

/// [`ConsoleSink`] backed by a renderer thread.
pub struct Console {
    sender: Option<Sender<Line>>,
    handle: Option<JoinHandle<()>>,
    command_timeout: Option<Duration>,
}

impl Console {
    /// Start a renderer thread.
    pub fn new<R: Renderer>(mut renderer: R, command_timeout: Option<Duration>) -> Self {
        let (sender, receiver) = mpsc::channel::<Line>();
        let handle = thread::spawn(move || {
            for line in receiver {
                renderer.line(&line.target, &line.text, line.stream);
            }
            renderer.finish();
        });
        Self {
            sender: Some(sender),
            handle: Some(handle),
            command_timeout,
        }
    }

    /// Line-by-line colored output.
    pub fn stdout(command_timeout: Option<Duration>) -> Self {
        Self::new(StdoutRenderer::new(), command_timeout)
    }

    /// One live line per target.
    pub fn live(command_timeout: Option<Duration>) -> Self {
        Self::new(LiveRenderer::new(), command_timeout)
    }

    fn send(&self, target: &Target, text: &str, stream: Stream) {
        if let Some(sender) = &self.sender {
            // The renderer only stops after the sender is dropped.
            let _ = sender.send(Line {
                target: target.clone(),
                text: text.to_string(),
                stream,
            });
        }
    }

    /// Flush every pending line and stop the renderer.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("console renderer panicked");
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ConsoleSink for Console {
    fn print(&self, message: &str, target: &Target) {
        for line in message.lines() {
            self.send(target, line, Stream::Stdout);
        }
    }

    fn run_command(&self, command: Command, target: &Target) -> orgtree::Result<ExitStatus> {
        self.send(
            target,
            &format!("$ {}", orgtree::render_command(&command)),
            Stream::Stdout,
        );
        runner::run_streaming(command, self.command_timeout, &|stream, line| {
            self.send(target, line, stream);
        })
    }
}
