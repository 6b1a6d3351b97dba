//! Human-readable progress output.

use std::io::{self, Write};

/// Console sink for progress messages shown to an operator.
pub trait Io: Send + Sync {
    /// Starts a titled section.
    fn section(&self, title: &str);
    /// Writes one line of progress.
    fn line(&self, message: &str);
}

/// Writes progress to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleIo;

impl Io for ConsoleIo {
    fn section(&self, title: &str) {
        writeln!(io::stdout(), "\n== {title}").ok();
    }

    fn line(&self, message: &str) {
        writeln!(io::stdout(), "{message}").ok();
    }
}
