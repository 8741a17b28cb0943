//! UI Actor - Single-threaded event processing
//!
//! All terminal writes happen on one thread that owns the receiver. Callers
//! clone the sender and fire events without waiting for the terminal.

use std::sync::{Mutex, mpsc};
use std::thread;

use cpm_core::Reporter;
use cpm_schema::{Constraint, PackageName, Version};
use crossterm::style::Stylize;

/// Events that can be sent to the UI actor
#[derive(Debug)]
pub enum UiEvent {
    /// A dependency edge is being looked at
    Resolving { name: PackageName, constraint: String },
    /// A version was selected
    Resolved { name: PackageName, version: Version },
    /// An install job started
    Installing { name: PackageName, version: Version },
    /// An install job finished
    Done {
        name: PackageName,
        version: Version,
        detail: String,
    },
    /// An install job failed
    Failed {
        name: PackageName,
        version: Version,
        reason: String,
    },
    /// Print info message
    Info(String),
    /// Print warning message
    Warning(String),
    /// Print summary with timing
    Summary {
        count: usize,
        action: String,
        elapsed_secs: f64,
    },
    /// Reply once every earlier event has been printed
    Sync(mpsc::Sender<()>),
    /// Shutdown the actor
    Shutdown,
}

/// [`Reporter`] that prints through the UI actor thread.
pub struct ConsoleReporter {
    sender: Mutex<mpsc::Sender<UiEvent>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for ConsoleReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleReporter").finish_non_exhaustive()
    }
}

impl ConsoleReporter {
    /// Spawn the actor thread. `verbose` also prints resolution steps.
    pub fn spawn(verbose: bool) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("cpm-ui".into())
            .spawn(move || run_event_loop(&receiver, verbose))
            .ok();
        Self {
            sender: Mutex::new(sender),
            handle: Mutex::new(handle),
        }
    }

    fn send(&self, event: UiEvent) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event);
        }
    }

    /// Block until every event sent so far has been printed.
    pub fn sync(&self) {
        let (tx, rx) = mpsc::channel();
        self.send(UiEvent::Sync(tx));
        let _ = rx.recv();
    }
}

impl Drop for ConsoleReporter {
    fn drop(&mut self) {
        self.send(UiEvent::Shutdown);
        if let Some(handle) = self.handle.get_mut().ok().and_then(Option::take) {
            let _ = handle.join();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn resolving(&self, name: &PackageName, constraint: &Constraint) {
        self.send(UiEvent::Resolving {
            name: name.clone(),
            constraint: constraint.to_string(),
        });
    }

    fn resolved(&self, name: &PackageName, version: &Version) {
        self.send(UiEvent::Resolved {
            name: name.clone(),
            version: version.clone(),
        });
    }

    fn installing(&self, name: &PackageName, version: &Version) {
        self.send(UiEvent::Installing {
            name: name.clone(),
            version: version.clone(),
        });
    }

    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        self.send(UiEvent::Done {
            name: name.clone(),
            version: version.clone(),
            detail: detail.to_string(),
        });
    }

    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        self.send(UiEvent::Failed {
            name: name.clone(),
            version: version.clone(),
            reason: reason.to_string(),
        });
    }

    fn info(&self, msg: &str) {
        self.send(UiEvent::Info(msg.to_string()));
    }

    fn warning(&self, msg: &str) {
        self.send(UiEvent::Warning(msg.to_string()));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        self.send(UiEvent::Summary {
            count,
            action: action.to_string(),
            elapsed_secs,
        });
    }
}

fn run_event_loop(receiver: &mpsc::Receiver<UiEvent>, verbose: bool) {
    while let Ok(event) = receiver.recv() {
        match event {
            UiEvent::Resolving { name, constraint } => {
                if verbose {
                    println!("  {} {name} {constraint}", "resolve".dark_grey());
                }
            }
            UiEvent::Resolved { name, version } => {
                if verbose {
                    println!("  {} {name}@{version}", "select ".dark_grey());
                }
            }
            UiEvent::Installing { name, version } => {
                println!("  {} {name}@{version}", "install".cyan());
            }
            UiEvent::Done {
                name,
                version,
                detail,
            } => {
                println!("  {} {name}@{version} {}", "✓".green(), detail.dark_grey());
            }
            UiEvent::Failed {
                name,
                version,
                reason,
            } => {
                println!("  {} {name}@{version} {}", "✗".red(), reason.red());
            }
            UiEvent::Info(msg) => println!("  {} {msg}", "ℹ".blue()),
            UiEvent::Warning(msg) => println!("  {} {msg}", "⚠".yellow()),
            UiEvent::Summary {
                count,
                action,
                elapsed_secs,
            } => {
                let operation = action.to_uppercase();
                println!();
                println!("{}", format!("{operation} COMPLETE {count}, elapsed {elapsed_secs:.1}s").bold());
            }
            UiEvent::Sync(tx) => {
                let _ = tx.send(());
            }
            UiEvent::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_sync_and_shutdown() {
        let reporter = ConsoleReporter::spawn(false);
        reporter.info("hello");
        reporter.resolving(&PackageName::new("zlib"), &Constraint::Any);
        reporter.sync();
        drop(reporter);
    }

    #[test]
    fn test_event_variants() {
        let event = UiEvent::Done {
            name: PackageName::new("zlib"),
            version: Version::new(1, 3, 0),
            detail: "installed".into(),
        };
        assert!(matches!(event, UiEvent::Done { .. }));
    }
}
