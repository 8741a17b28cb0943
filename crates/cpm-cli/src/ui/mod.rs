//! Terminal output
//!
//! Progress events arrive from the microtask worker and the blocking pool at
//! the same time; they are funnelled through one actor thread so lines never
//! interleave.

mod actor;

pub use actor::{ConsoleReporter, UiEvent};

use cpm_core::InstallPlan;
use crossterm::style::Stylize;

/// Print a plan's conflicts, one per line.
pub fn print_conflicts(plan: &InstallPlan) {
    if plan.conflicts().is_empty() {
        return;
    }
    eprintln!();
    eprintln!("{}", "Conflicts".bold().red());
    for conflict in plan.conflicts() {
        eprintln!("  {} {}", "✗".red(), conflict);
    }
    eprintln!();
}
