//! # Strings
//!
//! Centralizes user-facing strings so messaging stays consistent and easy
//! to update.

pub const SELECT_AN_OPTION: &str = "Please select an option:";
pub const USE_THE_BUTTONS: &str = "Please use the buttons!";
pub const INVALID_INPUT: &str = "That input is not valid. Please try again.";
pub const TIMEOUT_NOTICE: &str = "You took too long to answer!";
pub const YES_LABEL: &str = "Yes";
pub const NO_LABEL: &str = "No";

pub fn you_selected(label: &str) -> String {
    format!("You selected: {label}")
}

/// Discard reason recorded when a button click preempts a free-text wait.
pub const REASON_BUTTON_PRESSED: &str = "button-pressed-on-time";
/// Discard reason recorded when a newer request supersedes a pending one.
pub const REASON_SUPERSEDED: &str = "request-superseded";
