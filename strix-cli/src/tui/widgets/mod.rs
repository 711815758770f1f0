//! TUI widgets

pub mod dashboard;
