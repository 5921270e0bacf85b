//! Handles Command Line Interface (CLI) related functionalities.
//!
//! Includes defining commands, parsing arguments, handling user interaction (prompts, menus)
//! and rendering service results as tables.

mod commands;

pub use commands::*;
