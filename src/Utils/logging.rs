//! Console logger setup shared by the demo binary and (optionally) by tests.
//!
//! The solver itself only emits `log` macros; whoever owns `main` decides where
//! they go. Calling `init_console_logger` twice is harmless - the second call
//! just reports that a logger is already installed.

use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

/// Install a terminal logger at the given level.
pub fn init_console_logger(level: LevelFilter) {
    let res = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    if res.is_err() {
        log::debug!("logger already initialized, keeping the existing one");
    }
}
