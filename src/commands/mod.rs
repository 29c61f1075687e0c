pub mod console;

pub use console::{execute, ConsoleCommand, HELP};
