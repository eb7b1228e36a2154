// Front panels for a desktop run of the toy
// The terminal remote stands in for the phone app, the console for a headless serial link

pub mod console;
#[cfg(feature = "tui")]
pub mod remote;

pub use console::{ConsoleInterface, JsonStateLogger};
#[cfg(feature = "tui")]
pub use remote::{RemoteView, TerminalRemote};
