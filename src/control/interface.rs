// Input interfaces - anything that turns user intent into actions

use super::{Action, Controller};
use async_trait::async_trait;

/// Handle given to each interface's `listen`. Every call is exactly one user
/// action; debouncing belongs to the interface.
#[derive(Clone)]
pub struct ActionSink {
    controller: Controller,
}

impl ActionSink {
    pub(crate) fn new(controller: Controller) -> Self {
        Self { controller }
    }

    pub fn send(&self, action: Action) {
        self.controller.handle_action(action);
    }

    /// Raw wire code, as received from a button board or remote link
    pub fn send_command(&self, code: u8) {
        self.controller.handle_command(code);
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}

#[async_trait]
pub trait Interface: Send {
    fn name(&self) -> &str;

    /// Runs until the interface is closed. Returning ends control.
    async fn listen(self: Box<Self>, actions: ActionSink) -> anyhow::Result<()>;
}
