// Control layer - turns buttons, remote commands and timers into one consistent state machine

pub mod action;
pub mod controller;
pub mod interface;
pub mod kill_switch;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod volume;

pub use action::Action;
pub use controller::{ControlExit, Controller, DevicePorts};
pub use interface::{ActionSink, Interface};
pub use kill_switch::KillSwitch;
pub use scheduler::{DaytimeRange, PlaylistMode, PlaylistScheduler};
pub use state::{ControllerStateUpdate, StateBroadcaster, StateSubscriber};
pub use task::RestartableTask;
pub use volume::Volume;
