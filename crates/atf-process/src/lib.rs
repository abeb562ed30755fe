//! Child process lifecycle: spawning with the isolation a test case needs,
//! multiplexed stream draining, timeout enforcement and process-tree kill.

pub mod kill;
pub mod muxer;
pub mod spawn;

pub use kill::{default_grabber, kill_process_group, kill_tree, PidGrabber};
pub use muxer::{drain_and_wait, OutputLine};
pub use spawn::{exec, wait_with_timeout, SpawnRequest, StreamSpec};
