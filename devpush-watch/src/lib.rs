//! devpush-watch: the control loop that pushes, classifies the outcome, and
//! waits for the next reason to push again.

pub mod backoff;
pub mod control;
mod error;
pub mod fs_watch;
pub mod observer;
pub mod race;
pub mod remote;
pub mod reporter;
mod runtime;
pub mod settings;

pub use backoff::BackoffPolicy;
pub use control::{transition, ControlLoop, LoopDeps, LoopExit, Transition, WatchFactory};
pub use error::WatchError;
pub use fs_watch::{EventSource, WatchHandle};
pub use observer::{begin_watch, ChangeObserver};
pub use race::{race, ChangeSource, RaceWinner};
pub use remote::{
    PollingSubscriber, RemoteSignalWatcher, RemoteSubscriber, SignalWatch, Subscription,
};
pub use reporter::{Level, Phase, PhaseStatus, Reporter, TracingReporter};
pub use runtime::{init_tracing, run_loop, start_blocking};
pub use settings::LoopSettings;
