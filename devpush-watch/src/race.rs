//! First-resolver-wins race between the change sources.

use async_trait::async_trait;

/// A cancellable wait on "something changed".
#[async_trait]
pub trait ChangeSource: Send {
    async fn wait(&mut self);

    /// Release whatever an abandoned [`wait`](Self::wait) left open. Idempotent.
    fn cancel(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceWinner {
    Filesystem,
    RemoteTable,
    EnvVars,
}

impl RaceWinner {
    pub fn label(&self) -> &'static str {
        match self {
            RaceWinner::Filesystem => "local files changed",
            RaceWinner::RemoteTable => "remote table changed",
            RaceWinner::EnvVars => "environment variables changed",
        }
    }
}

/// Wait on all three sources; cancel both losers exactly once.
///
/// Polling order is fixed so simultaneous wakeups prefer the filesystem.
pub async fn race<F, T, E>(files: &mut F, table: &mut T, env_vars: &mut E) -> RaceWinner
where
    F: ChangeSource + ?Sized,
    T: ChangeSource + ?Sized,
    E: ChangeSource + ?Sized,
{
    let winner = tokio::select! {
        biased;
        _ = files.wait() => RaceWinner::Filesystem,
        _ = table.wait() => RaceWinner::RemoteTable,
        _ = env_vars.wait() => RaceWinner::EnvVars,
    };

    match winner {
        RaceWinner::Filesystem => {
            table.cancel();
            env_vars.cancel();
        }
        RaceWinner::RemoteTable => {
            files.cancel();
            env_vars.cancel();
        }
        RaceWinner::EnvVars => {
            files.cancel();
            table.cancel();
        }
    }
    winner
}
