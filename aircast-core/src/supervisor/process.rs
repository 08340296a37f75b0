use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

/// Seam between the supervisor and the operating system. Tests swap in
/// scripted spawners; production uses [`TokioProcessSpawner`].
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, command: &mut Command) -> io::Result<Box<dyn StreamHandle>>;
}

/// A running encoder process as the supervisor sees it.
#[async_trait]
pub trait StreamHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Waits for the process to exit. `None` means it was killed by a
    /// signal and carries no exit status.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Asks the process to stop and waits for it to go away.
    async fn terminate(&mut self) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessSpawner;

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, command: &mut Command) -> io::Result<Box<dyn StreamHandle>> {
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(TokioStreamHandle { child }))
    }
}

struct TokioStreamHandle {
    child: Child,
}

#[async_trait]
impl StreamHandle for TokioStreamHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn terminate(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Ok(()) => {
                self.child.wait().await?;
                Ok(())
            }
            // Already exited and reaped.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err),
        }
    }
}
