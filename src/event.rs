use tokio::sync::{mpsc, oneshot};

use crate::cache::{InstallReport, Served};
use crate::net::Request;
use crate::worker::WorkerError;

/// Events delivered to the worker host, one handler per kind.
#[derive(Debug)]
pub enum WorkerEvent {
  /// Populate the current bucket from the asset manifest
  Install {
    reply: oneshot::Sender<Result<InstallReport, WorkerError>>,
  },
  /// Evict stale buckets and start controlling fetches
  Activate {
    reply: oneshot::Sender<Result<Vec<String>, WorkerError>>,
  },
  /// A request intercepted from the page
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Served, WorkerError>>,
  },
  /// Wait for background cache writes started so far
  Settle {
    reply: oneshot::Sender<Result<(), WorkerError>>,
  },
}

/// Create a connected handle/receiver pair.
pub fn channel() -> (WorkerHandle, EventReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (WorkerHandle { tx }, EventReceiver { rx })
}

/// Sending side, held by whatever hosts the page.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

/// Pending answer to a queued event.
pub type Reply<T> = oneshot::Receiver<Result<T, WorkerError>>;

impl WorkerHandle {
  pub async fn install(&self) -> Result<InstallReport, WorkerError> {
    wait(self.dispatch_install()?).await
  }

  pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
    wait(self.dispatch_activate()?).await
  }

  #[allow(dead_code)]
  pub async fn fetch(&self, request: Request) -> Result<Served, WorkerError> {
    wait(self.dispatch_fetch(request)?).await
  }

  pub async fn settle(&self) -> Result<(), WorkerError> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Settle { reply })?;
    wait(rx).await
  }

  // The dispatch_* methods queue synchronously, so events reach the host in
  // call order even when their answers are awaited later.

  pub fn dispatch_install(&self) -> Result<Reply<InstallReport>, WorkerError> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Install { reply })?;
    Ok(rx)
  }

  pub fn dispatch_activate(&self) -> Result<Reply<Vec<String>>, WorkerError> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Activate { reply })?;
    Ok(rx)
  }

  pub fn dispatch_fetch(&self, request: Request) -> Result<Reply<Served>, WorkerError> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch { request, reply })?;
    Ok(rx)
  }

  fn send(&self, event: WorkerEvent) -> Result<(), WorkerError> {
    self.tx.send(event).map_err(|_| WorkerError::Stopped)
  }
}

/// Await a queued event's answer.
pub async fn wait<T>(reply: Reply<T>) -> Result<T, WorkerError> {
  reply.await.map_err(|_| WorkerError::Stopped)?
}

/// Receiving side, drained by the worker host.
pub struct EventReceiver {
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventReceiver {
  /// Receive the next event
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }
}
