use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{Continuation, SessionStats, SyncOrchestrator};
use crate::calculator::IncrementalCalculator;
use crate::error::{SyncError, SyncResult};
use crate::snapshot::Page;

type PageResult = (u64, SyncResult<Page>);

#[derive(Debug)]
pub(super) enum Command {
    Invalidate(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<SessionStats>),
}

/// Controls a session running under [`SyncOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
}

impl SyncHandle {
    pub(super) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Discards the cached state and restarts the session cold.
    ///
    /// Resolves once the session has bootstrapped again.
    pub async fn invalidate(&self) -> SyncResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Invalidate(ack))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        done.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Stops the session and returns its statistics.
    pub async fn shutdown(&self) -> SyncResult<SessionStats> {
        let (reply, stats) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(reply))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        stats.await.map_err(|_| SyncError::SessionClosed)
    }
}

impl<C: IncrementalCalculator> SyncOrchestrator<C> {
    /// Runs the session until it stops, is shut down, or fails.
    ///
    /// Pages are fetched on a separate task so invalidation and shutdown are
    /// handled while a request is outstanding. A fatal error is rendered and
    /// returned.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn run(mut self) -> SyncResult<SessionStats> {
        let mut commands = self.command_rx.take().ok_or(SyncError::SessionClosed)?;
        let (page_tx, mut page_rx) = mpsc::unbounded_channel::<PageResult>();

        info!("Sync session started");
        let mut next = Some(self.bootstrap().await?);

        loop {
            match next.take() {
                Some(Continuation::FetchNow) => self.spawn_fetch(&page_tx)?,
                Some(Continuation::Stop) => break,
                Some(Continuation::Schedule(_)) | None => {}
            }

            let deadline = self.session.next_fetch_at;
            tokio::select! {
                Some((generation, result)) = page_rx.recv() => {
                    next = self.on_page(generation, result).await?;
                }
                () = sleep_until(deadline) => {
                    debug!("Refresh timer fired");
                    self.session.next_fetch_at = None;
                    next = Some(Continuation::FetchNow);
                }
                command = commands.recv() => match command {
                    Some(Command::Invalidate(ack)) => {
                        next = Some(self.invalidate().await?);
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.stop();
                        let _ = reply.send(self.stats.clone());
                        break;
                    }
                    None => break,
                },
            }
        }

        info!(
            pages_merged = self.stats.pages_merged,
            snapshots_merged = self.stats.snapshots_merged,
            fetch_failures = self.stats.fetch_failures,
            persist_failures = self.stats.persist_failures,
            phase = %self.session.phase,
            "Sync session stopped"
        );
        Ok(self.stats)
    }

    fn spawn_fetch(&mut self, results: &mpsc::UnboundedSender<PageResult>) -> SyncResult<()> {
        let request = match self.begin_fetch() {
            Ok(request) => request,
            Err(e) => return Err(self.fail(e)),
        };

        let source = Arc::clone(&self.source);
        let results = results.clone();
        tokio::spawn(async move {
            let result = source.request_page(request.from).await;
            if results.send((request.generation, result)).is_err() {
                debug!("Session ended before the page arrived");
            }
        });
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
