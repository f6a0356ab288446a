//! Command provider: the polling loop feeding the dispatch queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stampede_core::{Command, CommandType};
use stampede_interfaces::CommandStore;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Leases commands for this host and pushes them onto the bounded
/// dispatch channel. A full channel blocks the provider — that
/// backpressure is intentional, the queue keeps the backlog durable.
pub struct CommandProvider {
    commands: Arc<dyn CommandStore>,
    hostname: String,
    poll_interval: Duration,
    is_running: AtomicBool,
}

impl CommandProvider {
    pub fn new(
        commands: Arc<dyn CommandStore>,
        hostname: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            commands,
            hostname: hostname.into(),
            poll_interval,
            is_running: AtomicBool::new(false),
        }
    }

    /// Run until [`stop`](Self::stop) is called or the dispatch channel
    /// closes.
    pub async fn run(&self, dispatch: mpsc::Sender<Command>) {
        self.is_running.store(true, Ordering::Relaxed);
        info!(hostname = %self.hostname, interval = ?self.poll_interval, "command provider started");

        while self.is_running.load(Ordering::Relaxed) {
            let leased = match self.commands.lease_next(&self.hostname).await {
                Ok(leased) => leased,
                Err(err) => {
                    error!("lease failed: {err}");
                    sleep(self.poll_interval).await;
                    continue;
                }
            };

            let Some(command) = leased else {
                debug!("no leasable commands");
                sleep(self.poll_interval).await;
                continue;
            };

            debug!(id = command.id, command_type = %command.command_type, "command leased");
            let is_update = command.command_type == CommandType::Update;
            if dispatch.send(command).await.is_err() {
                info!("dispatch channel closed, provider exiting");
                break;
            }

            // Throttle the self-chaining Update loop when the system is
            // otherwise idle.
            if is_update {
                match self.commands.count_created(&self.hostname).await {
                    Ok(0) => sleep(self.poll_interval).await,
                    Ok(_) => {}
                    Err(err) => error!("counting pending commands failed: {err}"),
                }
            }
        }

        info!("command provider stopped");
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stampede_core::CommandStatus;
    use stampede_interfaces::StorageError;
    use std::sync::atomic::AtomicU32;

    /// Store that is permanently empty but counts lease attempts.
    #[derive(Default)]
    struct EmptyStore {
        polls: AtomicU32,
    }

    #[async_trait]
    impl CommandStore for EmptyStore {
        async fn enqueue(&self, command: Command) -> Result<Command, StorageError> {
            Ok(command)
        }

        async fn lease_next(&self, _hostname: &str) -> Result<Option<Command>, StorageError> {
            self.polls.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }

        async fn update_status(
            &self,
            _command: &mut Command,
            _status: CommandStatus,
            _error_append: &str,
        ) -> Result<(), StorageError> {
            Ok(())
        }

        async fn complete(&self, _command: &Command) -> Result<bool, StorageError> {
            Ok(true)
        }

        async fn count_created(&self, _hostname: &str) -> Result<u64, StorageError> {
            Ok(0)
        }

        async fn delete_pending_updates(&self, _run_id: i64) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn empty_queue_keeps_polling_without_erroring() {
        let store = Arc::new(EmptyStore::default());
        let provider = Arc::new(CommandProvider::new(
            Arc::clone(&store) as Arc<dyn CommandStore>,
            "h1",
            Duration::from_millis(5),
        ));
        let (tx, _rx) = mpsc::channel(1);

        let handle = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.run(tx).await })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        provider.stop();
        handle.await.unwrap();

        assert!(store.polls.load(Ordering::Relaxed) >= 2);
    }
}
