//! Background heartbeat for the writer coordinator.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::WriterCoordinator;

/// Statistics from the heartbeat thread.
#[derive(Debug, Default, Clone)]
pub struct CoordinatorStats {
    pub polls: usize,
    pub failures: usize,
}

/// A background thread that keeps the node's group session alive.
///
/// Leaves the group when stopped, so the role moves to another node
/// without waiting for the session to time out.
pub struct CoordinatorThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<CoordinatorStats>>,
}

impl CoordinatorThread {
    pub fn spawn(coordinator: Arc<WriterCoordinator>, heartbeat_interval: Duration) -> Self {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = CoordinatorStats::default();

            loop {
                stats.polls += 1;
                if coordinator.poll().is_err() {
                    stats.failures += 1;
                }

                match stop_rx.recv_timeout(heartbeat_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            if let Err(err) = coordinator.resign() {
                tracing::warn!(error = %err, "failed to leave group on shutdown");
            }
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to leave the group.
    pub fn stop(mut self) -> CoordinatorStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            CoordinatorStats::default()
        }
    }

    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for CoordinatorThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{InMemoryGroup, MemberMetadata};
    use std::time::Instant;

    #[test]
    fn heartbeats_until_stopped_then_leaves() {
        let group = InMemoryGroup::new("g", Duration::from_secs(10));
        let coordinator = Arc::new(WriterCoordinator::new(
            Arc::new(group.clone()),
            MemberMetadata::new("a", "u", true),
            Duration::from_secs(10),
        ));
        let worker = CoordinatorThread::spawn(Arc::clone(&coordinator), Duration::from_millis(5));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !coordinator.is_writer() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(coordinator.is_writer());

        let stats = worker.stop();
        assert!(stats.polls >= 1);
        assert_eq!(stats.failures, 0);
        assert!(!coordinator.is_writer());
        assert!(group.member_ids().is_empty());
    }
}
