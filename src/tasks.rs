use crate::error::handle_error;
use crate::notification::{CallReport, NotificationDispatcher};

use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Background dashboard deliveries.  Each report gets its own tracked task so one call's retries
/// never hold up another's, and shutdown can wait for whatever is still in flight.
#[derive(Clone)]
pub struct NotificationTasks {
    dispatcher: Arc<NotificationDispatcher>,
    tracker: TaskTracker,
}

impl NotificationTasks {
    pub fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            dispatcher,
            tracker: TaskTracker::new(),
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Queue delivery of a claimed report.  Returns immediately.
    pub fn enqueue(&self, report: CallReport) {
        let dispatcher = self.dispatcher.clone();
        debug!(call_sid=%report.call_id, in_flight=self.tracker.len(), "queueing dashboard report");
        self.tracker.spawn(async move {
            if let Err(e) = dispatcher.deliver(&report).await {
                handle_error(e);
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every queued delivery, retries included, to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "waiting for dashboard deliveries");
        self.tracker.wait().await;
    }

    #[cfg(test)]
    pub async fn drain(&self) {
        self.shutdown().await;
        self.tracker.reopen();
    }
}
