//! Progress reporting, separate from results
//!
//! Status lines are short human-readable milestones; console lines carry
//! raw diagnostic detail. Both are mirrored to the log.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Status(String),
    Console(String),
}

/// Sending half of a progress channel; a no-op when nobody listens
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<Progress>>,
}

/// A connected sender and its receiver
pub fn progress_channel() -> (ProgressSender, mpsc::UnboundedReceiver<Progress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx: Some(tx) }, rx)
}

impl ProgressSender {
    /// A sender that only logs
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.send(Progress::Status(message));
    }

    pub fn console(&self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{}", message);
        self.send(Progress::Console(message));
    }

    fn send(&self, progress: Progress) {
        if let Some(tx) = &self.tx {
            // a dropped receiver only means nobody is watching
            let _ = tx.send(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channels_keep_kinds_apart() {
        let (progress, mut rx) = progress_channel();
        progress.status("Fitting B_vs_A");
        progress.console("prior variance 0.41");
        drop(progress);

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p);
        }
        assert_eq!(
            seen,
            vec![
                Progress::Status("Fitting B_vs_A".to_string()),
                Progress::Console("prior variance 0.41".to_string())
            ]
        );
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (progress, rx) = progress_channel();
        drop(rx);
        progress.status("still fine");
        ProgressSender::silent().console("nobody listening");
    }
}
