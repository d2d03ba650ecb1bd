use autoflow_runner::prelude::SessionEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

/// Displays a progress bar while submitted sessions drain.
pub fn start_progress(total: u64, mut events: broadcast::Receiver<SessionEvent>) {
    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} sessions",
                )
                .expect("Failed to set progress style")
                .progress_chars("#>-"),
            );

            let mut finished = 0;
            while finished < total {
                match events.blocking_recv() {
                    Ok(SessionEvent::SessionFinished { .. }) => {
                        finished += 1;
                        pb.set_position(finished);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            pb.finish_and_clear();
        })
        .expect("Failed to start progress thread");
}
