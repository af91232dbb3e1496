//! Live progress for a running analysis
//!
//! Workers report start/finish per workload; a background renderer redraws
//! a spinner line plus one line per in-flight workload every 100ms. In
//! verbose mode nothing is drawn and progress goes to the log instead.

use colored::Colorize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::info;

/// Braille spinner frames
pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Redraw cadence
pub const TICK: Duration = Duration::from_millis(100);

/// Cursor up one line, then clear it
const CLEAR_LINE: &str = "\x1b[A\x1b[2K";

#[derive(Debug, Default)]
struct TrackerState {
    total: usize,
    completed: usize,
    in_flight: BTreeMap<String, Instant>,
    /// Lines drawn by the previous frame, erased before the next one
    drawn_lines: usize,
}

/// Thread-safe progress counter shared by all analysis workers
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    verbose: bool,
}

impl ProgressTracker {
    pub fn new(total: usize, verbose: bool) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                total,
                ..Default::default()
            }),
            verbose,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A panicked worker must not take progress reporting down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    /// Mark a workload as in flight
    pub fn start_processing(&self, namespace: &str, name: &str) {
        self.lock().in_flight.insert(Self::key(namespace, name), Instant::now());
        if self.verbose {
            info!(namespace = %namespace, workload = %name, "Analyzing workload");
        }
    }

    /// Mark a workload as done; unknown keys do not advance the count
    pub fn finish_processing(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        if let Some(started) = state.in_flight.remove(&Self::key(namespace, name)) {
            state.completed += 1;
            if self.verbose {
                info!(
                    namespace = %namespace,
                    workload = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    completed = state.completed,
                    total = state.total,
                    "Finished workload"
                );
            }
        }
    }

    /// Replace the expected total once grouping has collapsed replicas
    pub fn update_total(&self, total: usize) {
        self.lock().total = total;
    }

    pub fn completed(&self) -> usize {
        self.lock().completed
    }

    pub fn total(&self) -> usize {
        self.lock().total
    }

    /// Keys of workloads currently being analyzed, sorted
    pub fn in_flight(&self) -> Vec<String> {
        self.lock().in_flight.keys().cloned().collect()
    }

    /// Final one-line summary
    pub fn summary(&self) -> String {
        let state = self.lock();
        format!("Analyzed {}/{} pods", state.completed, state.total)
    }

    /// Lines for one redraw, without terminal control codes
    pub fn render_frame(&self, frame: usize) -> Vec<String> {
        let spinner = SPINNER_FRAMES[frame % SPINNER_FRAMES.len()];
        let state = self.lock();

        let mut lines = Vec::with_capacity(state.in_flight.len() + 1);
        lines.push(format!(
            "{} Analyzing workloads {}/{}",
            spinner, state.completed, state.total
        ));
        for (key, started) in &state.in_flight {
            lines.push(format!("  {} {} ({:.1}s)", spinner, key, started.elapsed().as_secs_f64()));
        }
        lines
    }

    /// Spawn the renderer; returns immediately. In verbose mode the handle
    /// does nothing but print the summary on finish.
    pub fn start(self: &Arc<Self>) -> ProgressHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = if self.verbose {
            None
        } else {
            Some(tokio::spawn(Arc::clone(self).render_loop(shutdown_rx)))
        };

        ProgressHandle {
            tracker: Arc::clone(self),
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn render_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(TICK);
        let mut frame = 0usize;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.draw(frame);
                    frame = frame.wrapping_add(1);
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    fn draw(&self, frame: usize) {
        let lines = self.render_frame(frame);
        let previous = std::mem::replace(&mut self.lock().drawn_lines, lines.len());

        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{}", CLEAR_LINE.repeat(previous));
        for line in &lines {
            let _ = writeln!(stderr, "{}", line.cyan());
        }
        let _ = stderr.flush();
    }

    fn clear(&self) {
        let previous = std::mem::take(&mut self.lock().drawn_lines);
        if previous > 0 {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "{}", CLEAR_LINE.repeat(previous));
            let _ = stderr.flush();
        }
    }
}

/// Running renderer; call [`ProgressHandle::finish`] to stop it
pub struct ProgressHandle {
    tracker: Arc<ProgressTracker>,
    shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ProgressHandle {
    /// Stop rendering, erase the live lines and print the summary
    pub async fn finish(self) -> String {
        let _ = self.shutdown.send(());
        if let Some(task) = self.task {
            let _ = task.await;
            self.tracker.clear();
        }

        let summary = self.tracker.summary();
        eprintln!("{}", summary.green());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_counts_only_started_keys() {
        let tracker = ProgressTracker::new(2, true);
        tracker.start_processing("apps", "web");
        tracker.finish_processing("apps", "web");
        tracker.finish_processing("apps", "never-started");
        tracker.finish_processing("apps", "web");

        assert_eq!(tracker.completed(), 1);
        assert_eq!(tracker.summary(), "Analyzed 1/2 pods");
    }

    #[test]
    fn test_update_total() {
        let tracker = ProgressTracker::new(6, true);
        tracker.update_total(3);
        assert_eq!(tracker.total(), 3);
        assert_eq!(tracker.summary(), "Analyzed 0/3 pods");
    }

    #[test]
    fn test_render_frame_lists_in_flight() {
        let tracker = ProgressTracker::new(3, false);
        tracker.start_processing("media", "plex");
        tracker.start_processing("apps", "web");

        let lines = tracker.render_frame(0);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "⠋ Analyzing workloads 0/3");
        assert!(lines[1].starts_with("  ⠋ apps/web ("));
        assert!(lines[2].starts_with("  ⠋ media/plex ("));

        let next = tracker.render_frame(11);
        assert!(next[0].starts_with("⠙"));
    }

    #[tokio::test]
    async fn test_concurrent_workers() {
        let tracker = Arc::new(ProgressTracker::new(50, true));
        let mut handles = Vec::new();

        for i in 0..50 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                let name = format!("w{i}");
                tracker.start_processing("apps", &name);
                tokio::task::yield_now().await;
                tracker.finish_processing("apps", &name);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.completed(), 50);
        assert!(tracker.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_handle_finish_returns_summary() {
        let tracker = Arc::new(ProgressTracker::new(1, false));
        let handle = tracker.start();
        tracker.start_processing("apps", "web");
        tokio::time::sleep(Duration::from_millis(150)).await;
        tracker.finish_processing("apps", "web");

        assert_eq!(handle.finish().await, "Analyzed 1/1 pods");
    }
}
