//! Console output buffering (spec.md §4.6): a cell's `stdout`/`stderr`
//! writes are batched for a short window rather than forwarded to the
//! session one `print()` at a time.
//!
//! Grounded on the teacher's background-task pattern in
//! `venus_server::serve` (an unbounded channel feeding a `tokio::spawn`ed
//! task that owns its own timer) rather than a raw thread + condvar, since
//! that's the concurrency idiom this codebase actually uses.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use crate::ids::CellId;
use crate::session::{Channel, CellOutput};

enum Event {
    Write(CellId, CellOutput),
    Shutdown,
}

/// A running console buffer; dropping this without calling
/// [`ConsoleBuffer::shutdown`] leaves the task running until the channel's
/// sender side is dropped, at which point it drains and exits on its own.
pub struct ConsoleBuffer {
    tx: mpsc::UnboundedSender<Event>,
    task: tokio::task::JoinHandle<()>,
}

impl ConsoleBuffer {
    /// Spawn the buffer task. `flush` is invoked once per cell per drain
    /// with whatever merged output accumulated since the last flush
    /// (spec.md §4.6's "mergeable-only" concatenation, identical to
    /// [`CellOutput::mergeable_with`]).
    pub fn spawn(flush_interval: Duration, flush: impl Fn(CellId, CellOutput) + Send + 'static) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let task = tokio::spawn(async move {
            let mut pending: HashMap<CellId, Vec<CellOutput>> = HashMap::new();
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Some(Event::Write(cell_id, output)) => append(&mut pending, cell_id, output),
                            Some(Event::Shutdown) | None => {
                                drain(&mut pending, &flush);
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        drain(&mut pending, &flush);
                    }
                }
            }
        });
        Self { tx, task }
    }

    pub fn write(&self, cell_id: CellId, channel: Channel, mimetype: impl Into<String>, data: impl Into<String>) {
        let _ = self.tx.send(Event::Write(cell_id, CellOutput::new(channel, mimetype, data)));
    }

    /// Ask the task to drain and exit, and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Event::Shutdown);
        let _ = self.task.await;
    }
}

fn append(pending: &mut HashMap<CellId, Vec<CellOutput>>, cell_id: CellId, output: CellOutput) {
    let entry = pending.entry(cell_id).or_default();
    if let Some(last) = entry.last_mut() {
        if last.mergeable_with(&output) {
            last.data.push_str(&output.data);
            return;
        }
    }
    entry.push(output);
}

fn drain(pending: &mut HashMap<CellId, Vec<CellOutput>>, flush: &impl Fn(CellId, CellOutput)) {
    for (cell_id, outputs) in pending.drain() {
        for output in outputs {
            flush(cell_id, output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn mergeable_writes_flush_as_one_output() {
        let flushed: Arc<Mutex<Vec<CellOutput>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = flushed.clone();
        let buffer = ConsoleBuffer::spawn(Duration::from_millis(5), move |_cell_id, output| {
            sink.lock().unwrap().push(output);
        });

        let cell_id = CellId::from_raw(1);
        buffer.write(cell_id, Channel::Stdout, "text/plain", "a");
        buffer.write(cell_id, Channel::Stdout, "text/plain", "b");

        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.shutdown().await;

        let results = flushed.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data, "ab");
    }

    #[tokio::test]
    async fn distinct_cells_flush_separately() {
        let flushed: Arc<Mutex<Vec<(CellId, CellOutput)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = flushed.clone();
        let buffer = ConsoleBuffer::spawn(Duration::from_millis(5), move |cell_id, output| {
            sink.lock().unwrap().push((cell_id, output));
        });

        let a = CellId::from_raw(1);
        let b = CellId::from_raw(2);
        buffer.write(a, Channel::Stdout, "text/plain", "from a");
        buffer.write(b, Channel::Stdout, "text/plain", "from b");

        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.shutdown().await;

        let results = flushed.lock().unwrap();
        assert_eq!(results.len(), 2);
    }
}
