//! Background alignment worker
//!
//! Runs one cross-correlation pass at a time on its own thread. Results are
//! published by storing them and then raising a single `ready` flag; the
//! control thread picks them up with [`Aligner::take_results`]. Every trigger
//! and every [`Aligner::discard`] starts a new generation; a pass only
//! publishes if its generation is still current. The audio thread is never
//! involved.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use irmix_analysis::{estimate_alignment, AlignInput, AlignmentResult};
use irmix_library::ImpulseResponse;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::params::NUM_SLOTS;

/// How long shutdown waits for a running pass before detaching it
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignStart {
    /// A new pass was started
    Started,
    /// A pass is already running; the request was ignored
    Busy,
}

struct Shared {
    running: AtomicBool,
    cancel: AtomicBool,
    ready: AtomicBool,
    generation: AtomicU64,
    results: Mutex<AlignmentResult>,
}

/// Signals the worker's exit, even if the pass panics
struct ExitGuard {
    shared: Arc<Shared>,
    done: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.done.try_send(());
    }
}

/// Owner of the alignment worker thread
pub struct Aligner {
    shared: Arc<Shared>,
    worker: Option<(JoinHandle<()>, Receiver<()>)>,
}

impl Default for Aligner {
    fn default() -> Self {
        Self::new()
    }
}

impl Aligner {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                results: Mutex::new(AlignmentResult::empty()),
            }),
            worker: None,
        }
    }

    /// Whether a pass is in progress
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether unconsumed results are waiting
    pub fn has_results(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Start a pass over the given responses.
    ///
    /// Ignored (returns `Busy`) while a pass is running. `on_complete` runs on
    /// the worker thread after results are published; it is not called for a
    /// cancelled or discarded pass.
    pub fn trigger<F>(
        &mut self,
        impulses: [Option<Arc<ImpulseResponse>>; NUM_SLOTS],
        on_complete: F,
    ) -> std::io::Result<AlignStart>
    where
        F: FnOnce() + Send + 'static,
    {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("alignment already running, trigger ignored");
            return Ok(AlignStart::Busy);
        }

        self.reap();
        self.shared.cancel.store(false, Ordering::Release);
        let generation = {
            let _results = self.shared.results.lock();
            // Stale results from an earlier pass are superseded
            self.shared.ready.store(false, Ordering::Release);
            self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        let shared = Arc::clone(&self.shared);
        let (done_tx, done_rx) = bounded(1);
        let guard = ExitGuard {
            shared: Arc::clone(&shared),
            done: done_tx,
        };

        let spawned = thread::Builder::new()
            .name("auto-aligner".into())
            .spawn(move || {
                let _guard = guard;
                run_pass(&shared, generation, &impulses, on_complete);
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some((handle, done_rx));
                Ok(AlignStart::Started)
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Take published results, clearing the ready flag.
    /// Returns `None` if no new results are available.
    pub fn take_results(&self) -> Option<AlignmentResult> {
        if self.shared.ready.swap(false, Ordering::AcqRel) {
            Some(*self.shared.results.lock())
        } else {
            None
        }
    }

    /// Drop any pending or published results.
    ///
    /// A running pass is cancelled, and if it finishes anyway its result is
    /// not published. Returns whether unconsumed results were thrown away.
    pub fn discard(&self) -> bool {
        self.shared.cancel.store(true, Ordering::Release);
        let _results = self.shared.results.lock();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.ready.swap(false, Ordering::AcqRel)
    }

    /// Ask a running pass to stop and wait up to `SHUTDOWN_TIMEOUT` for it.
    pub fn shutdown(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        if let Some((handle, done)) = self.worker.take() {
            if done.recv_timeout(SHUTDOWN_TIMEOUT).is_ok() || handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("alignment worker did not stop in time, detaching");
            }
        }
    }

    /// Join a worker that has already finished
    fn reap(&mut self) {
        if let Some((handle, _)) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Aligner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_pass<F: FnOnce()>(
    shared: &Shared,
    generation: u64,
    impulses: &[Option<Arc<ImpulseResponse>>; NUM_SLOTS],
    on_complete: F,
) {
    let inputs: [Option<AlignInput<'_>>; NUM_SLOTS] = std::array::from_fn(|i| {
        impulses[i].as_ref().map(|ir| AlignInput {
            samples: ir.channel(0),
            sample_rate: ir.sample_rate() as f64,
        })
    });

    let Some(result) = estimate_alignment(&inputs, || shared.cancel.load(Ordering::Acquire)) else {
        debug!("alignment pass cancelled");
        return;
    };

    {
        let mut published = shared.results.lock();
        if shared.generation.load(Ordering::Acquire) != generation {
            debug!("alignment pass superseded, result dropped");
            return;
        }
        *published = result;
        shared.ready.store(true, Ordering::Release);
    }
    info!(offsets_ms = ?result.offsets_ms, reference = ?result.reference, "alignment complete");
    on_complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn spike(at: usize) -> Option<Arc<ImpulseResponse>> {
        let mut samples = vec![0.0f32; 1000];
        samples[at] = 1.0;
        Some(Arc::new(ImpulseResponse::from_channels(vec![samples], 48000).unwrap()))
    }

    fn wait_for_results(aligner: &Aligner) -> AlignmentResult {
        let start = Instant::now();
        loop {
            if let Some(r) = aligner.take_results() {
                return r;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "alignment timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_pass_publishes_results() {
        let mut aligner = Aligner::new();
        let (tx, rx) = bounded(1);
        let started = aligner
            .trigger([spike(10), None, spike(58), None], move || {
                let _ = tx.send(());
            })
            .unwrap();
        assert_eq!(started, AlignStart::Started);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let result = wait_for_results(&aligner);
        assert_eq!(result.reference, Some(0));
        assert!((result.offsets_ms[2] - 1.0).abs() < 1e-9);
        // Results are consumed once
        assert!(aligner.take_results().is_none());
    }

    #[test]
    fn test_trigger_while_running_is_ignored() {
        let mut aligner = Aligner::new();
        // Hold the pass open by blocking its completion callback
        let (release_tx, release_rx) = bounded::<()>(1);
        aligner
            .trigger([spike(0), spike(0), None, None], move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();

        let start = Instant::now();
        while !aligner.has_results() {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
        assert!(aligner.is_running());
        assert_eq!(aligner.trigger([None, None, None, None], || {}).unwrap(), AlignStart::Busy);

        release_tx.send(()).unwrap();
        aligner.shutdown();
        assert!(!aligner.is_running());
    }

    #[test]
    fn test_empty_pass_completes() {
        let mut aligner = Aligner::new();
        aligner.trigger([None, None, None, None], || {}).unwrap();
        let result = wait_for_results(&aligner);
        assert_eq!(result, AlignmentResult::empty());
    }

    #[test]
    fn test_discard_drops_published_results() {
        let mut aligner = Aligner::new();
        aligner.trigger([spike(10), spike(58), None, None], || {}).unwrap();
        let start = Instant::now();
        while !aligner.has_results() {
            assert!(start.elapsed() < Duration::from_secs(5), "alignment timed out");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(aligner.discard());
        assert!(!aligner.has_results());
        assert!(aligner.take_results().is_none());
        assert!(!aligner.discard());
    }

    #[test]
    fn test_discarded_pass_never_publishes() {
        let mut aligner = Aligner::new();
        aligner.trigger([spike(10), spike(58), None, None], || {}).unwrap();
        aligner.discard();
        aligner.shutdown();
        assert!(!aligner.is_running());
        assert!(!aligner.has_results());
        assert!(aligner.take_results().is_none());

        // A fresh trigger publishes again
        aligner.trigger([spike(10), spike(58), None, None], || {}).unwrap();
        let result = wait_for_results(&aligner);
        assert!((result.offsets_ms[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shutdown_without_worker() {
        let mut aligner = Aligner::new();
        aligner.shutdown();
        assert!(!aligner.is_running());
        assert!(aligner.take_results().is_none());
    }
}
