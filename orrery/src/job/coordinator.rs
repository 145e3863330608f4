//! The coordinator state machine and the worker wrapper.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use minstant::Instant;

use crate::sync::spsc::{self, Consumer, Producer};
use crate::trace::{debug, error, info, warn};

use super::cancel::CancelFlag;
use super::event::{JobError, JobEvent, JobId, JobObserver, Progress};

/// Progress updates buffered between two `poll()` calls before new ones are dropped.
pub const PROGRESS_QUEUE_CAPACITY: usize = 64;

/// A description of work. Immutable once submitted; the worker gets a clone.
pub trait JobRequest: Clone + Send + 'static {
    /// Human-readable label carried by the `Started` event.
    fn label(&self) -> String;
}

/// The work itself, executed on the worker thread.
///
/// Implementations must poll [`JobContext::checkpoint`] often enough to
/// return promptly once the job is cancelled.
pub trait JobBody<R, A>: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`JobError::Cancelled`] when the cancel flag was observed, or
    /// [`JobError::Execution`] for domain failures.
    fn run(&self, request: &R, ctx: &JobContext) -> Result<A, JobError>;
}

impl<R, A, F> JobBody<R, A> for F
where
    F: Fn(&R, &JobContext) -> Result<A, JobError> + Send + Sync + 'static,
{
    fn run(&self, request: &R, ctx: &JobContext) -> Result<A, JobError> {
        self(request, ctx)
    }
}

/// Control-thread step run on a successful artifact before `Succeeded` is emitted.
///
/// May touch state that must not be mutated off the control thread. Must not
/// block indefinitely.
pub trait Finalize<R, A> {
    /// # Errors
    ///
    /// An error turns the job into a `Failed` event.
    fn finalize(&mut self, request: &R, artifact: &mut A) -> Result<(), JobError>;
}

impl<R, A, F> Finalize<R, A> for F
where
    F: FnMut(&R, &mut A) -> Result<(), JobError>,
{
    fn finalize(&mut self, request: &R, artifact: &mut A) -> Result<(), JobError> {
        self(request, artifact)
    }
}

/// What the job body sees while running.
pub struct JobContext {
    id: JobId,
    cancel: CancelFlag,
    progress: Producer<Progress, PROGRESS_QUEUE_CAPACITY>,
    dropped: AtomicU64,
}

impl JobContext {
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_raised()
    }

    /// Returns `Err(Cancelled)` once the coordinator has raised the flag.
    ///
    /// # Errors
    ///
    /// [`JobError::Cancelled`] when cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Progress updates lost to a full queue so far.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues a progress update for the control thread. Never blocks; the
    /// update is dropped if the control thread has fallen behind.
    pub fn report(&self, label: impl Into<String>, current: i64, min: i64, max: i64) {
        let update = Progress {
            label: label.into(),
            current,
            min,
            max,
        };
        if self.progress.push(update).is_err() {
            // Warn once per job; a fast body can overrun the queue every tick.
            if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!(job = %self.id, "progress queue full, dropping updates");
            }
        }
    }
}

/// Queues submissions from code that runs while the coordinator is busy
/// (observers, finalizers). Queued requests are started by the next `poll()`.
pub struct Submitter<R> {
    queue: Rc<RefCell<VecDeque<R>>>,
}

impl<R> Clone for Submitter<R> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
        }
    }
}

impl<R> Submitter<R> {
    fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn submit(&self, request: R) {
        self.queue.borrow_mut().push_back(request);
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    fn take_all(&self) -> VecDeque<R> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }
}

/// The one in-flight job.
struct ActiveJob<R, A> {
    id: JobId,
    request: R,
    worker: JoinHandle<Result<A, JobError>>,
    progress: Consumer<Progress, PROGRESS_QUEUE_CAPACITY>,
    started: Instant,
}

/// How completion handling was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// The worker finished on its own.
    Natural,
    /// A newer `submit` raised the flag and waited.
    Superseded,
    /// `cancel()` raised the flag and waited.
    Cancelled,
}

/// Serializes background jobs: at most one worker thread at any time.
///
/// Owned by the control thread. Everything except the [`CancelFlag`] and the
/// worker's half of the progress queue stays on that thread.
pub struct JobCoordinator<R: JobRequest, A: Send + 'static> {
    body: Arc<dyn JobBody<R, A>>,
    finalizer: Option<Box<dyn Finalize<R, A>>>,
    observers: Vec<Box<dyn JobObserver<R, A>>>,
    cancel: CancelFlag,
    active: Option<ActiveJob<R, A>>,
    deferred: Submitter<R>,
    next_id: u64,
}

impl<R: JobRequest, A: Send + 'static> JobCoordinator<R, A> {
    pub fn new(body: impl JobBody<R, A>) -> Self {
        Self {
            body: Arc::new(body),
            finalizer: None,
            observers: Vec::new(),
            cancel: CancelFlag::new(),
            active: None,
            deferred: Submitter::new(),
            next_id: 1,
        }
    }

    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl Finalize<R, A> + 'static) -> Self {
        self.finalizer = Some(Box::new(finalizer));
        self
    }

    /// Registers an observer. Observers are called in registration order.
    pub fn observe(&mut self, observer: impl JobObserver<R, A> + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Handle for deferred submissions.
    #[must_use]
    pub fn submitter(&self) -> Submitter<R> {
        self.deferred.clone()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_request(&self) -> Option<&R> {
        self.active.as_ref().map(|job| &job.request)
    }

    #[must_use]
    pub fn active_id(&self) -> Option<JobId> {
        self.active.as_ref().map(|job| job.id)
    }

    /// Starts `request`, superseding any active job first.
    ///
    /// If a job is running, the cancel flag is raised and this call blocks
    /// until its worker thread exits; that job is reported as
    /// `Failed(Cancelled)` before the new job's `Started` event.
    pub fn submit(&mut self, request: R) -> JobId {
        if let Some(active) = self.active.take() {
            if active.worker.is_finished() {
                // Finished before it could see the flag: its result stands.
                self.complete(active, Completion::Natural);
            } else {
                debug!(job = %active.id, "superseding active job, waiting for worker");
                self.cancel.raise();
                self.complete(active, Completion::Superseded);
                self.cancel.clear();
            }
        }
        self.start(request)
    }

    /// Marshaling point for the control thread's loop.
    ///
    /// Forwards pending progress, handles completion if the worker has exited,
    /// then starts the most recent deferred submission. Returns `true` if a
    /// job completed during this call.
    pub fn poll(&mut self) -> bool {
        let mut completed = false;

        if let Some(active) = self.active.take() {
            self.forward_progress(active.id, &active.progress);
            if active.worker.is_finished() {
                self.complete(active, Completion::Natural);
                completed = true;
            } else {
                self.active = Some(active);
            }
        }

        self.run_deferred();
        completed
    }

    /// Blocks until the active job finishes on its own and handles its
    /// completion. Deferred submissions are left for the next `poll()`.
    ///
    /// Returns `false` if nothing was running.
    pub fn wait(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        self.complete(active, Completion::Natural);
        true
    }

    /// Cancels the active job and blocks until its worker exits.
    ///
    /// Returns `false` if nothing was running.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        self.cancel.raise();
        self.complete(active, Completion::Cancelled);
        self.cancel.clear();
        true
    }

    fn start(&mut self, request: R) -> JobId {
        let id = JobId::new(self.next_id);
        self.next_id += 1;

        let label = request.label();
        info!(job = %id, label = %label, "job started");
        self.emit(&JobEvent::Started { id, label: &label });

        let (progress_tx, progress_rx) = spsc::channel();
        let ctx = JobContext {
            id,
            cancel: self.cancel.clone(),
            progress: progress_tx,
            dropped: AtomicU64::new(0),
        };
        let body = Arc::clone(&self.body);
        let worker_request = request.clone();

        let spawned = thread::Builder::new()
            .name(format!("orrery-{id}"))
            .spawn(move || run_guarded(body.as_ref(), &worker_request, &ctx));

        match spawned {
            Ok(worker) => {
                self.active = Some(ActiveJob {
                    id,
                    request,
                    worker,
                    progress: progress_rx,
                    started: Instant::now(),
                });
            }
            Err(e) => {
                error!(job = %id, error = %e, "failed to spawn worker thread");
                let error = JobError::Spawn(e);
                self.emit(&JobEvent::Failed {
                    id,
                    request: &request,
                    error: &error,
                });
            }
        }
        id
    }

    /// Joins the worker, then finalizes or reports failure. Runs exactly once per job.
    fn complete(&mut self, active: ActiveJob<R, A>, how: Completion) {
        let ActiveJob {
            id,
            request,
            worker,
            progress,
            started,
        } = active;

        let joined = worker.join();
        self.forward_progress(id, &progress);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match joined {
            Ok(result) => result,
            // run_guarded catches panics; this only fires if the unwind escaped it.
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        };
        let result = match how {
            Completion::Natural => result,
            Completion::Superseded | Completion::Cancelled => Err(JobError::Cancelled),
        };

        match result {
            Ok(mut artifact) => {
                let finalized = match self.finalizer.as_mut() {
                    Some(finalizer) => finalizer.finalize(&request, &mut artifact),
                    None => Ok(()),
                };
                match finalized {
                    Ok(()) => {
                        info!(job = %id, elapsed_ms, "job succeeded");
                        self.emit(&JobEvent::Succeeded {
                            id,
                            request: &request,
                            artifact: &artifact,
                        });
                    }
                    Err(error) => {
                        warn!(job = %id, error = %error, "job finalize failed");
                        self.emit(&JobEvent::Failed {
                            id,
                            request: &request,
                            error: &error,
                        });
                    }
                }
            }
            Err(error) => {
                if error.is_cancelled() {
                    info!(job = %id, elapsed_ms, reason = ?how, "job cancelled");
                } else {
                    warn!(job = %id, elapsed_ms, error = %error, "job failed");
                }
                self.emit(&JobEvent::Failed {
                    id,
                    request: &request,
                    error: &error,
                });
            }
        }
    }

    fn forward_progress(&mut self, id: JobId, queue: &Consumer<Progress, PROGRESS_QUEUE_CAPACITY>) {
        for progress in queue.drain() {
            self.emit(&JobEvent::Progress {
                id,
                progress: &progress,
            });
        }
    }

    fn run_deferred(&mut self) {
        let mut pending = self.deferred.take_all();
        let Some(latest) = pending.pop_back() else {
            return;
        };
        if !pending.is_empty() {
            debug!(
                dropped = pending.len(),
                "coalescing deferred submissions, keeping the latest"
            );
        }
        self.submit(latest);
    }

    fn emit(&mut self, event: &JobEvent<'_, R, A>) {
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }
}

impl<R: JobRequest, A: Send + 'static> Drop for JobCoordinator<R, A> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.cancel.raise();
            let _ = active.worker.join();
        }
    }
}

/// Worker wrapper: runs the body and keeps panics on this side of the thread
/// boundary.
fn run_guarded<R: 'static, A: 'static>(
    body: &dyn JobBody<R, A>,
    request: &R,
    ctx: &JobContext,
) -> Result<A, JobError> {
    match panic::catch_unwind(AssertUnwindSafe(|| body.run(request, ctx))) {
        Ok(Ok(artifact)) => Ok(artifact),
        Ok(Err(_)) if ctx.is_cancelled() => Err(JobError::Cancelled),
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
