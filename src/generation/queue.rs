// Music generation queue - debounced background regeneration
//
// add() overwrites a one-slot mailbox. A worker thread polls the mailbox and hands
// the latest context to the generation task:
// - no task, or the task is done: a new task starts after the pre-update buffer time
// - the task is still waiting for its buffer time: its context is swapped
// - the task is generating or cooling down: the context stays pending and is
//   retried on the next poll
//
// Only the latest context is guaranteed to be generated, older ones are dropped.

use crate::config::QueueConfig;
use crate::error::GenerationError;
use crate::generation::{GenerationResult, MusicGenerator};
use crate::listeners::{ChangeListener, ListenerId, ListenerList};
use crate::messaging::notification::{Notification, NotificationCategory, UserNotifier};
use crate::song::SongContext;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Waiting,
    Generating,
    CoolingDown,
    Done,
}

/// One scheduled generation
struct GenerationTask {
    slot: Mutex<(TaskPhase, SongContext)>,
    /// Disconnected when the task thread ends
    finished: Receiver<()>,
}

impl GenerationTask {
    fn slot(&self) -> MutexGuard<'_, (TaskPhase, SongContext)> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn phase(&self) -> TaskPhase {
        self.slot().0
    }

    fn set_phase(&self, phase: TaskPhase) {
        self.slot().0 = phase;
    }

    /// Replace the context if generation has not started yet
    fn try_update(&self, context: &SongContext) -> bool {
        let mut slot = self.slot();
        if slot.0 == TaskPhase::Waiting {
            slot.1 = context.clone();
            true
        } else {
            false
        }
    }

    /// Switch to Generating, returns the context to generate
    fn begin_generation(&self) -> SongContext {
        let mut slot = self.slot();
        slot.0 = TaskPhase::Generating;
        slot.1.clone()
    }
}

struct QueueCore {
    config: QueueConfig,
    generator: Arc<dyn MusicGenerator>,
    notifier: Arc<dyn UserNotifier>,
    mailbox: Mutex<Option<SongContext>>,
    last_added: Mutex<Option<SongContext>>,
    last_result: Mutex<Option<GenerationResult>>,
    listeners: ListenerList<ChangeListener<GenerationResult>>,
    running: AtomicBool,
}

impl QueueCore {
    fn take_mailbox(&self) -> Option<SongContext> {
        self.mailbox.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Worker loop, returns when `shutdown` is disconnected
    fn poll_loop(self: Arc<Self>, shutdown: Receiver<()>, results: Sender<GenerationResult>) {
        let mut task: Option<Arc<GenerationTask>> = None;
        let mut pending: Option<SongContext> = None;

        loop {
            match shutdown.recv_timeout(self.config.poll_interval()) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }

            if let Some(context) = self.take_mailbox() {
                pending = Some(context);
            }
            let Some(context) = pending.take() else {
                continue;
            };

            match &task {
                Some(current) if current.try_update(&context) => {
                    debug!("Generation task context updated");
                }
                Some(current) if current.phase() != TaskPhase::Done => {
                    // Busy generating or cooling down, retry on next poll
                    pending = Some(context);
                }
                _ => match self.start_task(context.clone(), shutdown.clone(), results.clone()) {
                    Ok(new_task) => task = Some(new_task),
                    Err(e) => {
                        error!("Can't start music generation task: {}", e);
                        pending = Some(context);
                    }
                },
            }
        }

        if let Some(current) = task {
            if current.phase() != TaskPhase::Done {
                match current.finished.recv_timeout(self.config.shutdown_timeout()) {
                    Err(RecvTimeoutError::Timeout) => warn!(
                        "Music generation still running {}ms after shutdown, abandoning it",
                        self.config.shutdown_timeout_ms
                    ),
                    _ => debug!("Music generation task terminated"),
                }
            }
        }
        debug!("Music generation queue worker stopped");
    }

    fn start_task(
        self: &Arc<Self>,
        context: SongContext,
        shutdown: Receiver<()>,
        results: Sender<GenerationResult>,
    ) -> std::io::Result<Arc<GenerationTask>> {
        let (finished_tx, finished_rx) = bounded::<()>(0);
        let task = Arc::new(GenerationTask {
            slot: Mutex::new((TaskPhase::Waiting, context)),
            finished: finished_rx,
        });
        let core = Arc::clone(self);
        let thread_task = Arc::clone(&task);
        std::thread::Builder::new()
            .name("music-generation".to_string())
            .spawn(move || {
                let _finished = finished_tx;
                core.run_task(&thread_task, &shutdown, &results);
                thread_task.set_phase(TaskPhase::Done);
            })?;
        Ok(task)
    }

    fn run_task(&self, task: &GenerationTask, shutdown: &Receiver<()>, results: &Sender<GenerationResult>) {
        // Pre-update buffer: absorbs bursts of changes
        if !matches!(
            shutdown.recv_timeout(self.config.pre_update_buffer_time()),
            Err(RecvTimeoutError::Timeout)
        ) {
            return;
        }

        let context = task.begin_generation();
        debug!("Generating music for context {:?}", context.bar_range());
        let result = self.generate(context);

        if let Ok(mut last) = self.last_result.lock() {
            *last = Some(result.clone());
        }
        if results.send(result).is_err() {
            debug!("Generation result listeners are gone");
        }

        // Cool down before the next generation
        task.set_phase(TaskPhase::CoolingDown);
        let _ = shutdown.recv_timeout(self.config.post_update_sleep_time());
    }

    fn generate(&self, context: SongContext) -> GenerationResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.generator.generate(&context)));
        match outcome {
            Ok(Ok(phrases)) => {
                info!("Music generated: {} phrase(s)", phrases.len());
                GenerationResult::success(context, phrases)
            }
            Ok(Err(e @ GenerationError::UserFacing(_))) => {
                warn!("Music generation failed: {}", e);
                GenerationResult::failure(context, e)
            }
            Ok(Err(e)) => self.unexpected_failure(context, e),
            Err(payload) => {
                let e = GenerationError::Internal(panic_message(payload.as_ref()));
                self.unexpected_failure(context, e)
            }
        }
    }

    fn unexpected_failure(&self, context: SongContext, e: GenerationError) -> GenerationResult {
        error!("Unexpected music generation failure: {}", e);
        self.notifier
            .notify(Notification::error(NotificationCategory::Generation, e.to_string()).blocking());
        GenerationResult::failure(context, e)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "generator panicked".to_string()
    }
}

struct Workers {
    shutdown: Sender<()>,
    poller: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Debounced single-writer music generation pipeline
pub struct MusicGenerationQueue {
    core: Arc<QueueCore>,
    workers: Mutex<Option<Workers>>,
}

impl MusicGenerationQueue {
    pub fn new(config: QueueConfig, generator: Arc<dyn MusicGenerator>, notifier: Arc<dyn UserNotifier>) -> Self {
        Self {
            core: Arc::new(QueueCore {
                config,
                generator,
                notifier,
                mailbox: Mutex::new(None),
                last_added: Mutex::new(None),
                last_result: Mutex::new(None),
                listeners: ListenerList::new(),
                running: AtomicBool::new(false),
            }),
            workers: Mutex::new(None),
        }
    }

    /// Start the worker thread. No-op if already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if workers.is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (results_tx, results_rx) = unbounded::<GenerationResult>();

        // Listeners are notified on their own thread, never on the worker
        let core = Arc::clone(&self.core);
        let dispatcher = std::thread::Builder::new()
            .name("generation-listeners".to_string())
            .spawn(move || {
                for result in results_rx {
                    core.listeners.for_each(|l| l(&result));
                }
            })?;

        let core = Arc::clone(&self.core);
        let poller = std::thread::Builder::new()
            .name("generation-queue".to_string())
            .spawn(move || core.poll_loop(shutdown_rx, results_tx))?;

        self.core.running.store(true, Ordering::Release);
        *workers = Some(Workers {
            shutdown: shutdown_tx,
            poller,
            dispatcher,
        });
        debug!("Music generation queue started");
        Ok(())
    }

    /// Stop the queue without blocking the caller.
    ///
    /// A task in its pre-update buffer time is cancelled, a running generation is
    /// given the configured shutdown timeout to complete.
    pub fn stop(&self) {
        let workers = self.workers.lock().ok().and_then(|mut w| w.take());
        self.core.running.store(false, Ordering::Release);
        let Some(workers) = workers else {
            return;
        };
        drop(workers.shutdown);

        let spawned = std::thread::Builder::new()
            .name("generation-shutdown".to_string())
            .spawn(move || {
                if workers.poller.join().is_err() {
                    error!("Music generation worker panicked");
                }
                if workers.dispatcher.join().is_err() {
                    error!("Generation listener thread panicked");
                }
                debug!("Music generation queue stopped");
            });
        if let Err(e) = spawned {
            warn!("Can't spawn shutdown thread, worker threads left detached: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    /// Request a generation for `context`, overwriting any unprocessed request
    pub fn add(&self, context: SongContext) {
        if let Ok(mut last) = self.core.last_added.lock() {
            *last = Some(context.clone());
        }
        if let Ok(mut slot) = self.core.mailbox.lock() {
            *slot = Some(context);
        }
    }

    /// True if the queue is running and the last added context has no result yet
    pub fn is_generating_music(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let last_added = self.core.last_added.lock().ok().and_then(|l| l.clone());
        let Some(last_added) = last_added else {
            return false;
        };
        let last_result = self.last_result();
        last_result.is_none_or(|r| r.song_context != last_added)
    }

    pub fn last_result(&self) -> Option<GenerationResult> {
        self.core.last_result.lock().ok().and_then(|r| r.clone())
    }

    pub fn add_change_listener(&self, listener: Arc<ChangeListener<GenerationResult>>) -> ListenerId {
        self.core.listeners.add(listener)
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }
}

impl Drop for MusicGenerationQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
