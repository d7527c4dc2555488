//! Marshalling work onto the controller thread.
//!
//! The document object model may only be touched from one thread. Every other
//! thread (HTTP connection tasks, model-stream tasks) hands a closure to
//! [`ControllerDispatch`], which queues it, pokes the controller once, and
//! waits for the result with a deadline. The controller drains exactly one item
//! per poke through [`ControllerDispatch::process_one`].

use crate::error::DispatchError;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Identity of an OS thread, compared explicitly rather than via thread-locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadIdentity(ThreadId);

impl ThreadIdentity {
    pub fn current() -> Self {
        Self(thread::current().id())
    }

    pub fn is_current(&self) -> bool {
        *self == Self::current()
    }
}

/// Asks the host event loop to call [`ControllerDispatch::process_one`] once.
///
/// Implementations must be cheap and non-blocking; `poke` is called from
/// arbitrary threads while the caller is about to wait.
pub trait ControllerWaker: Send + Sync {
    fn poke(&self);
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A queued closure. Its completion channel lives inside the job, so dropping
/// an unrun item wakes the waiting caller with `Disconnected`.
struct WorkItem {
    seq: u64,
    job: Job,
}

struct Binding {
    controller: ThreadIdentity,
    waker: Arc<dyn ControllerWaker>,
}

enum Route {
    Direct,
    Degraded,
    Queued(Arc<dyn ControllerWaker>),
}

/// FIFO work queue bound to a single controller thread.
pub struct ControllerDispatch {
    queue: Mutex<VecDeque<WorkItem>>,
    binding: RwLock<Option<Binding>>,
    next_seq: AtomicU64,
}

impl Default for ControllerDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerDispatch {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            binding: RwLock::new(None),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Bind to the calling thread as the controller.
    pub fn attach(&self, waker: Arc<dyn ControllerWaker>) {
        let controller = ThreadIdentity::current();
        let mut binding = self.binding.write().unwrap_or_else(|e| e.into_inner());
        if binding.is_some() {
            warn!("controller dispatch re-attached; previous binding replaced");
        }
        *binding = Some(Binding { controller, waker });
        debug!(?controller, "controller dispatch attached");
    }

    /// Drop the controller binding. Queued items that never ran are discarded
    /// and their callers observe `DispatchError::Disconnected`.
    pub fn detach(&self) {
        self.binding
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let orphaned: Vec<WorkItem> = self.lock_queue().drain(..).collect();
        if !orphaned.is_empty() {
            warn!(
                count = orphaned.len(),
                "controller detached with queued work; dropping it"
            );
        }
        drop(orphaned);
        debug!("controller dispatch detached");
    }

    pub fn is_attached(&self) -> bool {
        self.binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Number of queued items not yet processed.
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Run `f` on the controller thread and block until it returns or
    /// `timeout` elapses.
    ///
    /// Called on the controller thread, `f` runs inline. When no controller is
    /// attached, `f` runs on the calling thread.
    pub fn dispatch<F, T>(&self, f: F, timeout: Duration) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let waker = match self.route() {
            Route::Direct => return run_captured(f),
            Route::Degraded => {
                warn!("no controller thread attached; running work on the calling thread");
                return run_captured(f);
            }
            Route::Queued(waker) => waker,
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let seq = self.enqueue(Box::new(move || {
            // Receiver gone means the caller already timed out.
            let _ = tx.send(run_captured(f));
        }));
        waker.poke();

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(seq, ?timeout, "dispatch timed out; work item stays queued");
                Err(DispatchError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Disconnected),
        }
    }

    /// Async flavour of [`dispatch`](Self::dispatch) for tokio callers.
    pub async fn dispatch_async<F, T>(&self, f: F, timeout: Duration) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let waker = match self.route() {
            Route::Direct => return run_captured(f),
            Route::Degraded => {
                warn!("no controller thread attached; running work on the calling task");
                return run_captured(f);
            }
            Route::Queued(waker) => waker,
        };

        let (tx, rx) = oneshot::channel();
        let seq = self.enqueue(Box::new(move || {
            let _ = tx.send(run_captured(f));
        }));
        waker.poke();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DispatchError::Disconnected),
            Err(_) => {
                warn!(seq, ?timeout, "dispatch timed out; work item stays queued");
                Err(DispatchError::Timeout(timeout))
            }
        }
    }

    /// Pop and run exactly one queued item. Returns whether one was run.
    ///
    /// Must be called on the controller thread.
    pub fn process_one(&self) -> bool {
        let item = self.lock_queue().pop_front();
        let Some(item) = item else {
            return false;
        };
        debug!(seq = item.seq, "processing work item");
        (item.job)();
        true
    }

    fn route(&self) -> Route {
        let binding = self.binding.read().unwrap_or_else(|e| e.into_inner());
        match binding.as_ref() {
            None => Route::Degraded,
            Some(b) if b.controller.is_current() => Route::Direct,
            Some(b) => Route::Queued(Arc::clone(&b.waker)),
        }
    }

    fn enqueue(&self, job: Job) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.lock_queue().push_back(WorkItem { seq, job });
        seq
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        // Jobs never run under this lock, so poisoning cannot leave it torn.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn run_captured<F, T>(f: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| DispatchError::Panicked(panic_message(payload.as_ref())))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Dedicated controller thread
// ---------------------------------------------------------------------------

enum Signal {
    Poke,
    Shutdown,
}

struct ChannelWaker {
    tx: Mutex<mpsc::Sender<Signal>>,
}

impl ControllerWaker for ChannelWaker {
    fn poke(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.send(Signal::Poke).is_err() {
            debug!("controller thread gone; poke dropped");
        }
    }
}

/// A std thread that stands in for the host application's event loop.
pub struct ControllerThread {
    tx: mpsc::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl ControllerThread {
    /// Spawn the thread and wait until it has attached to `dispatch`.
    pub fn spawn(dispatch: Arc<ControllerDispatch>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let waker = Arc::new(ChannelWaker {
            tx: Mutex::new(tx.clone()),
        });
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("docbridge-controller".into())
            .spawn(move || {
                dispatch.attach(waker);
                let _ = ready_tx.send(());
                while let Ok(signal) = rx.recv() {
                    match signal {
                        Signal::Poke => {
                            dispatch.process_one();
                        }
                        Signal::Shutdown => break,
                    }
                }
                dispatch.detach();
            })?;

        if ready_rx.recv().is_err() {
            return Err(std::io::Error::other(
                "controller thread exited before attaching",
            ));
        }
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Detach and join the thread. Pokes already queued are handled first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Signal::Shutdown);
        if handle.join().is_err() {
            warn!("controller thread panicked during shutdown");
        }
    }
}

impl Drop for ControllerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Instant;

    struct CountingWaker {
        pokes: AtomicUsize,
    }

    impl ControllerWaker for CountingWaker {
        fn poke(&self) {
            self.pokes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn_controller() -> (Arc<ControllerDispatch>, ControllerThread) {
        let dispatch = Arc::new(ControllerDispatch::new());
        let controller = ControllerThread::spawn(Arc::clone(&dispatch)).unwrap();
        (dispatch, controller)
    }

    #[test]
    fn dispatch_runs_on_controller_thread() {
        let (dispatch, _controller) = spawn_controller();
        let caller = ThreadIdentity::current();
        let ran_on = dispatch
            .dispatch(ThreadIdentity::current, Duration::from_secs(2))
            .unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn dispatch_from_controller_thread_runs_inline() {
        let (dispatch, _controller) = spawn_controller();
        let inner = Arc::clone(&dispatch);
        let nested = dispatch
            .dispatch(
                move || {
                    let outer = ThreadIdentity::current();
                    let inner_id = inner
                        .dispatch(ThreadIdentity::current, Duration::from_millis(50))
                        .unwrap();
                    outer == inner_id
                },
                Duration::from_secs(2),
            )
            .unwrap();
        assert!(nested, "re-entrant dispatch must not queue behind itself");
    }

    #[test]
    fn unattached_dispatch_runs_on_caller() {
        let dispatch = ControllerDispatch::new();
        assert!(!dispatch.is_attached());
        let caller = ThreadIdentity::current();
        let ran_on = dispatch
            .dispatch(ThreadIdentity::current, Duration::from_millis(10))
            .unwrap();
        assert_eq!(ran_on, caller);
    }

    #[test]
    fn timeout_leaves_orphan_that_still_runs() {
        let (dispatch, _controller) = spawn_controller();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let started = Instant::now();
        let err = dispatch
            .dispatch(
                move || {
                    thread::sleep(Duration::from_millis(150));
                    flag.store(true, Ordering::SeqCst);
                },
                Duration::from_millis(20),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_millis(140));

        // The next item queues behind the orphan, so it observes its effect.
        let observed = {
            let flag = Arc::clone(&finished);
            dispatch
                .dispatch(move || flag.load(Ordering::SeqCst), Duration::from_secs(2))
                .unwrap()
        };
        assert!(observed);
    }

    #[test]
    fn panic_in_work_is_reported_not_fatal() {
        let (dispatch, _controller) = spawn_controller();
        let err = dispatch
            .dispatch(|| -> u32 { panic!("document exploded") }, Duration::from_secs(2))
            .unwrap_err();
        match err {
            DispatchError::Panicked(msg) => assert!(msg.contains("document exploded")),
            other => panic!("unexpected: {other:?}"),
        }
        // Controller survives.
        assert_eq!(dispatch.dispatch(|| 7, Duration::from_secs(2)).unwrap(), 7);
    }

    #[test]
    fn process_one_runs_exactly_one_item_in_fifo_order() {
        let dispatch = Arc::new(ControllerDispatch::new());
        let waker = Arc::new(CountingWaker {
            pokes: AtomicUsize::new(0),
        });
        // The test thread is the controller.
        dispatch.attach(waker.clone());

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut callers = Vec::new();
        for n in 0..2 {
            let d = Arc::clone(&dispatch);
            let order = Arc::clone(&order);
            callers.push(thread::spawn(move || {
                d.dispatch(move || order.lock().unwrap().push(n), Duration::from_secs(5))
            }));
            // Serialize enqueue order.
            while dispatch.pending() != n + 1 {
                thread::sleep(Duration::from_millis(1));
            }
        }

        assert_eq!(waker.pokes.load(Ordering::SeqCst), 2);
        assert!(dispatch.process_one());
        assert_eq!(dispatch.pending(), 1);
        assert!(dispatch.process_one());
        assert!(!dispatch.process_one());

        for caller in callers {
            caller.join().unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn detach_disconnects_queued_callers() {
        let dispatch = Arc::new(ControllerDispatch::new());
        dispatch.attach(Arc::new(CountingWaker {
            pokes: AtomicUsize::new(0),
        }));
        let d = Arc::clone(&dispatch);
        let caller = thread::spawn(move || d.dispatch(|| 1, Duration::from_secs(5)));
        while dispatch.pending() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        dispatch.detach();
        let err = caller.join().unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::Disconnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatch_async_round_trip_and_timeout() {
        let (dispatch, _controller) = spawn_controller();
        let value = dispatch
            .dispatch_async(|| "done", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(value, "done");

        let err = dispatch
            .dispatch_async(
                || thread::sleep(Duration::from_millis(200)),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }

    #[test]
    fn shutdown_detaches() {
        let (dispatch, controller) = spawn_controller();
        assert!(dispatch.is_attached());
        controller.shutdown();
        assert!(!dispatch.is_attached());
    }
}
