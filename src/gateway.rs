//! Async execution gateway.
//!
//! Game hosts call the store from their main thread and must never block on
//! the database. The gateway runs every operation on a background tokio
//! runtime and hands back a [`StoreFuture`]. A host that wants its
//! continuation back on the main thread passes a [`HostExecutor`] to
//! [`StoreFuture::then_on`].

use crate::config::GatewayConfig;
use crate::error::{StoreError, StoreResult};
use crate::repository::Repository;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// A continuation queued for the host's own thread.
pub type HostTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs continuations on the host's thread of choice.
pub trait HostExecutor: Send + Sync + 'static {
    fn execute(&self, task: HostTask);
}

impl<T: HostExecutor + ?Sized> HostExecutor for Arc<T> {
    fn execute(&self, task: HostTask) {
        (**self).execute(task)
    }
}

/// Unbounded queue the host drains on its own tick with [`HostQueue::run_pending`].
pub struct HostQueue {
    tx: mpsc::UnboundedSender<HostTask>,
    rx: Mutex<mpsc::UnboundedReceiver<HostTask>>,
}

impl HostQueue {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Run everything queued so far on the calling thread. Tasks queued while
    /// this runs wait for the next call.
    pub fn run_pending(&self) -> usize {
        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| {
            warn!("Host queue lock poisoned by a panicking thread, recovering");
            poisoned.into_inner()
        });
        let tasks: Vec<HostTask> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        drop(rx);
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }
}

impl HostExecutor for HostQueue {
    fn execute(&self, task: HostTask) {
        if self.tx.send(task).is_err() {
            warn!("Host queue closed, dropping continuation");
        }
    }
}

/// Result of a submitted operation.
///
/// Dropping it discards the result; the operation still runs to completion.
#[must_use = "dropping a StoreFuture discards the operation's result"]
pub struct StoreFuture<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
    handle: Handle,
}

impl<T: Send + 'static> StoreFuture<T> {
    fn ready(result: StoreResult<T>, handle: Handle) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx, handle }
    }

    /// Block the calling thread until the result is ready.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> StoreResult<T> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(StoreError::ShuttingDown))
    }

    /// Deliver the result to `callback` on the host's executor.
    pub fn then_on<H, F>(self, host: &Arc<H>, callback: F)
    where
        H: HostExecutor + ?Sized,
        F: FnOnce(StoreResult<T>) + Send + 'static,
    {
        let host = host.clone();
        let handle = self.handle.clone();
        handle.spawn(async move {
            let result = self.await;
            host.execute(Box::new(move || callback(result)));
        });
    }
}

impl<T> Future for StoreFuture<T> {
    type Output = StoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StoreError::ShuttingDown)))
    }
}

/// Decrements the submitted-work counter when the task finishes or panics.
struct InFlight(Arc<watch::Sender<usize>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct AsyncGateway {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    permits: Arc<Semaphore>,
    submitted: Arc<watch::Sender<usize>>,
    accepting: AtomicBool,
}

impl AsyncGateway {
    /// Gateway with its own multi-thread runtime.
    pub fn with_runtime(config: &GatewayConfig) -> StoreResult<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("lore-store-worker")
            .enable_all()
            .build()
            .map_err(|e| StoreError::configuration(format!("failed to start runtime: {e}")))?;
        info!(
            worker_threads = config.worker_threads.max(1),
            max_in_flight = config.max_in_flight.max(1),
            "Store gateway runtime started"
        );
        let gateway = Self::build(runtime.handle().clone(), config.max_in_flight, Some(runtime));
        Ok(Arc::new(gateway))
    }

    /// Gateway over a runtime the host already owns.
    pub fn on_handle(handle: Handle, max_in_flight: u32) -> Arc<Self> {
        Arc::new(Self::build(handle, max_in_flight, None))
    }

    fn build(handle: Handle, max_in_flight: u32, runtime: Option<Runtime>) -> Self {
        let (submitted, _) = watch::channel(0usize);
        Self {
            handle,
            runtime: Mutex::new(runtime),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1) as usize)),
            submitted: Arc::new(submitted),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Operations submitted and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        *self.submitted.borrow()
    }

    /// Run `operation` in the background. At most `max_in_flight`
    /// operations execute at once; the rest wait for a permit.
    pub fn submit<T, F>(&self, operation: F) -> StoreFuture<T>
    where
        T: Send + 'static,
        F: Future<Output = StoreResult<T>> + Send + 'static,
    {
        // Count first so drain() never misses work that got past the check
        self.submitted.send_modify(|n| *n += 1);
        let guard = InFlight(self.submitted.clone());
        if !self.is_accepting() {
            drop(guard);
            return StoreFuture::ready(Err(StoreError::ShuttingDown), self.handle.clone());
        }

        let (tx, rx) = oneshot::channel();
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _guard = guard;
            let result = match permits.acquire_owned().await {
                Ok(_permit) => operation.await,
                Err(_) => Err(StoreError::ShuttingDown),
            };
            if tx.send(result).is_err() {
                debug!("Store result dropped by caller");
            }
        });

        StoreFuture {
            rx,
            handle: self.handle.clone(),
        }
    }

    /// Block the calling thread on `future` using the gateway's runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Stop accepting work and wait for everything already submitted.
    pub async fn drain(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        let pending = self.in_flight();
        if pending > 0 {
            info!(pending, "Draining store gateway");
        }
        let mut submitted = self.submitted.subscribe();
        if submitted.wait_for(|n| *n == 0).await.is_err() {
            warn!("Gateway counter closed while draining");
        }
        self.permits.close();
        debug!("Store gateway drained");
    }
}

impl std::fmt::Debug for AsyncGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncGateway")
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl Drop for AsyncGateway {
    fn drop(&mut self) {
        if let Ok(mut runtime) = self.runtime.lock() {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// A repository whose operations run on the gateway.
pub struct AsyncRepository<R> {
    repo: Arc<R>,
    gateway: Arc<AsyncGateway>,
}

impl<R> Clone for AsyncRepository<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

impl<R> AsyncRepository<R>
where
    R: Repository + 'static,
    R::Record: 'static,
    R::Id: 'static,
{
    pub fn new(repo: Arc<R>, gateway: Arc<AsyncGateway>) -> Self {
        Self { repo, gateway }
    }

    /// The synchronous-async repository, for callers already on a runtime.
    pub fn inner(&self) -> &Arc<R> {
        &self.repo
    }

    /// Run a repository-specific operation on the gateway.
    pub fn call<T, F, Fut>(&self, operation: F) -> StoreFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<R>) -> Fut,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        self.gateway.submit(operation(self.repo.clone()))
    }

    pub fn find_by_id(&self, id: R::Id) -> StoreFuture<Option<R::Record>> {
        self.call(move |repo| async move { repo.find_by_id(&id).await })
    }

    pub fn find_all(&self) -> StoreFuture<Vec<R::Record>> {
        self.call(|repo| async move { repo.find_all().await })
    }

    pub fn search(&self, text: impl Into<String>) -> StoreFuture<Vec<R::Record>> {
        let text = text.into();
        self.call(move |repo| async move { repo.search(&text).await })
    }

    pub fn save(&self, record: R::Record) -> StoreFuture<R::Id> {
        self.call(move |repo| async move { repo.save(&record).await })
    }

    pub fn delete(&self, id: R::Id) -> StoreFuture<bool> {
        self.call(move |repo| async move { repo.delete(&id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_submit_and_wait() {
        let gateway = AsyncGateway::with_runtime(&GatewayConfig::default()).unwrap();
        let result = gateway.submit(async { Ok(21 * 2) }).wait().unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_host_queue_survives_poisoned_lock() {
        let queue = HostQueue::new();
        let poisoner = queue.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.rx.lock().unwrap();
            panic!("host thread died while draining");
        })
        .join();
        assert!(queue.rx.is_poisoned());

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            queue.execute(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_then_on_runs_on_host_queue() {
        let gateway = AsyncGateway::with_runtime(&GatewayConfig::default()).unwrap();
        let queue = HostQueue::new();
        let (tx, rx) = std::sync::mpsc::channel();

        gateway
            .submit(async { Ok("gate") })
            .then_on(&queue, move |result| {
                tx.send(result.unwrap()).unwrap();
            });

        // Nothing runs until the host ticks
        let mut ran = 0;
        for _ in 0..200 {
            ran += queue.run_pending();
            if ran > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ran, 1);
        assert_eq!(rx.try_recv().unwrap(), "gate");
    }

    #[tokio::test]
    async fn test_drain_waits_then_rejects() {
        let gateway = AsyncGateway::on_handle(Handle::current(), 2);
        let finished = Arc::new(AtomicUsize::new(0));

        let mut futures = Vec::new();
        for _ in 0..5 {
            let finished = finished.clone();
            futures.push(gateway.submit(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        gateway.drain().await;
        assert_eq!(finished.load(Ordering::SeqCst), 5);
        assert_eq!(gateway.in_flight(), 0);
        for future in futures {
            assert!(future.await.is_ok());
        }

        let rejected = gateway.submit(async { Ok(()) }).await;
        assert!(matches!(rejected, Err(StoreError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_max_in_flight_is_respected() {
        let gateway = AsyncGateway::on_handle(Handle::current(), 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                gateway.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for future in futures {
            future.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
