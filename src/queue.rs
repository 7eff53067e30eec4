use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, QueueConfig};
use crate::dispatch::CompletionProvider;
use crate::dispatch::http::HttpDispatch;
use crate::error::SyllabusError;
use crate::extract::{Extraction, ExtractionRequest, ExtractorSettings, StructuredExtractor};

type Outcome = Result<Extraction, SyllabusError>;

/// Limits the dispatch loop enforces. Both the rolling-window quota and the
/// spacing apply at once; the effective wait is the larger of the two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatePolicy {
    pub max_per_window: u32,
    pub window: Duration,
    pub min_spacing: Duration,
    /// Bound on one dispatched extraction, all attempts included.
    pub dispatch_timeout: Option<Duration>,
}

impl RatePolicy {
    pub fn new(
        max_per_window: u32,
        window: Duration,
        min_spacing: Duration,
        dispatch_timeout: Option<Duration>,
    ) -> Result<Self, SyllabusError> {
        let policy = Self {
            max_per_window,
            window,
            min_spacing,
            dispatch_timeout,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A zero quota never dispatches and a zero window never limits.
    pub fn validate(&self) -> Result<(), SyllabusError> {
        if self.max_per_window == 0 {
            return Err(SyllabusError::Config(
                "rate policy max_per_window must be at least 1".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(SyllabusError::Config("rate policy window must be non-zero".into()));
        }
        Ok(())
    }
}

impl From<&QueueConfig> for RatePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_per_window: config.max_per_window,
            window: config.window(),
            min_spacing: config.min_spacing(),
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// Recent dispatch instants, enough of them to enforce the quota over any
/// trailing `window`.
#[derive(Debug, Default)]
pub struct RateWindow {
    recent: VecDeque<Instant>,
    last_dispatch: Option<Instant>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches within the trailing window ending at `now`.
    pub fn count(&self, now: Instant, policy: &RatePolicy) -> u32 {
        self.recent
            .iter()
            .filter(|at| **at + policy.window > now)
            .count() as u32
    }

    /// When the oldest tracked dispatch leaves the window.
    pub fn next_expiry(&self, policy: &RatePolicy) -> Option<Instant> {
        self.recent.front().map(|at| *at + policy.window)
    }

    /// Drop dispatches that have left the window. Returns how many did.
    pub fn expire(&mut self, now: Instant, policy: &RatePolicy) -> usize {
        let before = self.recent.len();
        while self.recent.front().is_some_and(|at| *at + policy.window <= now) {
            self.recent.pop_front();
        }
        before - self.recent.len()
    }

    /// Time until both the spacing and the quota allow another dispatch.
    pub fn required_wait(&self, now: Instant, policy: &RatePolicy) -> Duration {
        let spacing = self
            .last_dispatch
            .map(|last| (last + policy.min_spacing).saturating_duration_since(now))
            .unwrap_or_default();
        let max = policy.max_per_window as usize;
        // the dispatch `max` places back has to leave the window first
        let quota = match self.recent.len().checked_sub(max) {
            Some(idx) if max > 0 => {
                (self.recent[idx] + policy.window).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        };
        spacing.max(quota)
    }

    pub fn record(&mut self, now: Instant, policy: &RatePolicy) {
        self.recent.push_back(now);
        while self.recent.len() > policy.max_per_window.max(1) as usize {
            self.recent.pop_front();
        }
        self.last_dispatch = Some(now);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Nothing queued.
    Idle,
    /// Head of the queue is held back by the rate policy.
    Waiting,
    /// A request is with the extractor.
    Dispatching,
    /// Shut down; no further dispatches.
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub requests_this_window: u32,
    pub state: QueueState,
}

struct QueueEntry {
    seq: u64,
    request: ExtractionRequest,
    reply: oneshot::Sender<Outcome>,
    submitted_at: Instant,
}

/// Handle to a submitted request. Resolves once its dispatch finishes.
#[derive(Debug)]
pub struct Pending {
    seq: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl Pending {
    /// Submission order, starting at 0.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Future for Pending {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(SyllabusError::QueueClosed)))
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<QueueEntry>,
    queued: Arc<AtomicUsize>,
    next_seq: AtomicU64,
    status: watch::Receiver<QueueStatus>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Shared FIFO intake in front of a single [`StructuredExtractor`].
///
/// Any number of callers may `submit` concurrently; one background task
/// dispatches entries strictly in arrival order, one at a time, within the
/// [`RatePolicy`]. Clones share the same queue. Dropping the last clone
/// closes intake the same way [`RequestSerializer::shutdown`] does.
#[derive(Clone)]
pub struct RequestSerializer {
    inner: Arc<Inner>,
}

impl RequestSerializer {
    /// Spawn the dispatch task. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// `Config` when the policy has a zero quota or a zero window.
    pub fn new<P>(
        extractor: StructuredExtractor<P>,
        policy: RatePolicy,
    ) -> Result<Self, SyllabusError>
    where
        P: CompletionProvider + 'static,
    {
        policy.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(QueueStatus {
            queue_length: 0,
            requests_this_window: 0,
            state: QueueState::Idle,
        });

        let dispatcher = Dispatcher {
            extractor,
            window: RateWindow::new(),
            policy,
            rx,
            queue: VecDeque::new(),
            queued: queued.clone(),
            status: status_tx,
            shutdown: shutdown.clone(),
            closing: false,
        };
        tokio::spawn(dispatcher.run());

        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                queued,
                next_seq: AtomicU64::new(0),
                status: status_rx,
                shutdown,
            }),
        })
    }

    /// HTTP provider, extractor settings and rate policy all from `config`.
    pub fn from_config(config: &Config) -> Result<Self, SyllabusError> {
        let dispatch = HttpDispatch::new(config.provider.clone())?;
        let extractor = StructuredExtractor::new(dispatch, ExtractorSettings::from_config(config));
        Self::new(extractor, RatePolicy::from(&config.queue))
    }

    /// Enqueue without blocking. The returned handle resolves to the
    /// extractor's outcome, a transport error or a dispatch timeout. Only a
    /// submit made after shutdown resolves to `QueueClosed`.
    pub fn submit(&self, request: ExtractionRequest) -> Pending {
        let (reply, rx) = oneshot::channel();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);

        if self.inner.shutdown.is_cancelled() {
            // `reply` drops here, closing `rx`
            tracing::warn!(seq, "submit after request queue shut down");
            return Pending { seq, rx };
        }

        let queue_length = self.inner.queued.fetch_add(1, Ordering::AcqRel) + 1;
        let entry = QueueEntry {
            seq,
            request,
            reply,
            submitted_at: Instant::now(),
        };
        if self.inner.tx.send(entry).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(seq, "submit after request queue shut down");
        } else {
            tracing::debug!(seq, queue_length, "enqueued extraction request");
        }

        Pending { seq, rx }
    }

    pub fn status(&self) -> QueueStatus {
        let mut status = self.inner.status.borrow().clone();
        status.queue_length = self.inner.queued.load(Ordering::Acquire);
        status
    }

    /// Stop accepting submissions and stop the idle expiry timer. Entries
    /// already accepted are still dispatched in order under the rate policy;
    /// the task exits once they are done.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

enum Event {
    Submitted(Option<QueueEntry>),
    Tick,
    Shutdown,
}

struct Dispatcher<P> {
    extractor: StructuredExtractor<P>,
    window: RateWindow,
    policy: RatePolicy,
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    queue: VecDeque<QueueEntry>,
    queued: Arc<AtomicUsize>,
    status: watch::Sender<QueueStatus>,
    shutdown: CancellationToken,
    /// Intake closed; drain what was accepted, then exit.
    closing: bool,
}

impl<P: CompletionProvider> Dispatcher<P> {
    async fn run(mut self) {
        tracing::debug!(policy = ?self.policy, "request queue started");

        loop {
            // still yields buffered entries after `close`
            while let Ok(entry) = self.rx.try_recv() {
                self.queue.push_back(entry);
            }

            let freed = self.window.expire(Instant::now(), &self.policy);
            if freed > 0 {
                tracing::debug!(freed, "rate window slots freed");
            }

            if self.queue.is_empty() {
                if self.closing {
                    break;
                }
                self.publish(QueueState::Idle);
                let expiry = self.window.next_expiry(&self.policy);
                let event = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Event::Shutdown,
                    entry = self.rx.recv() => Event::Submitted(entry),
                    _ = tokio::time::sleep_until(expiry.unwrap_or_else(Instant::now)),
                        if expiry.is_some() => Event::Tick,
                };
                self.absorb(event);
                continue;
            }

            let wait = self.window.required_wait(Instant::now(), &self.policy);
            if !wait.is_zero() {
                self.publish(QueueState::Waiting);
                tracing::debug!(
                    wait_ms = wait.as_millis() as u64,
                    queue_length = self.queue.len(),
                    "rate limit reached, holding dispatch"
                );
                let closing = self.closing;
                let event = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled(), if !closing => Event::Shutdown,
                    entry = self.rx.recv(), if !closing => Event::Submitted(entry),
                    _ = tokio::time::sleep(wait) => Event::Tick,
                };
                self.absorb(event);
                continue;
            }

            let Some(entry) = self.queue.pop_front() else {
                continue;
            };
            self.queued.fetch_sub(1, Ordering::AcqRel);
            self.window.record(Instant::now(), &self.policy);
            self.publish(QueueState::Dispatching);
            self.dispatch(entry).await;

            tokio::task::yield_now().await;
        }

        self.publish(QueueState::Stopped);
        tracing::info!("request queue stopped");
    }

    fn absorb(&mut self, event: Event) {
        match event {
            Event::Submitted(Some(entry)) => self.queue.push_back(entry),
            Event::Tick => {}
            Event::Submitted(None) | Event::Shutdown => self.close_intake(),
        }
    }

    fn close_intake(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.rx.close();
        tracing::info!(
            queue_length = self.queued.load(Ordering::Acquire),
            "request queue closing, draining accepted requests"
        );
    }

    async fn dispatch(&self, entry: QueueEntry) {
        let QueueEntry {
            seq,
            request,
            reply,
            submitted_at,
        } = entry;

        tracing::info!(
            seq,
            waited_ms = submitted_at.elapsed().as_millis() as u64,
            remaining = self.queue.len(),
            window_count = self.window.count(Instant::now(), &self.policy),
            "dispatching extraction request"
        );

        let outcome = match self.policy.dispatch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.extractor.extract(&request))
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(seq, limit_ms = limit.as_millis() as u64, "dispatch timed out");
                    Err(SyllabusError::Timeout(limit.as_millis() as u64))
                }),
            None => self.extractor.extract(&request).await,
        };

        match &outcome {
            Ok(Extraction::Data(_)) => tracing::debug!(seq, "request processed"),
            Ok(Extraction::Empty { attempts, .. }) => {
                tracing::warn!(seq, attempts, "request produced no usable output")
            }
            Err(e) => tracing::warn!(seq, error = %e, "request failed"),
        }

        if reply.send(outcome).is_err() {
            tracing::debug!(seq, "caller dropped before result delivery");
        }
    }

    fn publish(&self, state: QueueState) {
        self.status.send_replace(QueueStatus {
            queue_length: self.queued.load(Ordering::Acquire),
            requests_this_window: self.window.count(Instant::now(), &self.policy),
            state,
        });
    }
}
