//! Request/response correlation over the multiplexed gateway connection.
//!
//! Every outbound request gets a correlation id and a pending slot holding
//! its accumulator. Events carrying that id are fed to the accumulator until
//! it reports completion, an end marker arrives, the grace window lets it
//! settle on partial data, or the deadline fires. The slot is removed from
//! the pending map under the lock before it resolves, so each request
//! resolves exactly once and late duplicates fall through as no-ops.
//!
//! A drop guard owns the cleanup: whatever way the caller's future ends
//! (resolution, error, timeout, or being dropped) the slot is removed and
//! the registered cancel request is sent to release the gateway-side
//! subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{classify, IbError, Notice, Result};
use crate::protocol::{GatewayEvent, GatewayRequest, RequestId, FIRST_REQUEST_ID};
use crate::transport::Outbound;

/// What an accumulator wants after seeing an event.
#[derive(Debug)]
pub enum Step {
    Continue,
    Done,
    Fail(IbError),
}

/// Why a pending request is being finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// End marker, or the accumulator declared itself complete.
    Terminal,
    /// Deadline elapsed first.
    TimedOut {
        req_id: RequestId,
        request: &'static str,
    },
}

impl Completion {
    /// Error to return when a timed-out request has nothing to show.
    pub fn timeout_error(self) -> Option<IbError> {
        match self {
            Self::Terminal => None,
            Self::TimedOut { req_id, request } => Some(IbError::RequestTimeout { req_id, request }),
        }
    }
}

/// Folds the events of one request into its result.
pub trait Accumulator: Send + 'static {
    type Output: Send + 'static;

    /// Feed one event correlated to this request.
    fn accept(&mut self, event: &GatewayEvent) -> Step;

    /// Gateway error tied to this request. Informational notices are
    /// ignored; anything else rejects.
    fn on_error(&mut self, code: i32, message: &str) -> Step {
        match classify(code) {
            Notice::Informational => {
                debug!(code, detail = message, "Ignoring informational gateway notice");
                Step::Continue
            }
            _ => Step::Fail(IbError::from_gateway(code, message)),
        }
    }

    /// Called once when the request's grace window elapses.
    fn on_grace(&mut self) -> Step {
        Step::Continue
    }

    /// Produce the result. `TimedOut` decides the partial-data policy.
    fn finish(self, completion: Completion) -> Result<Self::Output>;
}

/// Request to send plus the request that releases it.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub request: GatewayRequest,
    pub cancel: Option<GatewayRequest>,
}

impl Dispatch {
    pub fn new(request: GatewayRequest) -> Self {
        Self {
            request,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: GatewayRequest) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Deadline and optional grace window for one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub grace: Option<Duration>,
}

impl RequestOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }
}

trait PendingSlot: Send {
    fn on_event(&mut self, event: &GatewayEvent) -> Step;
    fn on_error(&mut self, code: i32, message: &str) -> Step;
    fn on_grace(&mut self) -> Step;
    fn complete(self: Box<Self>, completion: Completion);
    fn fail(self: Box<Self>, error: IbError);
}

struct Slot<A: Accumulator> {
    accumulator: A,
    tx: oneshot::Sender<Result<A::Output>>,
}

impl<A: Accumulator> PendingSlot for Slot<A> {
    fn on_event(&mut self, event: &GatewayEvent) -> Step {
        self.accumulator.accept(event)
    }

    fn on_error(&mut self, code: i32, message: &str) -> Step {
        self.accumulator.on_error(code, message)
    }

    fn on_grace(&mut self) -> Step {
        self.accumulator.on_grace()
    }

    fn complete(self: Box<Self>, completion: Completion) {
        let Slot { accumulator, tx } = *self;
        let _ = tx.send(accumulator.finish(completion));
    }

    fn fail(self: Box<Self>, error: IbError) {
        let _ = self.tx.send(Err(error));
    }
}

type PendingMap = HashMap<RequestId, Box<dyn PendingSlot>>;

/// Tracks in-flight requests by correlation id.
pub struct RequestCorrelator {
    next_id: AtomicI64,
    pending: Mutex<PendingMap>,
    sentinel_gates: Mutex<HashMap<RequestId, Arc<tokio::sync::Mutex<()>>>>,
    outbound: Outbound,
}

impl RequestCorrelator {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            next_id: AtomicI64::new(FIRST_REQUEST_ID),
            pending: Mutex::new(HashMap::new()),
            sentinel_gates: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Allocate the next correlation id.
    pub fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// Send a request under a freshly allocated id and wait for its result.
    pub async fn send<A, F>(
        &self,
        kind: &'static str,
        build: F,
        accumulator: A,
        options: RequestOptions,
    ) -> Result<A::Output>
    where
        A: Accumulator,
        F: FnOnce(RequestId) -> Dispatch,
    {
        let id = self.next_request_id();
        self.run(id, kind, build(id), accumulator, options).await
    }

    /// Send a request whose responses arrive on a sentinel id.
    ///
    /// Requests on the same sentinel are serialised: the gateway can't tell
    /// two concurrent position downloads apart.
    pub async fn send_sentinel<A>(
        &self,
        sentinel: RequestId,
        kind: &'static str,
        dispatch: Dispatch,
        accumulator: A,
        options: RequestOptions,
    ) -> Result<A::Output>
    where
        A: Accumulator,
    {
        let gate = self.sentinel_gates.lock().entry(sentinel).or_default().clone();
        let _turn = gate.lock().await;
        self.run(sentinel, kind, dispatch, accumulator, options).await
    }

    async fn run<A: Accumulator>(
        &self,
        id: RequestId,
        kind: &'static str,
        dispatch: Dispatch,
        accumulator: A,
        options: RequestOptions,
    ) -> Result<A::Output> {
        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&id) {
                return Err(IbError::RequestInFlight(id));
            }
            pending.insert(id, Box::new(Slot { accumulator, tx }));
        }

        let mut guard = PendingGuard {
            correlator: self,
            id,
            cancel: None,
        };
        self.outbound.send(dispatch.request)?;
        guard.cancel = dispatch.cancel;
        debug!(req_id = id, kind, "Request dispatched");

        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);
        let grace = tokio::time::sleep(options.grace.unwrap_or(options.timeout));
        tokio::pin!(grace);
        let mut grace_armed = options.grace.is_some();

        loop {
            tokio::select! {
                outcome = &mut rx => {
                    return outcome.unwrap_or_else(|_| Err(IbError::Disconnected));
                }
                () = &mut grace, if grace_armed => {
                    grace_armed = false;
                    self.grace_elapsed(id);
                }
                () = &mut deadline => {
                    self.expire(id, kind);
                    return rx
                        .await
                        .unwrap_or_else(|_| Err(IbError::RequestTimeout { req_id: id, request: kind }));
                }
            }
        }
    }

    /// Route one gateway event. Returns true if a pending request consumed it.
    pub fn dispatch(&self, event: &GatewayEvent) -> bool {
        let Some(id) = event.correlation_id() else {
            return false;
        };
        let mut pending = self.pending.lock();
        let Some(slot) = pending.get_mut(&id) else {
            return false;
        };
        let step = match event {
            GatewayEvent::Error { code, message, .. } => slot.on_error(*code, message),
            other => slot.on_event(other),
        };
        settle(&mut pending, id, step);
        true
    }

    /// Reject every pending request, e.g. on disconnect.
    pub fn fail_all(&self, error: IbError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), error = %error, "Failing pending requests");
        }
        for (_, slot) in drained {
            slot.fail(error.clone());
        }
    }

    fn grace_elapsed(&self, id: RequestId) {
        let mut pending = self.pending.lock();
        if let Some(slot) = pending.get_mut(&id) {
            let step = slot.on_grace();
            settle(&mut pending, id, step);
        }
    }

    fn expire(&self, id: RequestId, kind: &'static str) {
        let slot = self.pending.lock().remove(&id);
        if let Some(slot) = slot {
            debug!(req_id = id, kind, "Request deadline elapsed");
            slot.complete(Completion::TimedOut {
                req_id: id,
                request: kind,
            });
        }
    }
}

fn settle(pending: &mut PendingMap, id: RequestId, step: Step) {
    match step {
        Step::Continue => {}
        Step::Done => {
            if let Some(slot) = pending.remove(&id) {
                slot.complete(Completion::Terminal);
            }
        }
        Step::Fail(error) => {
            if let Some(slot) = pending.remove(&id) {
                slot.fail(error);
            }
        }
    }
}

struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    id: RequestId,
    cancel: Option<GatewayRequest>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let leftover = self.correlator.pending.lock().remove(&self.id);
        drop(leftover);
        if let Some(cancel) = self.cancel.take() {
            if let Err(e) = self.correlator.outbound.send(cancel) {
                debug!(req_id = self.id, error = %e, "Could not release gateway subscription");
            }
        }
    }
}
