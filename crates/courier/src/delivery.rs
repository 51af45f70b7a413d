//! Marshalling of responses onto the delivery target.
//!
//! Dispatchers never invoke user callbacks themselves; they hand a task to a
//! [`ResponseDelivery`], which runs it on the configured execution context —
//! typically an event loop owned by the caller, or a tokio runtime.

use std::cell::Cell;

use tokio::sync::mpsc;

use crate::error::RequestError;
use crate::request::RequestRef;
use crate::response::Response;

/// A unit of work to run on the delivery target.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static IN_DELIVERY: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is executing a delivery task.
pub(crate) fn in_delivery_context() -> bool {
    IN_DELIVERY.with(|flag| flag.get())
}

struct ContextGuard;

impl ContextGuard {
    fn enter() -> Self {
        IN_DELIVERY.with(|flag| flag.set(true));
        ContextGuard
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        IN_DELIVERY.with(|flag| flag.set(false));
    }
}

/// Posts parsed responses and errors to the delivery target.
///
/// Implementations provide [`post`](Self::post); the three delivery
/// operations are built on top of it. The standard delivery task checks for
/// cancellation immediately before invoking user callbacks, and performs the
/// request's finish bookkeeping on the delivery target.
pub trait ResponseDelivery: Send + Sync + 'static {
    /// Runs `task` on the delivery target. Must not run it synchronously on
    /// the calling thread.
    fn post(&self, task: Task);

    /// Posts a final response. The request finishes once it is delivered.
    fn post_response(&self, request: RequestRef, response: Response) {
        self.post(delivery_task(request, Ok(response), None));
    }

    /// Posts an intermediate response; `and_then` runs on the delivery
    /// target after the response has been delivered.
    fn post_response_and_then(&self, request: RequestRef, response: Response, and_then: Task) {
        self.post(delivery_task(request, Ok(response), Some(and_then)));
    }

    /// Posts a terminal error.
    fn post_error(&self, request: RequestRef, error: RequestError) {
        self.post(delivery_task(request, Err(error), None));
    }
}

fn delivery_task(
    request: RequestRef,
    outcome: Result<Response, RequestError>,
    and_then: Option<Task>,
) -> Task {
    Box::new(move || {
        let _ctx = ContextGuard::enter();

        // Cancelled after the dispatcher posted us; suppress all callbacks.
        if request.is_cancelled() {
            request.finish("canceled-at-delivery");
            return;
        }

        match outcome {
            Ok(response) => {
                let intermediate = response.is_intermediate();
                response.deliver();
                metric!(counter("delivery.response") += 1);
                if intermediate {
                    request.note_intermediate_delivered();
                    request.add_marker("intermediate-response");
                    if let Some(and_then) = and_then {
                        and_then();
                    }
                } else {
                    request.finish("done");
                }
            }
            Err(error) => {
                request.deliver_error(error);
                metric!(counter("delivery.error") += 1);
                request.finish("done");
            }
        }
    })
}

/// An execution context that delivery tasks can be handed to.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// A tokio runtime as the delivery target. Each task runs on the runtime;
/// suits callers without their own event loop.
impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: Task) {
        self.spawn(async move { task() });
    }
}

/// The standard [`ResponseDelivery`]: forwards every delivery task to an
/// [`Executor`].
pub struct ExecutorDelivery {
    executor: Box<dyn Executor>,
}

impl ExecutorDelivery {
    pub fn new(executor: impl Executor + 'static) -> Self {
        ExecutorDelivery {
            executor: Box::new(executor),
        }
    }
}

impl ResponseDelivery for ExecutorDelivery {
    fn post(&self, task: Task) {
        self.executor.execute(task);
    }
}

/// Creates an executor backed by a single-consumer channel, paired with the
/// loop that drains it. Suits delivery onto a caller-owned event loop: hand
/// the executor to the queue and drive the [`DeliveryLoop`] from the loop's
/// thread.
pub fn event_loop() -> (EventLoopExecutor, DeliveryLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventLoopExecutor { tx }, DeliveryLoop { rx })
}

#[derive(Clone)]
pub struct EventLoopExecutor {
    tx: mpsc::UnboundedSender<Task>,
}

impl Executor for EventLoopExecutor {
    fn execute(&self, task: Task) {
        // The loop is gone; the pipeline is shutting down and the task is
        // dropped with it.
        self.tx.send(task).ok();
    }
}

pub struct DeliveryLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl DeliveryLoop {
    /// Runs delivery tasks until every executor handle has been dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }

    /// Runs the tasks that are already queued, without waiting. Returns how
    /// many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}
