use axum::http::{HeaderName, HeaderValue, Method, Request, Response};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

pub const HX_TRIGGER: HeaderName = HeaderName::from_static("hx-trigger");

/// Client-side event fired after the user's tasks changed on the server.
pub const TASKS_CHANGED: &str = "tasks-changed";

/// Client-side event fired when a change was rolled back.
pub const TASK_ROLLBACK: &str = "task-rollback";

/// Layer that announces successful task mutations to htmx with an
/// `HX-Trigger: tasks-changed` header.
///
/// Only successful responses to non-GET requests are tagged, and a trigger
/// set by the handler itself is left alone.
#[derive(Clone, Default)]
pub struct TasksChangedLayer;

impl TasksChangedLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TasksChangedLayer {
    type Service = TasksChangedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TasksChangedService { inner }
    }
}

#[derive(Clone)]
pub struct TasksChangedService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TasksChangedService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = TasksChangedFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let is_mutation = !matches!(*request.method(), Method::GET | Method::HEAD);
        TasksChangedFuture {
            future: self.inner.call(request),
            is_mutation,
        }
    }
}

pin_project! {
    pub struct TasksChangedFuture<F> {
        #[pin]
        future: F,
        is_mutation: bool,
    }
}

impl<F, ResBody, E> Future for TasksChangedFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.future.poll(cx) {
            Poll::Ready(Ok(mut response)) => {
                if *this.is_mutation
                    && response.status().is_success()
                    && !response.headers().contains_key(HX_TRIGGER)
                {
                    response
                        .headers_mut()
                        .insert(HX_TRIGGER, HeaderValue::from_static(TASKS_CHANGED));
                }
                Poll::Ready(Ok(response))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
