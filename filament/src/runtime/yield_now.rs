use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Yields once: wakes itself and parks, so the fiber goes to the back of
/// its scheduler's queue.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.0 {
            self.0 = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        Poll::Ready(())
    }
}

/// Lets every other runnable fiber of this scheduler run before the
/// caller continues.
///
/// # Examples
///
/// ```rust,ignore
/// for chunk in work.chunks(1024) {
///     process(chunk);
///     yield_now().await;
/// }
/// ```
pub async fn yield_now() {
    YieldOnce(false).await
}
