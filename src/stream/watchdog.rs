use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};
use tracing::warn;

pin_project! {
    /// Ends the wrapped frame stream when no item arrives within `window`.
    ///
    /// The timer re-arms on every item. Expiry drops nothing by itself; the
    /// caller dropping the watchdog drops the inner stream and its reader.
    pub struct InactivityWatchdog<S> {
        #[pin]
        inner: S,
        #[pin]
        sleep: Sleep,
        window: Duration,
        expired: bool,
    }
}

impl<S> InactivityWatchdog<S> {
    /// Whether the stream ended because the window elapsed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expired
    }
}

/// Wrap `inner` with an inactivity window. Must be called inside a Tokio runtime.
pub fn with_inactivity_timeout<S: Stream>(inner: S, window: Duration) -> InactivityWatchdog<S> {
    InactivityWatchdog {
        inner,
        sleep: tokio::time::sleep(window),
        window,
        expired: false,
    }
}

impl<S: Stream> Stream for InactivityWatchdog<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.expired {
            return Poll::Ready(None);
        }
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                let deadline = Instant::now() + *this.window;
                this.sleep.as_mut().reset(deadline);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => {
                if this.sleep.as_mut().poll(cx).is_ready() {
                    warn!(
                        window_ms = u64::try_from(this.window.as_millis()).unwrap_or(u64::MAX),
                        "no frame within inactivity window; abandoning stream"
                    );
                    *this.expired = true;
                    Poll::Ready(None)
                } else {
                    Poll::Pending
                }
            }
        }
    }
}
