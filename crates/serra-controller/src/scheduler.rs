use std::time::Duration;

use serra::device::DeviceId;

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::trace;

/// The retry timer of a command.
///
/// The timer task sleeps for the retry delay and then runs its callback,
/// unless the timer is cancelled first. The callback receives the timer
/// token, because a cancellation can still race with a timer that has
/// already woken up: whoever acts on the fire must check the token under
/// the same lock used to cancel the timer.
#[derive(Debug)]
pub(crate) struct RetryTimer {
    device: DeviceId,
    command_id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RetryTimer {
    pub(crate) fn arm<F, Fut>(device: DeviceId, command_id: u64, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let fire_token = token.clone();

        trace!("Arming retry timer of command {command_id} for `{device}` in {delay:?}");

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep(delay) => on_fire(fire_token).await,
            }
        });

        Self {
            device,
            command_id,
            token,
            handle,
        }
    }

    pub(crate) const fn command_id(&self) -> u64 {
        self.command_id
    }

    // Cancels the timer without waiting for its task.
    pub(crate) fn cancel(self) {
        trace!(
            "Cancelling retry timer of command {} for `{}`",
            self.command_id, self.device
        );
        self.token.cancel();
    }

    // Cancels the timer and returns its task, so that it can be awaited.
    pub(crate) fn stop(self) -> JoinHandle<()> {
        self.token.cancel();
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serra::device::DeviceId;

    use super::RetryTimer;

    const DELAY: Duration = Duration::from_millis(1500);

    fn counting_timer(fired: &Arc<AtomicUsize>) -> RetryTimer {
        let fired = Arc::clone(fired);
        RetryTimer::arm(DeviceId::default(), 1, DELAY, move |token| async move {
            assert!(!token.is_cancelled());
            let _ = fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(&fired);
        assert_eq!(timer.command_id(), 1);

        tokio::time::sleep(DELAY / 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(DELAY).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        timer.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));

        counting_timer(&fired).cancel();

        let timer = counting_timer(&fired);
        tokio::time::sleep(DELAY / 2).await;
        timer.stop().await.unwrap();

        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
