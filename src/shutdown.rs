use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A debounced one-shot timer: only the most recent [`arm`] in a window
/// actually fires.
///
/// The broker arms this on every plugin exit and cancels it when a new
/// plugin connects; the group process only shuts down once a full quiet
/// window has passed with nothing hosted. Re-arming while a wait is in
/// flight starts the wait over, and a cancel parks the waiter until the
/// next arm, so a rapid connect/disconnect sequence (a plugin scan) keeps
/// reusing the same process instead of paying startup cost per plugin.
///
/// [`arm`]: Debounce::arm
pub struct Debounce {
    deadline: Mutex<Option<Instant>>,
    changed: Notify,
}

impl Debounce {
    pub fn new() -> Self {
        Self {
            deadline: Mutex::new(None),
            changed: Notify::new(),
        }
    }

    /// Schedule the trigger `delay` from now, replacing any pending one.
    pub fn arm(&self, delay: Duration) {
        *self.deadline.lock().unwrap() = Some(Instant::now() + delay);
        self.changed.notify_one();
    }

    /// Drop any pending trigger.
    pub fn cancel(&self) {
        *self.deadline.lock().unwrap() = None;
        self.changed.notify_one();
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.lock().unwrap().is_some()
    }

    fn current(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap()
    }

    /// Complete once the currently armed deadline expires.
    ///
    /// The deadline is consumed on completion, so each arm fires at most
    /// once. While unarmed this pends indefinitely, which makes it safe to
    /// use as a `select!` branch that is simply never taken.
    pub async fn fired(&self) {
        loop {
            match self.current() {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            let mut current = self.deadline.lock().unwrap();
                            // a re-arm while we slept supersedes this expiry
                            if *current == Some(deadline) {
                                *current = None;
                                return;
                            }
                        }
                        _ = self.changed.notified() => {}
                    }
                }
                None => self.changed.notified().await,
            }
        }
    }
}

impl Default for Debounce {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_delay() {
        let debounce = Debounce::new();
        debounce.arm(Duration::from_millis(50));

        let begin = Instant::now();
        debounce.fired().await;
        assert!(begin.elapsed() >= Duration::from_millis(50));
        assert!(!debounce.is_armed());

        // consumed: it does not fire again until re-armed
        let again = timeout(Duration::from_millis(200), debounce.fired()).await;
        assert!(again.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_during_an_in_flight_wait_starts_over() {
        let debounce = Arc::new(Debounce::new());
        debounce.arm(Duration::from_millis(50));

        let waiter = tokio::spawn({
            let debounce = debounce.clone();
            async move {
                let begin = Instant::now();
                debounce.fired().await;
                begin.elapsed()
            }
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        debounce.arm(Duration::from_millis(100));

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_millis(125));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_parks_the_waiter() {
        let debounce = Arc::new(Debounce::new());
        debounce.arm(Duration::from_millis(50));

        let waiter = tokio::spawn({
            let debounce = debounce.clone();
            async move { debounce.fired().await }
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        debounce.cancel();

        let outcome = timeout(Duration::from_millis(500), waiter).await;
        assert!(outcome.is_err(), "canceled debounce must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn arming_wakes_a_parked_waiter() {
        let debounce = Arc::new(Debounce::new());

        let waiter = tokio::spawn({
            let debounce = debounce.clone();
            async move { debounce.fired().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        debounce.arm(Duration::from_millis(30));

        timeout(Duration::from_millis(100), waiter)
            .await
            .expect("arm must wake the waiter")
            .unwrap();
    }
}
