//! Event-loop primitives.
//!
//! Each peer session is one task; everything that happens to a peer — socket
//! frames, timer fires, child-process exits, commands from other tasks —
//! arrives as an event on that task's channel, so callbacks for one peer are
//! never concurrent with each other. The channel sender is the wake
//! primitive: any thread or task may clone it and enqueue work that runs on
//! the session's next turn.
//!
//! [`Timer`] is the resettable timer used for the ping/offline liveness
//! machinery. It is a handle to a small background task; the task fires by
//! sending a caller-supplied event on a caller-supplied channel, which keeps
//! timer fires serialized with everything else the owning session processes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

enum TimerCmd {
    Start(Duration),
    Oneshot(Duration),
    Reset,
    Stop,
    Close,
}

/// A resettable timer bound to an event channel.
///
/// - `start(period)` arms a periodic timer.
/// - `oneshot(delay)` arms a single fire.
/// - `reset()` re-arms with the most recent interval, even when stopped.
/// - `stop()` disarms without forgetting the interval.
/// - `close()` ends the timer task; dropping the handle does the same.
///
/// All operations are idempotent and never block.
pub struct Timer {
    cmd_tx: mpsc::UnboundedSender<TimerCmd>,
}

impl Timer {
    /// Spawns the timer task. On every fire, `fire()` is invoked and the
    /// resulting event is sent on `events`. The task ends when the handle is
    /// closed/dropped or the event receiver goes away.
    pub fn spawn<E, F>(events: mpsc::UnboundedSender<E>, fire: F) -> Self
    where
        E: Send + 'static,
        F: Fn() -> E + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_timer(cmd_rx, events, fire));
        Self { cmd_tx }
    }

    pub fn start(&self, period: Duration) {
        let _ = self.cmd_tx.send(TimerCmd::Start(period));
    }

    pub fn oneshot(&self, delay: Duration) {
        let _ = self.cmd_tx.send(TimerCmd::Oneshot(delay));
    }

    pub fn reset(&self) {
        let _ = self.cmd_tx.send(TimerCmd::Reset);
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(TimerCmd::Stop);
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(TimerCmd::Close);
    }
}

async fn run_timer<E, F>(
    mut cmd_rx: mpsc::UnboundedReceiver<TimerCmd>,
    events: mpsc::UnboundedSender<E>,
    fire: F,
) where
    E: Send + 'static,
    F: Fn() -> E + Send + 'static,
{
    // (interval, periodic) survives stop() so reset() can re-arm.
    let mut interval: Option<(Duration, bool)> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(TimerCmd::Start(period)) => {
                    interval = Some((period, true));
                    deadline = Some(Instant::now() + period);
                }
                Some(TimerCmd::Oneshot(delay)) => {
                    interval = Some((delay, false));
                    deadline = Some(Instant::now() + delay);
                }
                Some(TimerCmd::Reset) => {
                    if let Some((d, _)) = interval {
                        deadline = Some(Instant::now() + d);
                    }
                }
                Some(TimerCmd::Stop) => deadline = None,
                Some(TimerCmd::Close) | None => break,
            },
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                if events.send(fire()).is_err() {
                    break;
                }
                deadline = match interval {
                    Some((d, true)) => Some(Instant::now() + d),
                    _ => None,
                };
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        // Guarded by `if deadline.is_some()` in the select arm.
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn advance(d: Duration) {
        tokio::time::sleep(d).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_fires_repeatedly() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::spawn(tx, || ());
        timer.start(Duration::from_secs(10));

        advance(Duration::from_secs(35)).await;
        let mut fires = 0;
        while rx.try_recv().is_ok() {
            fires += 1;
        }
        assert_eq!(fires, 3, "expected one fire per elapsed period");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oneshot_fires_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::spawn(tx, || ());
        timer.oneshot(Duration::from_secs(25));

        advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "oneshot must not re-fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_postpones_the_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::spawn(tx, || ());
        timer.oneshot(Duration::from_secs(25));

        advance(Duration::from_secs(20)).await;
        timer.reset();
        advance(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err(), "reset must postpone the deadline");

        advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disarms_and_reset_rearms() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::spawn(tx, || ());
        timer.start(Duration::from_secs(10));
        timer.stop();

        advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err(), "stopped timer must not fire");

        // reset() re-arms with the interval remembered from start().
        timer.reset();
        advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::spawn(tx, || ());
        timer.stop();
        timer.stop();
        advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_ends_the_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::spawn(tx, || ());
        timer.start(Duration::from_secs(10));
        timer.close();

        advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err(), "closed timer must never fire");
    }
}
