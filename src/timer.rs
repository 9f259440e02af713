//! Performance measurement and progress reporting.

use std::{
    fmt, mem,
    sync::Mutex,
    time::{Duration, Instant},
};

use itertools::Itertools;

/// A timer that can measure and average the time an operation takes.
///
/// Collected timings are averaged and reset when the timer is displayed using `{}`
/// ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Sum of all recorded durations since the last reset, in seconds.
    total: f32,
    /// The number of time measurements that contributed to `total`.
    count: usize,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::default()),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    fn stop(&self, start: Instant) {
        let duration = start.elapsed();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total += duration.as_secs_f32();
        state.count += 1;
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let State { total, count } = mem::take(&mut *state);
        let avg_ms = if count == 0 {
            0.0
        } else {
            total / count as f32 * 1000.0
        };

        write!(f, "{}: {count}x{avg_ms:.01}ms", self.name)
    }
}

/// Cloning a timer resets its collected timings.
impl Clone for Timer {
    fn clone(&self) -> Self {
        Self::new(self.name)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

/// Logs the progress of a batch job at most once per second, with optional extra data.
pub struct ProgressLogger {
    name: String,
    done: usize,
    total: usize,
    last_log: Instant,
}

impl ProgressLogger {
    pub fn new<N: Into<String>>(name: N, total: usize) -> Self {
        Self {
            name: name.into(),
            done: 0,
            total,
            last_log: Instant::now(),
        }
    }

    /// Returns the number of items processed so far.
    pub fn done(&self) -> usize {
        self.done
    }

    /// Advances the counter by 1 and logs progress if one second has passed.
    pub fn tick(&mut self) {
        if self.advance() {
            log::info!("{}: {}/{}", self.name, self.done, self.total);
        }
    }

    /// Like [`ProgressLogger::tick`], but also logs `extra` data, usually [`Timer`]s.
    pub fn tick_with<D: fmt::Display, I: IntoIterator<Item = D>>(&mut self, extra: I) {
        if self.advance() {
            log::info!(
                "{}: {}/{} ({})",
                self.name,
                self.done,
                self.total,
                extra.into_iter().format(", ")
            );
        }
    }

    /// Counts one item. Returns whether to log; the last item is always logged.
    fn advance(&mut self) -> bool {
        self.done += 1;
        let log = self.done == self.total || self.last_log.elapsed() > Duration::from_secs(1);
        if log {
            self.last_log = Instant::now();
        }
        log
    }
}
