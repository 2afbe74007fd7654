//! Throttled progress events for long scans. Wraps a callback; at most one
//! event per 300ms unless `force`, with a no-op suppression at scan start so
//! an idle `build_index` doesn't emit a burst of empty ticks.

use std::time::{Duration, Instant};

const THROTTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub dst: String,
    pub feature: String,
    pub done: u64,
    pub total: Option<u64>,
    pub ok: Option<bool>,
    pub is_final: bool,
}

pub type ProgressCallback = Box<dyn FnMut(ProgressEvent) + Send>;

/// If no callback is attached, emitted events are silently dropped.
pub struct ProgressEmitter {
    dst: String,
    feature: String,
    callback: Option<ProgressCallback>,
    last_emit: Option<Instant>,
}

impl ProgressEmitter {
    #[must_use]
    pub fn new(dst: impl Into<String>, feature: impl Into<String>) -> Self {
        Self { dst: dst.into(), feature: feature.into(), callback: None, last_emit: None }
    }

    #[must_use]
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Emits `{dst, feature, done, total, ok, final}`, throttled to one event
    /// per 300ms unless `force`. Suppressed entirely when `done == 0` and
    /// `total` is `None` or `Some(0)`, to avoid a burst of no-op events at
    /// scan start.
    pub fn tick(&mut self, done: u64, total: Option<u64>, ok: Option<bool>, force: bool) {
        self.emit(done, total, ok, false, force);
    }

    /// Always emits, bypassing throttling, with `final: true`.
    pub fn finish(&mut self, done: u64, total: Option<u64>, ok: Option<bool>) {
        self.emit(done, total, ok, true, true);
    }

    fn emit(&mut self, done: u64, total: Option<u64>, ok: Option<bool>, is_final: bool, force: bool) {
        if done == 0 && matches!(total, None | Some(0)) && !force {
            return;
        }
        if !force {
            if let Some(last) = self.last_emit {
                if last.elapsed() < THROTTLE {
                    return;
                }
            }
        }
        let Some(callback) = self.callback.as_mut() else {
            return;
        };
        callback(ProgressEvent {
            dst: self.dst.clone(),
            feature: self.feature.clone(),
            done,
            total,
            ok,
            is_final,
        });
        self.last_emit = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let callback: ProgressCallback = Box::new(move |event| events_clone.lock().unwrap().push(event));
        (callback, events)
    }

    #[test]
    fn suppresses_noop_at_scan_start() {
        let (cb, events) = recorder();
        let mut emitter = ProgressEmitter::new("trakt", "watchlist").with_callback(cb);
        emitter.tick(0, None, None, false);
        emitter.tick(0, Some(0), None, false);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn forced_tick_emits_even_at_zero() {
        let (cb, events) = recorder();
        let mut emitter = ProgressEmitter::new("trakt", "watchlist").with_callback(cb);
        emitter.tick(0, None, None, true);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn throttles_rapid_ticks() {
        let (cb, events) = recorder();
        let mut emitter = ProgressEmitter::new("trakt", "watchlist").with_callback(cb);
        emitter.tick(1, Some(10), None, false);
        emitter.tick(2, Some(10), None, false);
        emitter.tick(3, Some(10), None, false);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn finish_always_emits_with_final_flag() {
        let (cb, events) = recorder();
        let mut emitter = ProgressEmitter::new("trakt", "watchlist").with_callback(cb);
        emitter.tick(1, Some(10), None, false);
        emitter.finish(10, Some(10), Some(true));
        let recorded = events.lock().unwrap();
        assert!(recorded.last().unwrap().is_final);
    }

    #[test]
    fn without_callback_events_are_dropped_silently() {
        let mut emitter = ProgressEmitter::new("trakt", "watchlist");
        emitter.tick(5, Some(10), None, true);
        emitter.finish(10, Some(10), Some(true));
    }
}
