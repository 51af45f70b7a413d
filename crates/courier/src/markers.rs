//! Per-request lifecycle event log.
//!
//! When debug logging is enabled, every request records a timestamped marker
//! at each pipeline checkpoint ("add-to-queue", "cache-queue-take", ...).
//! The whole log is emitted as one block when the request finishes, so the
//! timeline of a single request stays together in the output.

use std::time::Instant;

use parking_lot::Mutex;

pub(crate) const TARGET: &str = "courier::markers";

/// Threshold past which a request is logged even with markers disabled.
pub(crate) const SLOW_REQUEST_THRESHOLD_MS: u128 = 3000;

struct Marker {
    name: String,
    thread: String,
    at: Instant,
}

pub(crate) struct MarkerLog {
    markers: Mutex<Vec<Marker>>,
}

impl MarkerLog {
    /// Whether marker collection is worth the bookkeeping at all.
    pub(crate) fn enabled() -> bool {
        tracing::enabled!(target: TARGET, tracing::Level::DEBUG)
    }

    pub(crate) fn new() -> Self {
        MarkerLog {
            markers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, name: &str) {
        self.markers.lock().push(Marker {
            name: name.to_owned(),
            thread: format!("{:?}", std::thread::current().id()),
            at: Instant::now(),
        });
    }

    /// Renders the collected markers under `header`, or `None` when the log
    /// spans no measurable time and is not worth printing.
    pub(crate) fn summary(&self, header: &str) -> Option<String> {
        let markers = self.markers.lock();
        let (first, last) = (markers.first()?, markers.last()?);

        let duration = last.at.duration_since(first.at);
        if duration.is_zero() {
            return None;
        }

        let mut out = format!("({}ms) {}", duration.as_millis(), header);
        let mut prev = first.at;
        for marker in markers.iter() {
            let step = marker.at.duration_since(prev).as_millis();
            out.push_str(&format!(
                "\n  (+{:<4}) [{}] {}",
                step, marker.thread, marker.name
            ));
            prev = marker.at;
        }
        Some(out)
    }
}
