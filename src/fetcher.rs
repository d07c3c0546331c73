//! Asset Fetcher (C3): external interface consumed by the Tile Loader. The
//! real implementation (HTTP client, disk cache, whatever the host uses) is
//! out of scope (§1) — this module only defines the contract plus a
//! deterministic in-memory test double used throughout this crate's test
//! suite, since real I/O would make the async-worker polling cadence
//! non-reproducible (§8).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use bytes::Bytes;
use parking_lot::Mutex;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FetchFlags: u8 {
        /// Caller expects a 4xx is a normal outcome; fetcher should not log it.
        const ACCEPT_404 = 0b01;
        /// Low-priority request (child tiles past order 0, §4.5 step 7).
        const DELAY = 0b10;
    }
}

/// One fetch attempt's outcome. `status` follows HTTP-like conventions:
/// `0` = not yet known (try later), `598` = still loading, `200` = OK,
/// `4xx` = definitive not-found.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub data: Option<Bytes>,
    pub size: usize,
    pub status: u16,
}

impl FetchOutcome {
    pub fn pending() -> Self {
        Self {
            data: None,
            size: 0,
            status: 0,
        }
    }

    pub fn still_loading() -> Self {
        Self {
            data: None,
            size: 0,
            status: 598,
        }
    }

    pub fn not_found(status: u16) -> Self {
        debug_assert!((400..500).contains(&status));
        Self {
            data: None,
            size: 0,
            status,
        }
    }

    pub fn ok(data: Bytes) -> Self {
        let size = data.len();
        Self {
            data: Some(data),
            size,
            status: 200,
        }
    }
}

/// Pulls bytes for a URL. Must be non-blocking: "not ready yet" is signaled
/// by returning status `0`, and the Loader relies on being able to call
/// again on a later frame (§4.3).
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str, flags: FetchFlags) -> FetchOutcome;

    /// Tells the fetcher the caller no longer needs the bytes for `url`.
    fn release(&self, url: &str);
}

/// A scripted, in-memory fetcher for tests. Each URL has a queue of
/// responses; calling `fetch` for that URL pops the front of the queue.
/// An unscripted URL (or an exhausted queue) yields `FetchOutcome::pending()`
/// forever, so a test can model "the real network never answers."
#[derive(Default)]
pub struct MockFetcher {
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    calls: Mutex<HashMap<String, u32>>,
    releases: AtomicU32,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `outcome` to be returned on the next `fetch(url, ..)` call.
    pub fn script(&self, url: impl Into<String>, outcome: FetchOutcome) -> &Self {
        self.scripts
            .lock()
            .entry(url.into())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn call_count(&self, url: &str) -> u32 {
        *self.calls.lock().get(url).unwrap_or(&0)
    }

    pub fn release_count(&self) -> u32 {
        self.releases.load(Ordering::Relaxed)
    }
}

impl AssetFetcher for MockFetcher {
    fn fetch(&self, url: &str, _flags: FetchFlags) -> FetchOutcome {
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(url).and_then(VecDeque::pop_front) {
            Some(outcome) => outcome,
            None => FetchOutcome::pending(),
        }
    }

    fn release(&self, _url: &str) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscripted_url_is_pending_forever() {
        let fetcher = MockFetcher::new();
        assert_eq!(fetcher.fetch("http://x/a", FetchFlags::empty()).status, 0);
        assert_eq!(fetcher.fetch("http://x/a", FetchFlags::empty()).status, 0);
        assert_eq!(fetcher.call_count("http://x/a"), 2);
    }

    #[test]
    fn script_replays_in_order() {
        let fetcher = MockFetcher::new();
        fetcher
            .script("http://x/a", FetchOutcome::pending())
            .script("http://x/a", FetchOutcome::ok(Bytes::from_static(b"data")));
        assert_eq!(fetcher.fetch("http://x/a", FetchFlags::empty()).status, 0);
        let outcome = fetcher.fetch("http://x/a", FetchFlags::empty());
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.data.unwrap(), Bytes::from_static(b"data"));
    }
}
