//! Tile Loader (C5): drives a single tile from "absent" to "resident or
//! definitively failed", one non-blocking step per call (§4.5). Grounded in
//! the teacher's `slide_pool::ensure_loaded` cache-then-fetch-then-decode
//! sequence, generalized to the parent-before-child ordering and the
//! memoized-404 short-circuit the teacher never needed.

use std::sync::Arc;

use bitflags::bitflags;

use crate::cache::TileCache;
use crate::fetcher::{AssetFetcher, FetchFlags};
use crate::survey::SurveyDescriptor;
use crate::tile::{LoadResult, TileEntry, TileFlags, TileKey, TilePayload, TilePos};
use crate::worker::{AsyncWorker, WorkerStatus};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoadFlags: u8 {
        /// Skip the network entirely; only ever return what's already cached.
        const CACHED_ONLY = 0b0000_0001;
        /// Decode on the calling thread instead of spawning a worker.
        const LOAD_IN_THREAD = 0b0000_0010;
        /// Set by the traverser at very low zoom (§4.7); the resolver
        /// interprets this, the loader just threads it through untouched.
        const FORCE_USE_ALLSKY = 0b0000_0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Not yet resolved; caller should retry next frame.
    Pending,
    /// Resident in the cache (decoded or uploaded).
    Ok,
    /// Definitively absent (4xx), recorded in the parent's `NO_CHILD` bits.
    NotFound(u16),
    /// A hard failure outside the fetch/decode pipeline (§7).
    Error(u16),
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOutcome {
    pub key: Option<TileKey>,
    pub status: LoadStatus,
}

/// Advance `(order, pix)` of `survey` by one non-blocking step (§4.5 steps
/// 1-11). Call once per frame per tile of interest; the caller reads
/// `status` to decide whether to keep retrying.
pub fn load<Tex>(
    survey: &SurveyDescriptor,
    cache: &TileCache<Tex>,
    fetcher: &dyn AssetFetcher,
    order: i32,
    pix: i32,
    flags: LoadFlags,
) -> LoadOutcome {
    // Step 1: FORCE_USE_ALLSKY pins the lookup to the all-sky pseudo-level.
    // Only 12 pseudo-tiles are ever seeded (one per base face, `pix` in
    // [0, 12)), so `pix` must be reduced to its base-face ancestor the same
    // way HEALPix nested numbering does it -- before `order` itself is
    // clobbered to -1, using the *original* order.
    let (order, pix) = if flags.contains(LoadFlags::FORCE_USE_ALLSKY) {
        (-1, pix >> (2 * order.max(0)))
    } else {
        (order, pix)
    };
    let key = TileKey::new(survey.hash, order, pix);

    // already resident or loading -> poll the in-flight worker if
    // one exists, otherwise it's a hit.
    if let Some(mut guard) = cache.get(key) {
        if let Some(worker) = guard.loader.as_ref() {
            match worker.poll() {
                WorkerStatus::Pending => {
                    return LoadOutcome {
                        key: Some(key),
                        status: LoadStatus::Pending,
                    };
                }
                WorkerStatus::Done => {
                    let result = guard
                        .loader
                        .as_ref()
                        .and_then(|w| w.take())
                        .expect("worker reported Done");
                    guard.loader = None;
                    match result.payload {
                        Some(image) => {
                            let mut new_flags = guard.flags;
                            for i in 0..4 {
                                if result.transparency & (1 << i) != 0 {
                                    new_flags |= TileFlags::no_child(i);
                                }
                            }
                            guard.flags = new_flags;
                            guard.payload = Some(TilePayload::Decoded(image));
                            drop(guard);
                            cache.set_cost(key, result.cost);
                            return LoadOutcome {
                                key: Some(key),
                                status: LoadStatus::Ok,
                            };
                        }
                        None => {
                            guard.flags |= TileFlags::LOAD_ERROR;
                            drop(guard);
                            tracing::warn!(order, pix, "tile decode failed");
                            return LoadOutcome {
                                key: Some(key),
                                status: LoadStatus::Error(0),
                            };
                        }
                    }
                }
            }
        }
        return LoadOutcome {
            key: Some(key),
            status: LoadStatus::Ok,
        };
    }

    if flags.contains(LoadFlags::CACHED_ONLY) {
        return LoadOutcome {
            key: None,
            status: LoadStatus::Pending,
        };
    }

    // Step 2: survey metadata must be ready before any tile URL can be built.
    if !survey.is_ready() {
        return LoadOutcome {
            key: None,
            status: LoadStatus::Pending,
        };
    }

    // Step 3: range check against the survey's declared order bounds.
    if order < survey.order_min() {
        return LoadOutcome {
            key: None,
            status: LoadStatus::NotFound(0),
        };
    }
    if let Some(max) = survey.order_max() {
        if order > max {
            return LoadOutcome {
                key: None,
                status: LoadStatus::NotFound(0),
            };
        }
    }

    // Step 4: a memoized 404 on the parent for this quadrant means "don't
    // even ask the network" -- load the parent (which must already be
    // resident, by the parent-before-child invariant) and check its flags.
    // Only applies above order_min: the caller never requests below that
    // floor, so there is no parent relationship to enforce at the floor
    // itself.
    if order > survey.order_min() {
        if let Some(parent_pos) = TilePos::new(order, pix).parent() {
            let parent_key = TileKey::new(survey.hash, parent_pos.order, parent_pos.pix);
            let quadrant = TilePos::new(order, pix).quadrant();
            match cache.get(parent_key) {
                Some(parent_entry) => {
                    if parent_entry.flags.has_no_child(quadrant) {
                        return LoadOutcome {
                            key: None,
                            status: LoadStatus::NotFound(404),
                        };
                    }
                }
                None => {
                    // Parent not yet loaded: drive it forward (parent-before-
                    // child), but regardless of what it reports, this tile is
                    // simply "not ready yet" until the parent settles (§4.5
                    // step 6: "if the parent is unavailable, return (none, 0)").
                    let parent_flags = flags.difference(LoadFlags::LOAD_IN_THREAD);
                    load(
                        survey,
                        cache,
                        fetcher,
                        parent_pos.order,
                        parent_pos.pix,
                        parent_flags,
                    );
                    return LoadOutcome {
                        key: None,
                        status: LoadStatus::Pending,
                    };
                }
            }
        }
    }

    // Step 5-6: fetch the tile bytes.
    let url = survey.url_for(order, pix, survey.ext());
    let mut fetch_flags = FetchFlags::ACCEPT_404;
    if order > 0 {
        fetch_flags |= FetchFlags::DELAY;
    }
    let outcome = fetcher.fetch(&url, fetch_flags);

    match outcome.status {
        0 | 598 => LoadOutcome {
            key: None,
            status: LoadStatus::Pending,
        },
        200 => {
            let data = outcome.data.expect("200 response carries a body");
            fetcher.release(&url);
            cache.put(
                key,
                TileEntry::empty(TilePos::new(order, pix)),
                0,
                survey.on_evict_hook(),
            );
            if flags.contains(LoadFlags::LOAD_IN_THREAD) {
                let decode = survey.decode_callback();
                let worker = AsyncWorker::start(move || decode_job(decode, data));
                if let Some(mut guard) = cache.get(key) {
                    guard.loader = Some(worker);
                }
                LoadOutcome {
                    key: Some(key),
                    status: LoadStatus::Pending,
                }
            } else {
                let result = decode_job(survey.decode_callback(), data);
                match result.payload {
                    Some(image) => {
                        let mut new_flags = TileFlags::empty();
                        for i in 0..4 {
                            if result.transparency & (1 << i) != 0 {
                                new_flags |= TileFlags::no_child(i);
                            }
                        }
                        let entry = TileEntry::with_payload(
                            TilePos::new(order, pix),
                            TilePayload::Decoded(image),
                            new_flags,
                        );
                        cache.put(key, entry, result.cost, survey.on_evict_hook());
                        LoadOutcome {
                            key: Some(key),
                            status: LoadStatus::Ok,
                        }
                    }
                    None => {
                        let mut entry = TileEntry::empty(TilePos::new(order, pix));
                        entry.flags |= TileFlags::LOAD_ERROR;
                        cache.put(key, entry, 0, survey.on_evict_hook());
                        tracing::warn!(url, "tile decode failed");
                        LoadOutcome {
                            key: Some(key),
                            status: LoadStatus::Error(0),
                        }
                    }
                }
            }
        }
        status => {
            fetcher.release(&url);
            if (400..500).contains(&status) {
                set_no_child_on_parent(survey, cache, TilePos::new(order, pix));
                LoadOutcome {
                    key: None,
                    status: LoadStatus::NotFound(status),
                }
            } else {
                tracing::warn!(url, status, "transient fetch failure");
                LoadOutcome {
                    key: None,
                    status: LoadStatus::Error(status),
                }
            }
        }
    }
}

fn decode_job(decode: Arc<crate::codec::DecodeTile>, data: bytes::Bytes) -> LoadResult {
    match decode(&data) {
        Some((image, transparency)) => LoadResult {
            cost: image.cost(),
            payload: Some(image),
            transparency,
        },
        None => LoadResult {
            payload: None,
            cost: 0,
            transparency: 0,
        },
    }
}

fn set_no_child_on_parent<Tex>(survey: &SurveyDescriptor, cache: &TileCache<Tex>, pos: TilePos) {
    if let Some(parent_pos) = pos.parent() {
        let parent_key = TileKey::new(survey.hash, parent_pos.order, parent_pos.pix);
        if let Some(mut parent) = cache.get(parent_key) {
            parent.flags |= TileFlags::no_child(pos.quadrant());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::default_decode_tile;
    use crate::fetcher::MockFetcher;
    use bytes::Bytes;
    use std::sync::Arc;

    fn ready_survey(fetcher: &MockFetcher) -> SurveyDescriptor {
        use crate::fetcher::FetchOutcome;
        let mut survey = SurveyDescriptor::new(
            "http://example.org/survey",
            Arc::new(default_decode_tile),
        );
        let properties_url = "http://example.org/survey/properties";
        let allsky_url = "http://example.org/survey/Norder0/Allsky.jpg?v=0";
        // `update`'s first tick in each state machine fires the fetch blind
        // (it only cares about the state transition), so the queue needs a
        // throwaway entry ahead of the one actually read back.
        fetcher.script(properties_url, FetchOutcome::pending());
        fetcher.script(
            properties_url,
            FetchOutcome::ok(Bytes::from_static(
                b"hips_order=3\nhips_order_min=0\nhips_tile_width=256\n",
            )),
        );
        fetcher.script(allsky_url, FetchOutcome::pending());
        fetcher.script(allsky_url, FetchOutcome::not_found(404));

        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        for _ in 0..3 {
            survey.update(fetcher, &cache);
        }
        assert!(survey.is_ready(), "survey failed to settle in test setup");
        survey
    }

    #[test]
    fn cached_only_never_touches_network() {
        let fetcher = MockFetcher::new();
        let survey = ready_survey(&fetcher);
        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        let outcome = load(&survey, &cache, &fetcher, 3, 0, LoadFlags::CACHED_ONLY);
        assert_eq!(outcome.status, LoadStatus::Pending);
        assert_eq!(fetcher.call_count("http://example.org/survey/Norder3/Dir0/Npix0.jpg"), 0);
    }

    #[test]
    fn not_ready_survey_yields_pending() {
        let fetcher = MockFetcher::new();
        let survey = SurveyDescriptor::new("http://example.org/survey", Arc::new(default_decode_tile));
        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        let outcome = load(&survey, &cache, &fetcher, 3, 0, LoadFlags::empty());
        assert_eq!(outcome.status, LoadStatus::Pending);
    }

    #[test]
    fn out_of_range_order_is_not_found() {
        let fetcher = MockFetcher::new();
        let survey = ready_survey(&fetcher);
        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        let outcome = load(&survey, &cache, &fetcher, -1, 0, LoadFlags::empty());
        assert_eq!(outcome.status, LoadStatus::NotFound(0));
    }
}
