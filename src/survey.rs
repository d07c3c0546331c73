//! Survey Descriptor (C4): per-survey metadata, properties acquisition,
//! all-sky image lifecycle, and tile URL synthesis. Grounded in the
//! teacher's `format::SlideMetadata` + `TilePathResolver` split (metadata
//! holder + path synthesis) and `slide_pool`'s lazy load pattern, with the
//! `UNKNOWN -> FETCHING_BYTES -> DECODING -> READY | NOT_AVAILABLE`
//! all-sky state machine modeled after `eosin-platform-eosin`'s
//! `ViewManager::update` (explicit state advanced by an external driver
//! call rather than a spawned task owning its own loop).

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{EvictDecision, TileCache};
use crate::codec::{DecodeTile, DecodedImage};
use crate::date::hips_parse_date;
use crate::error::{TileEngineError, TileResult};
use crate::fetcher::{AssetFetcher, FetchFlags};
use crate::properties::parse_document;
use crate::tile::{TileEntry, TileFlags, TileKey, TilePayload, TilePos};
use crate::worker::{AsyncWorker, WorkerStatus};

const DEFAULT_ORDER_MIN: i32 = 3;
const DEFAULT_TILE_WIDTH: u32 = 256;

/// Host-supplied eviction veto (§6 "Survey-configurable callbacks"). Keyed on
/// `TilePos` rather than the payload itself: `SurveyDescriptor` is not
/// generic over the host's texture type, so it cannot hold a closure over
/// `TileEntry<Tex>` directly. `TilePos` is the one field every `TileEntry<Tex>`
/// carries regardless of `Tex`, and is enough for a host to recognize "this is
/// the tile my renderer is mid-frame with" and veto the drop.
pub type DeleteTile = dyn Fn(TilePos) -> EvictDecision + Send + Sync;

/// FNV-1a 32-bit, chosen over `std`'s `DefaultHasher` (SipHash, randomly
/// seeded per-process) because the cache key must be stable across runs and
/// processes for the same survey URL (§3).
pub fn hash_url(url: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for byte in url.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertiesState {
    NotRequested,
    Fetching,
    Ready,
    Failed,
}

/// §3 "All-sky sub-state".
pub enum AllSkyState {
    Unknown,
    FetchingBytes,
    Decoding(AsyncWorker<Option<(DecodedImage, u8)>>),
    Ready(DecodedImage),
    NotAvailable,
}

impl AllSkyState {
    pub fn is_settled(&self) -> bool {
        matches!(self, AllSkyState::Ready(_) | AllSkyState::NotAvailable)
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        match self {
            AllSkyState::Ready(image) => Some(image),
            _ => None,
        }
    }
}

pub struct SurveyDescriptor {
    pub base_url: String,
    pub hash: u32,
    service_url: String,
    ext: String,
    release_date_mjd: i64,
    properties: HashMap<String, String>,
    properties_state: PropertiesState,
    order_min: i32,
    order_max: Option<i32>,
    tile_width: u32,
    label: String,
    allsky_disabled: bool,
    allsky: AllSkyState,
    decode: Arc<DecodeTile>,
    delete_tile: Option<Arc<DeleteTile>>,
}

impl SurveyDescriptor {
    pub fn new(base_url: impl Into<String>, decode: Arc<DecodeTile>) -> Self {
        let base_url = base_url.into();
        let hash = hash_url(&base_url);
        Self {
            service_url: base_url.clone(),
            base_url,
            hash,
            ext: "jpg".to_string(),
            release_date_mjd: 0,
            properties: HashMap::new(),
            properties_state: PropertiesState::NotRequested,
            order_min: DEFAULT_ORDER_MIN,
            order_max: None,
            tile_width: DEFAULT_TILE_WIDTH,
            label: String::new(),
            allsky_disabled: false,
            allsky: AllSkyState::Unknown,
            decode,
            delete_tile: None,
        }
    }

    /// Registers a host veto consulted by every cache insertion this survey
    /// makes (§4.1, §6). `None` (the default) means every eviction candidate
    /// is dropped unconditionally.
    pub fn set_delete_tile(&mut self, hook: Arc<DeleteTile>) {
        self.delete_tile = Some(hook);
    }

    /// Builds the `on_evict` closure `TileCache::put` expects, consulting
    /// `delete_tile` if one is registered and falling back to unconditional
    /// drop otherwise.
    pub fn on_evict_hook<Tex>(&self) -> impl Fn(&TileEntry<Tex>) -> EvictDecision + Send + 'static {
        let hook = self.delete_tile.clone();
        move |entry: &TileEntry<Tex>| match &hook {
            Some(hook) => hook(entry.position),
            None => EvictDecision::Drop,
        }
    }

    pub fn order_min(&self) -> i32 {
        self.order_min
    }

    pub fn order_max(&self) -> Option<i32> {
        self.order_max
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn allsky(&self) -> &AllSkyState {
        &self.allsky
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn decode_callback(&self) -> Arc<DecodeTile> {
        Arc::clone(&self.decode)
    }

    /// True once properties have arrived and the all-sky sub-state has left
    /// `UNKNOWN`/`FETCHING_BYTES`/`DECODING` (§4.4).
    pub fn is_ready(&self) -> bool {
        self.properties_state == PropertiesState::Ready && self.allsky.is_settled()
    }

    pub fn has_errored(&self) -> bool {
        self.properties_state == PropertiesState::Failed
    }

    /// `"{service_url}/Norder{o}/Dir{(pix/10000)*10000}/Npix{pix}.{ext}"`,
    /// with `?v={release_date_as_int}` appended when the service URL is
    /// HTTP(S) and a release date is known (§4.4, §6).
    pub fn url_for(&self, order: i32, pix: i32, ext: &str) -> String {
        let dir = (pix / 10000) * 10000;
        let mut url = format!(
            "{}/Norder{}/Dir{}/Npix{}.{}",
            self.service_url, order, dir, pix, ext
        );
        let is_http = self.service_url.starts_with("http://") || self.service_url.starts_with("https://");
        if is_http && self.release_date_mjd != 0 {
            url.push_str(&format!("?v={}", self.release_date_mjd));
        }
        url
    }

    fn properties_url(&self) -> String {
        format!("{}/properties", self.service_url)
    }

    fn allsky_url(&self) -> String {
        format!(
            "{}/Norder{}/Allsky.{}?v={}",
            self.service_url, self.order_min, self.ext, self.release_date_mjd
        )
    }

    /// Installs a pre-supplied tile directly into the cache, bypassing the
    /// Loader (§4.4). Used to seed the 12 all-sky pseudo-tiles at order -1;
    /// those always get an empty payload regardless of `bytes` (§3
    /// invariant) and never fail. For any other order, `bytes` (if given) is
    /// run through the survey's decode callback synchronously; unlike the
    /// frame-polled Loader/Resolver paths, this is a one-shot call the host
    /// makes directly, so a decode failure is reported back as a hard
    /// `Err` rather than only a `LOAD_ERROR` flag.
    pub fn add_manual_tile<Tex>(
        &self,
        cache: &TileCache<Tex>,
        order: i32,
        pix: i32,
        bytes: Option<&[u8]>,
    ) -> TileResult<()> {
        let key = TileKey::new(self.hash, order, pix);
        if order == -1 {
            cache.put(
                key,
                TileEntry::empty(TilePos::new(order, pix)),
                0,
                self.on_evict_hook(),
            );
            return Ok(());
        }

        match bytes.and_then(|b| (self.decode)(b)) {
            Some((image, transparency)) => {
                let cost = image.cost();
                let mut flags = TileFlags::empty();
                for i in 0..4 {
                    if transparency & (1 << i) != 0 {
                        flags |= TileFlags::no_child(i);
                    }
                }
                let entry = TileEntry::with_payload(
                    TilePos::new(order, pix),
                    TilePayload::Decoded(image),
                    flags,
                );
                cache.put(key, entry, cost, self.on_evict_hook());
                Ok(())
            }
            None => {
                let mut entry = TileEntry::empty(TilePos::new(order, pix));
                entry.flags |= TileFlags::LOAD_ERROR;
                cache.put(key, entry, 0, self.on_evict_hook());
                Err(TileEngineError::Decode(format!(
                    "manual tile ({order}, {pix}) failed to decode"
                )))
            }
        }
    }

    /// Applies the recognized properties keys (§4.4 table).
    fn apply_properties(&mut self, pairs: Vec<(String, String)>) {
        for (key, value) in &pairs {
            match key.as_str() {
                "hips_order" => {
                    if let Ok(v) = value.parse() {
                        self.order_max = Some(v);
                    }
                }
                "hips_order_min" => {
                    if let Ok(v) = value.parse() {
                        self.order_min = v;
                    }
                }
                "hips_tile_width" => {
                    if let Ok(v) = value.parse() {
                        self.tile_width = v;
                    }
                }
                "hips_release_date" => {
                    self.release_date_mjd = hips_parse_date(value);
                }
                "hips_tile_format" => {
                    let ext = pick_tile_format(value);
                    match ext {
                        Some("eph") => {
                            self.ext = "eph".to_string();
                            self.allsky_disabled = true;
                        }
                        Some(ext) => self.ext = ext.to_string(),
                        None => tracing::warn!(value, "unrecognized hips_tile_format"),
                    }
                }
                "obs_collection" => self.label = value.clone(),
                "obs_title" if self.label.is_empty() => self.label = value.clone(),
                // `hips_service_url`: deliberately ignored — see §9 "Open
                // question" (retained commented-out upstream over HTTP/HTTPS
                // switching concerns). TODO: revisit if that concern is
                // ever resolved upstream.
                _ => {}
            }
        }
        self.properties = pairs.into_iter().collect();
        if self.label.is_empty() {
            self.label = self.base_url.clone();
        }
    }

    /// Advances the properties-acquisition and all-sky state machines by
    /// one tick. Call once per frame from the foreground thread.
    pub fn update<Tex>(&mut self, fetcher: &dyn AssetFetcher, cache: &TileCache<Tex>) {
        self.tick_properties(fetcher);
        if self.properties_state == PropertiesState::Ready {
            self.tick_allsky(fetcher, cache);
        }
    }

    fn tick_properties(&mut self, fetcher: &dyn AssetFetcher) {
        match self.properties_state {
            PropertiesState::NotRequested => {
                fetcher.fetch(&self.properties_url(), FetchFlags::empty());
                self.properties_state = PropertiesState::Fetching;
            }
            PropertiesState::Fetching => {
                let outcome = fetcher.fetch(&self.properties_url(), FetchFlags::empty());
                match outcome.status {
                    0 | 598 => {}
                    200 => {
                        if let Some(data) = outcome.data {
                            match std::str::from_utf8(&data) {
                                Ok(text) => {
                                    self.apply_properties(parse_document(text));
                                    self.properties_state = PropertiesState::Ready;
                                }
                                Err(_) => {
                                    tracing::warn!(url = %self.properties_url(), "properties not valid utf-8");
                                    self.properties_state = PropertiesState::Failed;
                                }
                            }
                        } else {
                            self.properties_state = PropertiesState::Failed;
                        }
                        fetcher.release(&self.properties_url());
                    }
                    _ => {
                        tracing::warn!(url = %self.properties_url(), status = outcome.status, "properties fetch failed");
                        self.properties_state = PropertiesState::Failed;
                        fetcher.release(&self.properties_url());
                    }
                }
            }
            PropertiesState::Ready | PropertiesState::Failed => {}
        }
    }

    fn tick_allsky<Tex>(&mut self, fetcher: &dyn AssetFetcher, cache: &TileCache<Tex>) {
        if self.allsky_disabled {
            self.allsky = AllSkyState::NotAvailable;
            return;
        }
        match &self.allsky {
            AllSkyState::Unknown => {
                fetcher.fetch(&self.allsky_url(), FetchFlags::empty());
                self.allsky = AllSkyState::FetchingBytes;
            }
            AllSkyState::FetchingBytes => {
                let outcome = fetcher.fetch(&self.allsky_url(), FetchFlags::empty());
                match outcome.status {
                    0 | 598 => {}
                    200 => {
                        if let Some(data) = outcome.data {
                            let decode = Arc::clone(&self.decode);
                            let worker = AsyncWorker::start(move || decode(&data));
                            self.allsky = AllSkyState::Decoding(worker);
                        } else {
                            self.allsky = AllSkyState::NotAvailable;
                        }
                        fetcher.release(&self.allsky_url());
                    }
                    _ => {
                        self.allsky = AllSkyState::NotAvailable;
                        fetcher.release(&self.allsky_url());
                    }
                }
            }
            AllSkyState::Decoding(worker) => {
                if worker.poll() == WorkerStatus::Done {
                    match worker.take().flatten() {
                        Some((image, _transparency)) => {
                            for i in 0..12 {
                                // order == -1 never decodes, so this can't fail.
                                let _ = self.add_manual_tile(cache, -1, i, None);
                            }
                            self.allsky = AllSkyState::Ready(image);
                        }
                        None => {
                            tracing::warn!(url = %self.allsky_url(), "all-sky decode failed");
                            self.allsky = AllSkyState::NotAvailable;
                        }
                    }
                }
            }
            AllSkyState::Ready(_) | AllSkyState::NotAvailable => {}
        }
    }
}

fn pick_tile_format(value: &str) -> Option<&'static str> {
    value
        .split_whitespace()
        .find_map(|candidate| match candidate {
            "webp" => Some("webp"),
            "jpeg" | "jpg" => Some("jpg"),
            "png" => Some("png"),
            "eph" => Some("eph"),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::default_decode_tile;

    fn survey() -> SurveyDescriptor {
        SurveyDescriptor::new("http://example.org/survey", Arc::new(default_decode_tile))
    }

    #[test]
    fn url_for_has_no_query_without_release_date() {
        let s = survey();
        assert_eq!(
            s.url_for(3, 12345, "jpg"),
            "http://example.org/survey/Norder3/Dir10000/Npix12345.jpg"
        );
    }

    #[test]
    fn url_for_appends_release_date_query_for_http() {
        let mut s = survey();
        s.release_date_mjd = 58849;
        assert_eq!(
            s.url_for(3, 5, "jpg"),
            "http://example.org/survey/Norder3/Dir0/Npix5.jpg?v=58849"
        );
    }

    #[test]
    fn pick_tile_format_prefers_recognized_token() {
        assert_eq!(pick_tile_format("webp jpeg png"), Some("webp"));
        assert_eq!(pick_tile_format("jpeg png"), Some("jpg"));
        assert_eq!(pick_tile_format("gif bogus"), None);
    }

    #[test]
    fn hash_url_is_stable_across_calls() {
        assert_eq!(hash_url("http://a/b"), hash_url("http://a/b"));
        assert_ne!(hash_url("http://a/b"), hash_url("http://a/c"));
    }

    #[test]
    fn add_manual_tile_allsky_pseudo_order_never_fails() {
        let s = survey();
        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        assert!(s.add_manual_tile(&cache, -1, 3, None).is_ok());
        assert!(cache.get(TileKey::new(s.hash, -1, 3)).is_some());
    }

    #[test]
    fn delete_tile_hook_vetoes_eviction_over_budget() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let mut s = survey();
        let consulted = Arc::new(AtomicBool::new(false));
        let consulted_clone = Arc::clone(&consulted);
        s.set_delete_tile(Arc::new(move |_pos| {
            consulted_clone.store(true, Ordering::SeqCst);
            EvictDecision::Keep
        }));

        let cache: TileCache<u64> = TileCache::new(10);
        cache.put(
            TileKey::new(s.hash, 3, 0),
            TileEntry::empty(TilePos::new(3, 0)),
            100,
            s.on_evict_hook(),
        );
        cache.put(
            TileKey::new(s.hash, 3, 1),
            TileEntry::empty(TilePos::new(3, 1)),
            100,
            s.on_evict_hook(),
        );

        assert!(consulted.load(Ordering::SeqCst));
        assert!(cache.contains(TileKey::new(s.hash, 3, 0)));
        assert!(cache.contains(TileKey::new(s.hash, 3, 1)));
    }

    #[test]
    fn add_manual_tile_reports_decode_failure() {
        fn always_fails(_bytes: &[u8]) -> Option<(DecodedImage, u8)> {
            None
        }
        let s = SurveyDescriptor::new("http://example.org/survey", Arc::new(always_fails));
        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        let err = s
            .add_manual_tile(&cache, 3, 0, Some(b"bytes"))
            .unwrap_err();
        assert!(matches!(err, TileEngineError::Decode(_)));
        let entry = cache
            .get(TileKey::new(s.hash, 3, 0))
            .expect("entry installed even on decode failure");
        assert!(entry.flags.contains(TileFlags::LOAD_ERROR));
    }
}
