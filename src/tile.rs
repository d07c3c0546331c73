//! Tile addressing: position, cache key, flags, and cache entry.

use bitflags::bitflags;

use crate::codec::DecodedImage;
use crate::worker::AsyncWorker;

/// The opaque per-tile payload (§3): starts as the CPU-side decoded image,
/// replaced by a GPU texture handle the first time the resolver uploads it
/// (§4.6 step 8), which then drops the CPU-side buffer. `Tex` is whatever
/// handle type the host's `TextureUploader` produces.
pub enum TilePayload<Tex> {
    Decoded(DecodedImage),
    Uploaded(Tex),
}

impl<Tex> TilePayload<Tex> {
    pub fn as_decoded(&self) -> Option<&DecodedImage> {
        match self {
            TilePayload::Decoded(image) => Some(image),
            TilePayload::Uploaded(_) => None,
        }
    }

    pub fn as_uploaded(&self) -> Option<&Tex> {
        match self {
            TilePayload::Decoded(_) => None,
            TilePayload::Uploaded(tex) => Some(tex),
        }
    }
}

/// A HEALPix quad-tree address. `order == -1` denotes an all-sky pseudo-tile;
/// `pix` then ranges over the 12 base faces instead of `12 * 4^order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    pub order: i32,
    pub pix: i32,
}

impl TilePos {
    pub fn new(order: i32, pix: i32) -> Self {
        Self { order, pix }
    }

    pub fn is_allsky(&self) -> bool {
        self.order == -1
    }

    /// The tile's parent, or `None` at the all-sky pseudo-level.
    pub fn parent(&self) -> Option<TilePos> {
        if self.order <= -1 {
            None
        } else {
            Some(TilePos::new(self.order - 1, self.pix / 4))
        }
    }

    /// Which of the parent's four quadrants this tile occupies (0..=3).
    pub fn quadrant(&self) -> i32 {
        self.pix % 4
    }
}

/// Cache key: partitions the shared cache across surveys without requiring
/// pointer identity. `survey_hash` is a stable 32-bit hash of the survey's
/// base URL, computed once at survey construction (see `survey::hash_url`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub survey_hash: u32,
    pub order: i32,
    pub pix: i32,
}

impl TileKey {
    pub fn new(survey_hash: u32, order: i32, pix: i32) -> Self {
        Self {
            survey_hash,
            order,
            pix,
        }
    }

    pub fn position(&self) -> TilePos {
        TilePos::new(self.order, self.pix)
    }
}

bitflags! {
    /// Per-tile bit set. The four `NO_CHILD` bits memoize a definitive
    /// 404 on the corresponding child quadrant; never set speculatively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TileFlags: u8 {
        const NO_CHILD_0 = 0b0000_0001;
        const NO_CHILD_1 = 0b0000_0010;
        const NO_CHILD_2 = 0b0000_0100;
        const NO_CHILD_3 = 0b0000_1000;
        const LOAD_ERROR = 0b0001_0000;
    }
}

impl TileFlags {
    /// The `NO_CHILD_i` bit for quadrant `i` (0..=3).
    pub fn no_child(i: i32) -> TileFlags {
        TileFlags::from_bits_truncate(1 << (i & 0b11))
    }

    pub fn has_no_child(&self, i: i32) -> bool {
        self.contains(TileFlags::no_child(i))
    }
}

/// An in-cache tile. `loader` is present iff a decode is in flight, in which
/// case `payload` must be empty (§3 invariant). The background job always
/// produces a raw `DecodedImage` regardless of the cache's texture-handle
/// type `Tex` — uploading to a GPU texture only happens later, on the
/// foreground thread (§4.6 step 8).
pub struct TileEntry<Tex> {
    pub position: TilePos,
    pub flags: TileFlags,
    pub payload: Option<TilePayload<Tex>>,
    pub loader: Option<AsyncWorker<LoadResult>>,
}

impl<Tex> TileEntry<Tex> {
    pub fn empty(position: TilePos) -> Self {
        Self {
            position,
            flags: TileFlags::empty(),
            payload: None,
            loader: None,
        }
    }

    pub fn with_payload(position: TilePos, payload: TilePayload<Tex>, flags: TileFlags) -> Self {
        Self {
            position,
            flags,
            payload: Some(payload),
            loader: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_some()
    }
}

/// Result a background decode job hands back through its `AsyncWorker`.
pub struct LoadResult {
    pub payload: Option<DecodedImage>,
    pub cost: usize,
    pub transparency: u8,
}
