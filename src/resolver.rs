//! Best-Tile Resolver (C6): always hands the renderer *something* to draw —
//! a projector and a UV quad, even absent a loaded tile — falling back to a
//! loaded ancestor or the survey's all-sky image. Grounded in the teacher's
//! `prefetch::PrefetchCalculator` level-selection idiom plus `format.rs`'s
//! coordinate bookkeeping, combined here with the matrix walk transform.rs
//! provides.

use bitflags::bitflags;

use crate::cache::TileCache;
use crate::codec::DecodedImage;
use crate::fetcher::AssetFetcher;
use crate::loader::{self, LoadFlags, LoadStatus};
use crate::projector::Projector;
use crate::survey::SurveyDescriptor;
use crate::texture::TextureUploader;
use crate::tile::{TileKey, TilePayload, TilePos};
use crate::transform::Mat3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResolveFlags: u8 {
        /// Inside-viewing winding (e.g. a planet surface) rather than the
        /// default outside-viewing sky winding.
        const PLANET = 0b0001;
        const FORCE_USE_ALLSKY = 0b0010;
        const LOAD_IN_THREAD = 0b0100;
        const CACHED_ONLY = 0b1000;
    }
}

impl ResolveFlags {
    fn to_load_flags(self) -> LoadFlags {
        let mut out = LoadFlags::empty();
        if self.contains(ResolveFlags::FORCE_USE_ALLSKY) {
            out |= LoadFlags::FORCE_USE_ALLSKY;
        }
        if self.contains(ResolveFlags::LOAD_IN_THREAD) {
            out |= LoadFlags::LOAD_IN_THREAD;
        }
        if self.contains(ResolveFlags::CACHED_ONLY) {
            out |= LoadFlags::CACHED_ONLY;
        }
        out
    }
}

/// Four UV corners, in the winding order §4.6 step 1 specifies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvQuad {
    pub corners: [(f64, f64); 4],
}

impl UvQuad {
    const SKY: UvQuad = UvQuad {
        corners: [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)],
    };
    const PLANET: UvQuad = UvQuad {
        corners: [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)],
    };

    fn default_for(flags: ResolveFlags) -> UvQuad {
        if flags.contains(ResolveFlags::PLANET) {
            UvQuad::PLANET
        } else {
            UvQuad::SKY
        }
    }

    fn transform_by(&self, m: &Mat3) -> UvQuad {
        UvQuad {
            corners: self.corners.map(|c| m.apply(c)),
        }
    }
}

pub struct ResolveOutcome<Handle> {
    pub texture: Option<Handle>,
    pub uv: UvQuad,
    pub projector: Projector,
    pub fade: f32,
    pub loading_complete: bool,
}

impl<Handle> ResolveOutcome<Handle> {
    fn defaults(order: i32, pix: i32, flags: ResolveFlags) -> Self {
        Self {
            texture: None,
            uv: UvQuad::default_for(flags),
            projector: Projector::for_tile(order, pix),
            fade: 1.0,
            loading_complete: false,
        }
    }
}

/// An all-sky sub-rectangle already carved and uploaded for `(order_min,
/// pix)`, so a second `resolve` call for the same base pixel doesn't re-carve
/// and re-upload (§4.6 step 9's "no all-sky sub-texture has yet been carved").
pub struct AllSkyCarveCache<Handle> {
    order_min: i32,
    pix: i32,
    handle: Handle,
}

/// `resolve(survey, order, pix, flags)` (§4.6). `uploader` lazily uploads a
/// decoded image the first time a texture is actually needed; `carved`
/// remembers a prior all-sky carve for the same tile across calls.
pub fn resolve<U: TextureUploader>(
    survey: &SurveyDescriptor,
    cache: &TileCache<U::Handle>,
    fetcher: &dyn AssetFetcher,
    uploader: &U,
    order: i32,
    pix: i32,
    flags: ResolveFlags,
    carved: &mut Option<AllSkyCarveCache<U::Handle>>,
) -> ResolveOutcome<U::Handle> {
    // Step 1-2.
    if !survey.is_ready() {
        return ResolveOutcome::defaults(order, pix, flags);
    }

    let load_flags = flags.to_load_flags();

    // Step 3.
    let outcome = loader::load(survey, cache, fetcher, order, pix, load_flags);
    if let LoadStatus::NotFound(status) | LoadStatus::Error(status) = outcome.status {
        if status != 598 {
            let mut result = ResolveOutcome::defaults(order, pix, flags);
            result.loading_complete = true;
            return result;
        }
    }

    // Step 4: ancestor fallback.
    let mut o = order;
    let mut p = pix;
    let mut m = Mat3::IDENTITY;
    let mut found_key = if outcome.status == LoadStatus::Ok {
        outcome.key
    } else {
        None
    };

    while found_key.is_none() && o > survey.order_min() {
        let t = Mat3::child_transform(p % 4);
        m = m.mul(&t);
        o -= 1;
        p /= 4;

        if survey.order_max().map_or(true, |max| o <= max) {
            let ancestor = loader::load(survey, cache, fetcher, o, p, load_flags.difference(LoadFlags::LOAD_IN_THREAD));
            if let LoadStatus::Ok = ancestor.status {
                found_key = ancestor.key;
            }
        }
    }

    // Step 5.
    let Some(key) = found_key else {
        return ResolveOutcome::defaults(order, pix, flags);
    };

    // Step 6.
    let at_floor = o == order.min(survey.order_max().unwrap_or(order));
    let loading_complete = at_floor;

    // Step 7.
    let uv = UvQuad::default_for(flags).transform_by(&m);

    // Step 8: lazily upload.
    let texture = upload_if_needed(cache, uploader, key);

    // Step 9-10: all-sky carve.
    let texture = if texture.is_none()
        && flags.contains(ResolveFlags::FORCE_USE_ALLSKY)
        && o == survey.order_min()
    {
        allsky_texture(survey, uploader, o, p, carved)
    } else {
        texture
    };

    ResolveOutcome {
        texture,
        uv,
        projector: Projector::for_tile(o, p),
        fade: 1.0,
        loading_complete,
    }
}

fn upload_if_needed<U: TextureUploader>(
    cache: &TileCache<U::Handle>,
    uploader: &U,
    key: TileKey,
) -> Option<U::Handle> {
    let mut guard = cache.get(key)?;
    match guard.payload.take() {
        Some(TilePayload::Uploaded(handle)) => {
            let out = handle.clone();
            guard.payload = Some(TilePayload::Uploaded(handle));
            Some(out)
        }
        Some(TilePayload::Decoded(image)) => {
            let handle = uploader.upload(&image);
            guard.payload = Some(TilePayload::Uploaded(handle.clone()));
            Some(handle)
        }
        None => None,
    }
}

/// Carves the `(col, row)` sub-rectangle out of the all-sky image (§4.6 step
/// 9, §6 "All-sky file") and uploads it, caching the result so repeated
/// resolves for the same base pixel don't re-carve.
fn allsky_texture<U: TextureUploader>(
    survey: &SurveyDescriptor,
    uploader: &U,
    order_min: i32,
    pix: i32,
    carved: &mut Option<AllSkyCarveCache<U::Handle>>,
) -> Option<U::Handle> {
    if let Some(existing) = carved {
        if existing.order_min == order_min && existing.pix == pix {
            return Some(existing.handle.clone());
        }
    }

    let image = survey.allsky().image()?;
    let n = ((12u64 << (2 * order_min.max(0))) as f64).sqrt().floor() as u32;
    if n == 0 {
        return None;
    }
    let cell = image.width / n;
    let col = pix as u32 % n;
    let row = pix as u32 / n;
    let sub = carve_subrect(image, col, row, cell);
    let handle = uploader.upload(&sub);
    *carved = Some(AllSkyCarveCache {
        order_min,
        pix,
        handle: handle.clone(),
    });
    Some(handle)
}

fn carve_subrect(image: &DecodedImage, col: u32, row: u32, cell: u32) -> DecodedImage {
    let bpp = image.bpp as usize;
    let stride = image.width as usize * bpp;
    let mut data = Vec::with_capacity(cell as usize * cell as usize * bpp);
    let x0 = (col * cell) as usize;
    let y0 = (row * cell) as usize;
    for y in y0..y0 + cell as usize {
        let row_start = y * stride + x0 * bpp;
        data.extend_from_slice(&image.data[row_start..row_start + cell as usize * bpp]);
    }
    DecodedImage {
        data: bytes::Bytes::from(data),
        width: cell,
        height: cell,
        bpp: image.bpp,
    }
}
