//! Hierarchical-tile caching and progressive-refinement engine for pyramidal
//! sky-survey imagery: a bounded, cost-weighted tile cache shared across
//! surveys, asynchronous fetch + decode with parent-memoized 404s, a
//! best-tile resolver with ancestor/all-sky fallback, and a breadth-first
//! pyramid traverser.
//!
//! Deliberately out of scope (see crate-level design notes): the HTTP/asset
//! byte-fetch layer, image codec internals beyond the default JPEG path,
//! the GPU texture upload path, and HEALPix math itself — these are given
//! as interfaces (`fetcher::AssetFetcher`, `codec::DecodeTile`,
//! `texture::TextureUploader`, `projector::Projector`) for a host
//! application to supply or extend.

pub mod cache;
pub mod codec;
pub mod date;
pub mod error;
pub mod fetcher;
pub mod hips_list;
pub mod loader;
pub mod projector;
pub mod properties;
pub mod resolver;
pub mod survey;
pub mod texture;
pub mod tile;
pub mod transform;
pub mod traverse;
pub mod worker;

pub use cache::{CacheStats, EvictDecision, TileCache, DEFAULT_BUDGET_BYTES};
pub use codec::{default_decode_tile, DecodeTile, DecodedImage};
pub use error::{TileEngineError, TileResult};
pub use fetcher::{AssetFetcher, FetchFlags, FetchOutcome, MockFetcher};
pub use loader::{load, LoadFlags, LoadOutcome, LoadStatus};
pub use projector::Projector;
pub use resolver::{resolve, AllSkyCarveCache, ResolveFlags, ResolveOutcome, UvQuad};
pub use survey::{DeleteTile, SurveyDescriptor};
pub use texture::{CountingUploader, TextureUploader};
pub use tile::{LoadResult, TileEntry, TileFlags, TileKey, TilePayload, TilePos};
pub use transform::Mat3;
pub use traverse::{
    desired_order, low_zoom_fallback, render_order_for, render_traverse, traverse,
    TraverseOverflow, VisitResult, HARD_ORDER_CEILING,
};
pub use worker::{AsyncWorker, WorkerStatus};
