//! Error type for the crate's one hard-`Result` path: `add_manual_tile`
//! (host-driven, one-shot tile installation). The frame-polling paths
//! (`TileLoader::load`, `BestTileResolver::resolve`, `TileCache::get`) do not
//! return `Result` at all — see §4.9 / §7: the foreground loop never
//! propagates errors upward except for logging. Properties and HiPS-list
//! parsing (`properties.rs`, `hips_list.rs`) are deliberately lenient
//! (§4.4: unrecognized keys and malformed values are skipped, not errors),
//! so there is no properties/validation error variant to construct; the
//! crate does no filesystem I/O, so there is no `io::Error` conversion
//! either.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileEngineError {
    #[error("decode failed: {0}")]
    Decode(String),
}

pub type TileResult<T> = Result<T, TileEngineError>;
