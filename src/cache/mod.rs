//! Cache Module
//!
//! Typed, tag-aware caching over a [`KvStore`](crate::store::KvStore):
//! key building, compression, the engine itself, stampede protection and
//! the cache-aside wrapper.

mod aside;
mod codec;
mod engine;
mod events;
mod guard;
mod keys;
mod registry;


// Re-export public types
pub use aside::{AsideOptions, CacheAside, CacheAwareOperation, FallbackPolicy};
pub use codec::{CompressedEnvelope, CompressionCodec, EncodedPayload};
pub use engine::{CacheEngine, DELETE_BATCH_SIZE};
pub use events::{BusStats, CacheEvent, CacheEventKind, EngineEvent, EventBus};
pub use guard::StampedeGuard;
pub use keys::{is_plain_segment, KeyBuilder, KEY_SEPARATOR, LOCK_PREFIX};
pub use registry::{default_types, CacheTypeConfig, TypeOverride, TypeRegistry};
