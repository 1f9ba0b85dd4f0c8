//! docmap: schema-driven mapping between application documents and a
//! key-value store.
//!
//! The codec layer converts typed values to and from the store's JSON
//! documents and flat records. The gateway layer moves those forms in and
//! out of the store, with an atomic replace for flat records.

pub use docmap_codec as codec;
pub use docmap_gateway as gateway;
