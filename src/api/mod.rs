pub mod payload;

pub use payload::{decode, query_bindings, requested_callback, DecodedRequest};
