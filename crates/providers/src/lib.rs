//! Generation backend implementations for Kestrel.
//!
//! All backends implement the `kestrel_core::Backend` trait.

pub mod http;

pub use http::HttpBackend;
