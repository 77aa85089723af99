//! Runtime proxy type synthesis for dependency injection containers
//!
//! The crate is layered bottom-up:
//!
//!   - [`types`]: types, methods, and fields that generated code refers to
//!   - [`il`]: instruction catalog, encoder, method skeletons, and the interpreter backend
//!   - [`cache`]: concurrent cache guaranteeing at most one build per key
//!   - [`proxy`]: proxy factory, interceptor pipeline, and the [`proxy::ProxyGenerator`] facade

pub mod cache;
pub mod il;
pub mod proxy;
pub mod types;
pub mod util;
