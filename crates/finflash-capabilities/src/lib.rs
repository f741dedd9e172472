//! Capability adapters for FinFlash
//!
//! Each task kind is executed by a [`finflash_core::Capability`]. This crate
//! provides the adapters the binary wires into the registry:
//!
//! - [`FnCapability`] wraps a closure
//! - [`PassthroughCapability`] collects content already present in the request
//! - [`HttpCapability`] delegates to an external analysis service over JSON/HTTP

pub mod function;
pub mod http;
pub mod passthrough;

pub use function::FnCapability;
pub use http::{EndpointConfig, HttpCapability};
pub use passthrough::PassthroughCapability;
