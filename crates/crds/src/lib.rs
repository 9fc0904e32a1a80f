//! HelloWorld CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the HelloWorld controller.

pub mod hello_world;

pub use hello_world::*;
