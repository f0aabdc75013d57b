//! Document persistence contracts and adapters.

pub mod document;
#[cfg(target_arch = "wasm32")]
pub mod local;
