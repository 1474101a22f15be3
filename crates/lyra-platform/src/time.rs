//! Async sleep used by retry loops.
//!
//! On native: [`tokio::time::sleep`].
//! On wasm32: resolves immediately, the browser loader applies its own
//! retry timing.

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::time::sleep;

#[cfg(target_arch = "wasm32")]
pub async fn sleep(_duration: std::time::Duration) {}
