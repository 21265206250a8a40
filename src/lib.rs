//! `plinth`, a DRM/KMS presentation backend for kiosk web views
//!
//! Owns the physical display through DRM/KMS, the GPU buffer pipeline
//! through GBM/EGL, raw input through libinput/xkbcommon, and a hardware
//! overlay-plane cursor, all on a single-threaded calloop event loop.
//!
//! [`Platform`] is the composition root; embedders implement
//! [`view::ViewSurface`] and feed exported frames back through
//! [`Platform::present_frame`].

pub mod config;
pub mod cursor;
pub mod display;
pub mod error;
pub mod input;
pub mod platform;
pub mod remap;
pub mod render;
pub mod view;

pub use config::Config;
pub use platform::Platform;
