//! error taxonomy
//!
//! [`DiscoveryError`] and [`InitError`] abort setup. [`ConfigError`] and
//! [`DeviceError`] are reported and the affected feature degrades.

use std::io;

/// Scanning DRM resources found nothing usable. Raised before any state is
/// committed to the device.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no usable drm device found under /dev/dri")]
    NoDevice,
    #[error("no connected connector on the drm device")]
    NoConnector,
    #[error("no usable video mode after applying mode filters")]
    NoMode,
    #[error("no encoder with a bound crtc in its possible-crtc mask")]
    NoCrtc,
    #[error("no primary plane compatible with the chosen crtc")]
    NoPrimaryPlane,
    #[error("drm device error: {0}")]
    Drm(io::Error),
}

/// Bringing up the allocator, EGL, renderer or input stack failed.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to create gbm device: {0}")]
    GbmDevice(io::Error),
    #[error("failed to create gbm surface: {0}")]
    GbmSurface(io::Error),
    #[error("egl: {0}")]
    Egl(String),
    #[error("failed to load gl entry point {0}")]
    GlEntryPoint(&'static str),
    #[error("failed to compile {0} shader")]
    Shader(&'static str),
    #[error("failed to link gl program")]
    Program,
    #[error("failed to assign seat0 to the libinput context")]
    Seat,
    #[error("failed to compile an xkb keymap")]
    Keymap,
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Malformed user-supplied configuration. The offending token is skipped
/// and logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid parameter syntax {0:?}")]
    Syntax(String),
    #[error("invalid parameter {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for parameter {key:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Per-frame or per-ioctl device failures. Degrade the current frame or
/// feature, never abort the backend.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unrecognized buffer format {0:#x}")]
    BadFormat(u32),
    #[error("failed to import dmabuf: {0}")]
    Import(io::Error),
    #[error("failed to create framebuffer: {0}")]
    AddFramebuffer(io::Error),
    #[error("failed to set crtc mode: {0}")]
    ModeSet(io::Error),
    #[error("page flip failed: {0}")]
    PageFlip(io::Error),
    #[error("atomic commit failed: {0}")]
    AtomicCommit(io::Error),
    #[error("missing drm property {0:?}")]
    MissingProperty(&'static str),
    #[error("no usable cursor plane")]
    NoCursorPlane,
    #[error("unknown cursor pattern {0:?}")]
    UnknownPattern(String),
    #[error("failed to create cursor buffer: {0}")]
    CursorBuffer(io::Error),
    #[error("egl: {0}")]
    Egl(String),
}
