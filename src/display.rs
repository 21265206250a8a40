//! DRM device discovery and mode selection
//!
//! Walks `/dev/dri/card*` for a node with readable mode resources, then picks
//! a connected connector, a video mode, the encoder-bound CRTC and a primary
//! plane. The resulting [`Output`] is the anchor everything else (renderer,
//! cursor, page-flip source) hangs off.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::Arc;

use drm::control::{
    connector, crtc, encoder, plane, property, Device as ControlDevice, Mode, ModeTypeFlags,
    PlaneType, ResourceHandle, ResourceHandles,
};
use drm::{ClientCapability, Device};

use crate::config::{Config, ModeLimit};
use crate::error::DiscoveryError;

/// Shared DRM file descriptor. Clones are cheap and feed calloop sources and
/// the GBM device.
#[derive(Debug, Clone)]
pub struct Card(Arc<File>);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

impl Card {
    pub fn open(path: &Path) -> io::Result<Card> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Card(Arc::new(file)))
    }
}

/// The display hardware this backend drives.
pub struct Output {
    pub(crate) card: Card,
    pub(crate) resources: ResourceHandles,
    pub(crate) connector: connector::Info,
    pub(crate) mode: Mode,
    pub(crate) crtc: crtc::Handle,
    pub(crate) plane: plane::Handle,
    pub(crate) atomic: bool,
}

impl Output {
    pub fn setup(config: &Config) -> Result<Output, DiscoveryError> {
        let card = probe_card()?;

        // plane-type queries need universal planes on both commit paths
        card.set_client_capability(ClientCapability::UniversalPlanes, true)
            .map_err(DiscoveryError::Drm)?;
        let mut atomic = config.atomic_modesetting;
        if atomic {
            if let Err(err) = card.set_client_capability(ClientCapability::Atomic, true) {
                tracing::debug!("atomic modesetting unavailable, using legacy commits: {err}");
                atomic = false;
            }
        }

        let resources = card.resource_handles().map_err(DiscoveryError::Drm)?;
        let connector = resources
            .connectors()
            .iter()
            .filter_map(|handle| card.get_connector(*handle, false).ok())
            .find(|info| info.state() == connector::State::Connected)
            .ok_or(DiscoveryError::NoConnector)?;

        let mode = *pick_mode(connector.modes(), config.mode.as_deref(), config.mode_max.as_ref())
            .ok_or(DiscoveryError::NoMode)?;
        let crtc = pick_crtc(&card, &resources)?;
        let plane = primary_plane(&card, &resources, crtc)?;

        let (width, height) = mode.size();
        tracing::info!(
            "output {:?} mode {}x{}@{} atomic={atomic}",
            connector.interface(),
            width,
            height,
            mode.vrefresh(),
        );

        Ok(Output { card, resources, connector, mode, crtc, plane, atomic })
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn size(&self) -> (u32, u32) {
        let (width, height) = self.mode.size();
        (width.into(), height.into())
    }

    /// Refresh rate reported to the view, in millihertz.
    pub fn refresh_millihertz(&self) -> u32 {
        self.mode.vrefresh() * 1000
    }

    /// Publish `fd:connector_id` for sibling processes that need to reach
    /// the same output.
    pub fn export_conn_info(&self) {
        let connector_id: u32 = self.connector.handle().into();
        let info = format!("{}:{}", self.card.0.as_raw_fd(), connector_id);
        std::env::set_var("PLINTH_DRM_CONN_INFO", &info);
        tracing::debug!("exported connection info {info}");
    }
}

fn probe_card() -> Result<Card, DiscoveryError> {
    for index in 0..16 {
        let path = format!("/dev/dri/card{index}");
        let Ok(card) = Card::open(Path::new(&path)) else {
            continue;
        };
        if card.resource_handles().is_ok() {
            tracing::debug!("using drm node {path}");
            return Ok(card);
        }
    }
    Err(DiscoveryError::NoDevice)
}

/// First encoder whose currently bound CRTC also appears in its
/// possible-CRTC mask.
fn pick_crtc(card: &Card, resources: &ResourceHandles) -> Result<crtc::Handle, DiscoveryError> {
    for handle in resources.encoders() {
        let Ok(info) = card.get_encoder(*handle) else {
            continue;
        };
        if let Some(crtc) = crtc_for_encoder(resources, &info) {
            return Ok(crtc);
        }
    }
    Err(DiscoveryError::NoCrtc)
}

fn crtc_for_encoder(resources: &ResourceHandles, encoder: &encoder::Info) -> Option<crtc::Handle> {
    let bound = encoder.crtc()?;
    resources
        .filter_crtcs(encoder.possible_crtcs())
        .contains(&bound)
        .then_some(bound)
}

fn primary_plane(
    card: &Card,
    resources: &ResourceHandles,
    crtc: crtc::Handle,
) -> Result<plane::Handle, DiscoveryError> {
    let planes = card.plane_handles().map_err(DiscoveryError::Drm)?;
    planes
        .into_iter()
        .find(|&handle| {
            let Ok(info) = card.get_plane(handle) else {
                return false;
            };
            resources.filter_crtcs(info.possible_crtcs()).contains(&crtc)
                && plane_has_type(card, handle, PlaneType::Primary)
        })
        .ok_or(DiscoveryError::NoPrimaryPlane)
}

pub(crate) fn plane_has_type(card: &Card, plane: plane::Handle, kind: PlaneType) -> bool {
    let Ok(props) = card.get_properties(plane) else {
        return false;
    };
    for (&id, &value) in props.iter() {
        let Ok(info) = card.get_property(id) else {
            continue;
        };
        if info.name().to_bytes() == b"type" {
            return value == kind as u64;
        }
    }
    false
}

pub(crate) fn properties_by_name<H: ResourceHandle>(
    card: &Card,
    handle: H,
) -> io::Result<HashMap<String, property::Info>> {
    card.get_properties(handle)?.as_hashmap(card)
}

/// The subset of [`Mode`] that mode selection looks at, so the policy is
/// testable without kernel mode structs.
pub trait ModeCandidate {
    fn size(&self) -> (u32, u32);
    fn refresh(&self) -> u32;
    fn preferred(&self) -> bool;
    fn label(&self) -> String;
}

impl ModeCandidate for Mode {
    fn size(&self) -> (u32, u32) {
        let (width, height) = Mode::size(self);
        (width.into(), height.into())
    }

    fn refresh(&self) -> u32 {
        self.vrefresh()
    }

    fn preferred(&self) -> bool {
        self.mode_type().contains(ModeTypeFlags::PREFERRED)
    }

    fn label(&self) -> String {
        self.name().to_string_lossy().into_owned()
    }
}

/// Filter by exact name and by the `WxH[@R]` caps, then take the first
/// PREFERRED survivor, else the largest area. Ties keep the first seen.
pub fn pick_mode<'m, M: ModeCandidate>(
    modes: &'m [M],
    requested: Option<&str>,
    max: Option<&ModeLimit>,
) -> Option<&'m M> {
    let mut best: Option<&M> = None;
    let mut best_area = 0u64;
    for mode in modes {
        let (width, height) = mode.size();
        if let Some(name) = requested {
            if mode.label() != name {
                continue;
            }
        }
        if let Some(limit) = max {
            if limit.width != 0 && width > limit.width {
                continue;
            }
            if limit.height != 0 && height > limit.height {
                continue;
            }
            if limit.refresh != 0 && mode.refresh() > limit.refresh {
                continue;
            }
        }
        if mode.preferred() {
            return Some(mode);
        }
        let area = u64::from(width) * u64::from(height);
        if area > best_area {
            best_area = area;
            best = Some(mode);
        }
    }
    best
}

#[cfg(test)]
mod test {
    use super::*;

    struct TestMode {
        width: u32,
        height: u32,
        refresh: u32,
        preferred: bool,
    }

    impl TestMode {
        fn new(width: u32, height: u32, refresh: u32) -> TestMode {
            TestMode { width, height, refresh, preferred: false }
        }

        fn preferred(mut self) -> TestMode {
            self.preferred = true;
            self
        }
    }

    impl ModeCandidate for TestMode {
        fn size(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn refresh(&self) -> u32 {
            self.refresh
        }

        fn preferred(&self) -> bool {
            self.preferred
        }

        fn label(&self) -> String {
            format!("{}x{}", self.width, self.height)
        }
    }

    #[test]
    fn preferred_wins_over_area() {
        let modes = [
            TestMode::new(3840, 2160, 30),
            TestMode::new(1920, 1080, 60).preferred(),
            TestMode::new(2560, 1440, 60),
        ];
        let picked = pick_mode(&modes, None, None).unwrap();
        assert_eq!(picked.size(), (1920, 1080));
    }

    #[test]
    fn max_area_when_none_preferred() {
        let modes = [
            TestMode::new(1280, 720, 60),
            TestMode::new(2560, 1440, 60),
            TestMode::new(1920, 1080, 60),
        ];
        let picked = pick_mode(&modes, None, None).unwrap();
        assert_eq!(picked.size(), (2560, 1440));
    }

    #[test]
    fn area_tie_keeps_first_seen() {
        let modes = [
            TestMode::new(1920, 1080, 60),
            TestMode::new(1920, 1080, 144),
        ];
        let picked = pick_mode(&modes, None, None).unwrap();
        assert_eq!(picked.refresh(), 60);
    }

    #[test]
    fn name_filter() {
        let modes = [
            TestMode::new(2560, 1440, 60).preferred(),
            TestMode::new(1280, 720, 60),
        ];
        let picked = pick_mode(&modes, Some("1280x720"), None).unwrap();
        assert_eq!(picked.size(), (1280, 720));
        assert!(pick_mode(&modes, Some("640x480"), None).is_none());
    }

    #[test]
    fn caps_filter_preferred_too() {
        let limit = ModeLimit { width: 1920, height: 1080, refresh: 60 };
        let modes = [
            TestMode::new(3840, 2160, 60).preferred(),
            TestMode::new(1920, 1080, 144),
            TestMode::new(1920, 1080, 60),
            TestMode::new(1280, 720, 60),
        ];
        let picked = pick_mode(&modes, None, Some(&limit)).unwrap();
        assert_eq!(picked.size(), (1920, 1080));
        assert_eq!(picked.refresh(), 60);
    }

    #[test]
    fn zero_cap_leaves_axis_unbounded() {
        let limit = ModeLimit { width: 0, height: 1080, refresh: 0 };
        let modes = [
            TestMode::new(2560, 1440, 60),
            TestMode::new(3840, 1080, 144),
        ];
        let picked = pick_mode(&modes, None, Some(&limit)).unwrap();
        assert_eq!(picked.size(), (3840, 1080));
    }
}
