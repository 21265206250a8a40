//! hardware cursor on a spare overlay plane
//!
//! The cursor never touches the primary plane: a free overlay plane gets a
//! 16x16 dumb buffer and is repositioned with plain plane updates, so the
//! pointer stays live even when page rendering stalls. Patterns are small
//! hand-editable text bitmaps, two hex digits per pixel (intensity then
//! alpha) with a `+` after the digits marking the focal point.

use drm::buffer::{self, Buffer, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{framebuffer, plane, Device as ControlDevice, FbCmd2Flags, PlaneType};

use crate::display::{plane_has_type, Card, Output};
use crate::error::DeviceError;

pub const CURSOR_WIDTH: u32 = 16;
pub const CURSOR_HEIGHT: u32 = 16;

const CURSOR_ARROW: &str = concat!(
    "00 00 ff ff 00 00 00 00 00 00 00 00 00 00 00 00 ",
    "00 00 ff 0f+ff 00 00 00 00 00 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f ff 00 00 00 00 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f 0f ff 00 00 00 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f ff 00 00 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f ff 00 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f 0f ff 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f 0f 0f ff 00 00 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f ff 00 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f 0f ff 00 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f ff 00 00 ",
    "00 00 ff 0f 0f 0f 0f 0f 0f ff ff ff ff ff 00 00 ",
    "00 00 ff 0f 0f 0f ff 0f 0f ff 00 00 00 00 00 00 ",
    "00 00 ff 0f 0f ff 00 ff 0f 0f ff 00 00 00 00 00 ",
    "00 00 ff 0f ff 00 00 ff 0f 0f ff 00 00 00 00 00 ",
    "00 00 ff ff 00 00 00 00 ff ff 00 00 00 00 00 00 ",
);

const CURSOR_HAND: &str = concat!(
    "00 00 00 00 00 00 ff ff 00 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 ff 0f+0f ff 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 ff 0f 0f ff 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 ff 0f 0f ff 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 ff 0f 0f ff ff ff ff ff 00 00 00 ",
    "00 00 00 00 00 ff 0f 0f ff 0f 0f 0f 0f ff ff 00 ",
    "00 00 ff ff 00 ff 0f 0f ff 0f 0f 0f 0f 0f 0f ff ",
    "00 ff 0f 0f ff ff 0f 0f 0f 0f 0f 0f 0f 0f 0f ff ",
    "00 ff 0f 0f 0f ff 0f 0f 0f 0f 0f 0f 0f 0f 0f ff ",
    "00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f ff ",
    "00 00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f ff ",
    "00 00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f 0f 0f ff 00 ",
    "00 00 00 00 ff 0f 0f 0f 0f 0f 0f 0f 0f 0f ff 00 ",
    "00 00 00 00 00 ff 0f 0f 0f 0f 0f 0f 0f ff 00 00 ",
    "00 00 00 00 00 00 ff 0f 0f 0f 0f ff 0f ff 00 00 ",
    "00 00 00 00 00 00 ff ff ff ff ff 00 ff ff 00 00 ",
);

const CURSOR_IBEAM: &str = concat!(
    "00 00 00 00 0f 0f 00 00 00 00 0f 0f 00 00 00 00 ",
    "00 00 00 00 00 00 0f 00 00 0f 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f+0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 00 0f 0f 00 00 00 00 00 00 00 ",
    "00 00 00 00 00 00 0f 00 00 0f 00 00 00 00 00 00 ",
    "00 00 00 00 0f 0f 00 00 00 00 0f 0f 00 00 00 00 ",
);

/// Pixel layout for one supported plane format.
#[derive(Debug, PartialEq, Eq)]
struct CursorFormat {
    format: DrmFourcc,
    alpha_shift: u32,
    color_shifts: [u32; 3],
}

/// Ordered by preference; the first format a candidate plane supports wins.
const FORMATS: [CursorFormat; 2] = [
    CursorFormat { format: DrmFourcc::Argb8888, alpha_shift: 24, color_shifts: [16, 8, 0] },
    CursorFormat { format: DrmFourcc::Rgba8888, alpha_shift: 0, color_shifts: [24, 16, 8] },
];

pub struct Cursor {
    card: Card,
    crtc: drm::control::crtc::Handle,
    plane: plane::Handle,
    fb: framebuffer::Handle,
    buffer: Option<DumbBuffer>,
    format: &'static CursorFormat,
    /// Identity of the last rendered pattern, to skip redundant redraws.
    pattern: Option<&'static str>,
    focal: (i32, i32),
    pub x: i32,
    pub y: i32,
}

impl Cursor {
    pub fn setup(output: &Output) -> Result<Cursor, DeviceError> {
        let card = output.card.clone();
        let (plane, format) = find_cursor_plane(&card, output)?;
        let buffer = card
            .create_dumb_buffer((CURSOR_WIDTH, CURSOR_HEIGHT), format.format, 32)
            .map_err(DeviceError::CursorBuffer)?;
        let fb = card
            .add_planar_framebuffer(&PlanarCursorBuffer(&buffer), FbCmd2Flags::empty())
            .map_err(DeviceError::AddFramebuffer)?;
        tracing::debug!("cursor on plane {plane:?} format {:?}", format.format);
        Ok(Cursor {
            card,
            crtc: output.crtc,
            plane,
            fb,
            buffer: Some(buffer),
            format,
            pattern: None,
            focal: (0, 0),
            x: 0,
            y: 0,
        })
    }

    /// Render a named pattern into the pixmap. Re-setting the pattern that
    /// is already shown is a no-op by identity, since hit testing can spam
    /// the same name on every pointer move.
    pub fn set_pattern(&mut self, name: &str) -> Result<(), DeviceError> {
        let pattern = resolve_pattern(name)
            .ok_or_else(|| DeviceError::UnknownPattern(name.to_owned()))?;
        if already_shown(self.pattern, pattern) {
            return Ok(());
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        let (pixels, focal) = decode_pattern(pattern, self.format);
        let mut mapping = self
            .card
            .map_dumb_buffer(buffer)
            .map_err(DeviceError::CursorBuffer)?;
        for (chunk, pixel) in mapping.as_mut().chunks_exact_mut(4).zip(&pixels) {
            chunk.copy_from_slice(&pixel.to_le_bytes());
        }
        self.pattern = Some(pattern);
        self.focal = focal;
        Ok(())
    }

    /// Place the plane so the focal pixel sits on the pointer position.
    pub fn move_to(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
        let (px, py) = plane_position(x, y, self.focal);
        if let Err(err) = self.card.set_plane(
            self.plane,
            self.crtc,
            Some(self.fb),
            0,
            (px, py, CURSOR_WIDTH, CURSOR_HEIGHT),
            (0, 0, CURSOR_WIDTH << 16, CURSOR_HEIGHT << 16),
        ) {
            tracing::debug!("cursor plane update failed: {err}");
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // older pi vc4 drm driver would not free the plane without two calls
        for _ in 0..2 {
            let _ = self
                .card
                .set_plane(self.plane, self.crtc, None, 0, (0, 0, 0, 0), (0, 0, 0, 0));
        }
        let _ = self.card.destroy_framebuffer(self.fb);
        if let Some(buffer) = self.buffer.take() {
            let _ = self.card.destroy_dumb_buffer(buffer);
        }
    }
}

/// A usable plane must be reachable from the output's CRTC, currently
/// unassigned, and overlay-typed, and carry a supported format.
fn find_cursor_plane(
    card: &Card,
    output: &Output,
) -> Result<(plane::Handle, &'static CursorFormat), DeviceError> {
    let planes = card
        .plane_handles()
        .map_err(DeviceError::CursorBuffer)?;
    for handle in planes {
        let Ok(info) = card.get_plane(handle) else {
            continue;
        };
        if !output
            .resources
            .filter_crtcs(info.possible_crtcs())
            .contains(&output.crtc)
        {
            continue;
        }
        if info.crtc().is_some() || info.framebuffer().is_some() {
            continue;
        }
        if !plane_has_type(card, handle, PlaneType::Overlay) {
            continue;
        }
        if let Some(format) = FORMATS
            .iter()
            .find(|f| info.formats().contains(&(f.format as u32)))
        {
            return Ok((handle, format));
        }
    }
    Err(DeviceError::NoCursorPlane)
}

/// Single-plane view of the cursor buffer for the fourcc framebuffer ioctl,
/// so the negotiated format reaches the kernel.
struct PlanarCursorBuffer<'a, B>(&'a B);

impl<B: Buffer> PlanarBuffer for PlanarCursorBuffer<'_, B> {
    fn size(&self) -> (u32, u32) {
        self.0.size()
    }

    fn format(&self) -> DrmFourcc {
        self.0.format()
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [self.0.pitch(), 0, 0, 0]
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        [Some(self.0.handle()), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0; 4]
    }
}

fn resolve_pattern(name: &str) -> Option<&'static str> {
    match name {
        "default" => Some(CURSOR_ARROW),
        "pointer" => Some(CURSOR_HAND),
        "text" => Some(CURSOR_IBEAM),
        "hidden" => Some(""),
        _ => None,
    }
}

fn plane_position(x: i32, y: i32, focal: (i32, i32)) -> (i32, i32) {
    (x - focal.0, y - focal.1)
}

/// Identity comparison against the rendered pattern, checked before any
/// buffer mapping so repeated set calls rewrite the pixmap once.
fn already_shown(current: Option<&'static str>, pattern: &'static str) -> bool {
    current.is_some_and(|shown| std::ptr::eq(shown, pattern))
}

/// Two hex digits per pixel, intensity then alpha. The nibble decode keeps
/// the historical wrapping arithmetic for letter digits so existing patterns
/// render byte-identically. A short pattern leaves the tail transparent.
fn decode_pattern(pattern: &str, format: &CursorFormat) -> (Vec<u32>, (i32, i32)) {
    let bytes = pattern.as_bytes();
    let count = (CURSOR_WIDTH * CURSOR_HEIGHT) as usize;
    let mut pixels = Vec::with_capacity(count);
    let mut focal = (0, 0);
    let mut at = 0usize;
    for n in 0..count {
        let mut intensity = 0u8;
        let mut alpha = 0u8;
        if at + 1 < bytes.len() {
            intensity = nibble(bytes[at]);
            alpha = nibble(bytes[at + 1]);
            at += 2;
            if bytes.get(at) == Some(&b'+') {
                focal = ((n as u32 % CURSOR_WIDTH) as i32, (n as u32 / CURSOR_WIDTH) as i32);
            }
            if at < bytes.len() {
                at += 1;
            }
        }
        let i = u32::from(intensity);
        let a = u32::from(alpha);
        pixels.push(
            (a << format.alpha_shift)
                | (i << format.color_shifts[0])
                | (i << format.color_shifts[1])
                | (i << format.color_shifts[2]),
        );
    }
    (pixels, focal)
}

fn nibble(c: u8) -> u8 {
    if c & 0x40 != 0 {
        (c & 15).wrapping_sub(9)
    } else {
        c & 15
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nibble_decoding() {
        assert_eq!(nibble(b'0'), 0);
        assert_eq!(nibble(b'9'), 9);
        // letter digits keep the historical wrapping arithmetic
        assert_eq!(nibble(b'a'), 248);
        assert_eq!(nibble(b'f'), 253);
    }

    #[test]
    fn arrow_focal_point() {
        let (pixels, focal) = decode_pattern(CURSOR_ARROW, &FORMATS[0]);
        assert_eq!(pixels.len(), 256);
        assert_eq!(focal, (3, 1));
        // "00" is fully transparent, "ff" is 0xfd on every byte
        assert_eq!(pixels[0], 0);
        assert_eq!(pixels[2], 0xfdfdfdfd);
        // the focal cell "0f" has zero intensity and wrapped alpha
        assert_eq!(pixels[16 + 3], 0xfd000000);
    }

    #[test]
    fn format_shifts() {
        let (argb, _) = decode_pattern("0f ", &FORMATS[0]);
        let (rgba, _) = decode_pattern("0f ", &FORMATS[1]);
        assert_eq!(argb[0], 0xfd000000);
        assert_eq!(rgba[0], 0x000000fd);
    }

    #[test]
    fn other_focal_points() {
        let (_, hand) = decode_pattern(CURSOR_HAND, &FORMATS[0]);
        let (_, ibeam) = decode_pattern(CURSOR_IBEAM, &FORMATS[0]);
        assert_eq!(hand, (6, 1));
        assert_eq!(ibeam, (7, 7));
    }

    #[test]
    fn hidden_is_blank() {
        let (pixels, focal) = decode_pattern("", &FORMATS[0]);
        assert_eq!(focal, (0, 0));
        assert!(pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn focal_tracks_pointer() {
        assert_eq!(plane_position(100, 80, (3, 1)), (97, 79));
        assert_eq!(plane_position(0, 0, (7, 7)), (-7, -7));
    }

    #[test]
    fn repeated_pattern_is_single_rewrite() {
        let first = resolve_pattern("default").unwrap();
        let second = resolve_pattern("default").unwrap();
        assert!(already_shown(Some(first), second));
        assert!(!already_shown(Some(first), resolve_pattern("pointer").unwrap()));
        assert!(!already_shown(None, first));
    }

    struct TestBuffer;

    impl Buffer for TestBuffer {
        fn size(&self) -> (u32, u32) {
            (CURSOR_WIDTH, CURSOR_HEIGHT)
        }

        fn format(&self) -> DrmFourcc {
            DrmFourcc::Rgba8888
        }

        fn pitch(&self) -> u32 {
            CURSOR_WIDTH * 4
        }

        fn handle(&self) -> buffer::Handle {
            buffer::Handle::from(std::num::NonZeroU32::new(7).unwrap())
        }
    }

    #[test]
    fn framebuffer_carries_negotiated_format() {
        let planar = PlanarCursorBuffer(&TestBuffer);
        assert_eq!(planar.format(), DrmFourcc::Rgba8888);
        assert_eq!(planar.size(), (CURSOR_WIDTH, CURSOR_HEIGHT));
        assert_eq!(planar.pitches(), [CURSOR_WIDTH * 4, 0, 0, 0]);
        assert_eq!(planar.offsets(), [0; 4]);
        assert_eq!(planar.modifier(), None);
        assert!(planar.handles()[0].is_some());
        assert!(planar.handles()[1..].iter().all(Option::is_none));
    }
}
