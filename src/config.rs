//! runtime configuration
//!
//! Defaults come from the environment, then `PLINTH_PARAMS` applies
//! `key=value` overrides. A bad token is logged and skipped so a typo never
//! takes the kiosk down.

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererKind {
    /// Scan out the exported buffer directly on the primary plane.
    #[default]
    Modeset,
    /// Draw the exported buffer as a textured quad through GLES2.
    Gles,
}

impl RendererKind {
    pub fn name(self) -> &'static str {
        match self {
            RendererKind::Modeset => "modeset",
            RendererKind::Gles => "gles",
        }
    }
}

/// Output rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

impl Rotation {
    pub fn from_index(index: u64) -> Option<Rotation> {
        match index {
            0 => Some(Rotation::Rot0),
            1 => Some(Rotation::Rot90),
            2 => Some(Rotation::Rot180),
            3 => Some(Rotation::Rot270),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            Rotation::Rot0 => 0,
            Rotation::Rot90 => 1,
            Rotation::Rot180 => 2,
            Rotation::Rot270 => 3,
        }
    }

    pub fn degrees(self) -> u32 {
        self.index() * 90
    }

    /// Width and height trade places at 90 and 270 degrees.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Rot90 | Rotation::Rot270)
    }
}

/// Upper bounds for mode selection, `WxH[@R]`. A zero component leaves that
/// axis uncapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeLimit {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl ModeLimit {
    pub fn parse(text: &str) -> Option<ModeLimit> {
        let (size, refresh) = match text.split_once('@') {
            Some((size, refresh)) => (size, refresh.parse().ok()?),
            None => (text, 0),
        };
        let (width, height) = size.split_once('x')?;
        Some(ModeLimit {
            width: width.parse().ok()?,
            height: height.parse().ok()?,
            refresh,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub renderer: RendererKind,
    pub rotation: Rotation,
    pub atomic_modesetting: bool,
    pub device_scale: f64,
    /// Exact mode name to select, e.g. `1920x1080`.
    pub mode: Option<String>,
    pub mode_max: Option<ModeLimit>,
    pub cursor: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            renderer: RendererKind::default(),
            rotation: Rotation::default(),
            atomic_modesetting: true,
            device_scale: 1.0,
            mode: std::env::var("PLINTH_DRM_VIDEO_MODE").ok(),
            mode_max: mode_max_env(),
            cursor: env("PLINTH_DRM_CURSOR"),
        }
    }
}

impl Config {
    pub fn setup() -> Config {
        let mut config = Config::default();
        if let Ok(params) = std::env::var("PLINTH_PARAMS") {
            config.apply_params(&params);
        }
        config
    }

    pub fn apply_params(&mut self, params: &str) {
        for param in params.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Err(err) = self.apply_param(param) {
                tracing::warn!("{err}");
            }
        }
    }

    fn apply_param(&mut self, param: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = param.split_once('=') else {
            return Err(ConfigError::Syntax(param.to_owned()));
        };
        let (key, value) = (key.trim(), value.trim());
        let invalid = |key| ConfigError::InvalidValue { key, value: value.to_owned() };
        match key {
            "renderer" => {
                self.renderer = match value {
                    "modeset" => RendererKind::Modeset,
                    "gles" => RendererKind::Gles,
                    _ => return Err(invalid("renderer")),
                };
            }
            "rotation" => {
                self.rotation = value
                    .parse()
                    .ok()
                    .and_then(Rotation::from_index)
                    .ok_or(invalid("rotation"))?;
            }
            "disable-atomic-modesetting" => {
                self.atomic_modesetting =
                    !parse_bool(value).ok_or(invalid("disable-atomic-modesetting"))?;
            }
            "device-scale-factor" => {
                let scale: f64 = value.parse().map_err(|_| invalid("device-scale-factor"))?;
                if !scale.is_finite() || scale <= 0.0 {
                    return Err(invalid("device-scale-factor"));
                }
                self.device_scale = scale;
            }
            "mode" => self.mode = Some(value.to_owned()),
            "mode-max" => {
                self.mode_max = Some(ModeLimit::parse(value).ok_or(invalid("mode-max"))?);
            }
            "cursor" => self.cursor = parse_bool(value).ok_or(invalid("cursor"))?,
            _ => return Err(ConfigError::UnknownKey(key.to_owned())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn mode_max_env() -> Option<ModeLimit> {
    let text = std::env::var("PLINTH_DRM_MODE_MAX").ok()?;
    let limit = ModeLimit::parse(&text);
    if limit.is_none() {
        tracing::warn!("invalid PLINTH_DRM_MODE_MAX {text:?}, caps not applied");
    }
    limit
}

fn env(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(params: &str) -> Config {
        let mut config = Config {
            renderer: RendererKind::Modeset,
            rotation: Rotation::Rot0,
            atomic_modesetting: true,
            device_scale: 1.0,
            mode: None,
            mode_max: None,
            cursor: false,
        };
        config.apply_params(params);
        config
    }

    #[test]
    fn params() {
        let parsed = config("renderer=gles,rotation=2,device-scale-factor=1.5,cursor=1");
        assert_eq!(parsed.renderer, RendererKind::Gles);
        assert_eq!(parsed.rotation, Rotation::Rot180);
        assert_eq!(parsed.device_scale, 1.5);
        assert!(parsed.cursor);
    }

    #[test]
    fn atomic_opt_out() {
        assert!(!config("disable-atomic-modesetting=1").atomic_modesetting);
        assert!(config("disable-atomic-modesetting=0").atomic_modesetting);
    }

    #[test]
    fn bad_token_skipped() {
        let parsed = config("rotation=7,renderer=gles,bogus,device-scale-factor=-2");
        assert_eq!(parsed.rotation, Rotation::Rot0);
        assert_eq!(parsed.renderer, RendererKind::Gles);
        assert_eq!(parsed.device_scale, 1.0);
    }

    #[test]
    fn mode_limit() {
        assert_eq!(
            ModeLimit::parse("1920x1080@60"),
            Some(ModeLimit { width: 1920, height: 1080, refresh: 60 })
        );
        assert_eq!(
            ModeLimit::parse("1280x720"),
            Some(ModeLimit { width: 1280, height: 720, refresh: 0 })
        );
        assert_eq!(ModeLimit::parse("1080p"), None);
    }

    #[test]
    fn rotation_axes() {
        assert!(Rotation::Rot90.swaps_axes());
        assert!(Rotation::Rot270.swaps_axes());
        assert!(!Rotation::Rot180.swaps_axes());
        assert_eq!(Rotation::from_index(4), None);
    }
}
