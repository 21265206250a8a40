//! composition root and event-loop wiring
//!
//! [`Platform`] owns the whole backend and hangs it off a calloop loop:
//! the DRM fd delivers page-flip completions, the libinput fd delivers raw
//! input, and a removable timer drives key repeat. Everything runs on one
//! thread.

use anyhow::{Context, Result};
use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, LoopHandle, LoopSignal, Mode, RegistrationToken};

use crate::config::{Config, Rotation};
use crate::cursor::Cursor;
use crate::display::Output;
use crate::input::{InputDispatcher, RepeatControl, KEY_STARTUP_DELAY};
use crate::remap::PageMap;
use crate::render::{self, DmabufFrame, Renderer};
use crate::view::ViewSurface;

pub struct Platform {
    // field order doubles as teardown order: the cursor plane and the
    // renderer must release before the card goes away
    cursor: Option<Cursor>,
    renderer: Box<dyn Renderer>,
    input: InputDispatcher,
    view: Box<dyn ViewSurface>,
    output: Output,
    pub config: Config,
    handle: LoopHandle<'static, Platform>,
    signal: LoopSignal,
    repeat_token: Option<RegistrationToken>,
}

impl Platform {
    pub fn setup(
        event_loop: &mut EventLoop<'static, Platform>,
        mut config: Config,
        mut view: Box<dyn ViewSurface>,
    ) -> Result<Platform> {
        let output = Output::setup(&config).context("failed to configure display output")?;
        output.export_conn_info();

        let cursor = if config.cursor {
            match Self::setup_cursor(&output) {
                Ok(cursor) => Some(cursor),
                Err(err) => {
                    tracing::warn!("cursor disabled: {err}");
                    None
                }
            }
        } else {
            None
        };

        let mut renderer = render::setup(&output, &config).context("failed to setup renderer")?;
        if renderer.supports_rotation(config.rotation) {
            renderer.set_rotation(config.rotation);
        } else {
            tracing::warn!(
                "renderer '{}' cannot rotate by {} degrees, using 0",
                renderer.name(),
                config.rotation.degrees(),
            );
            config.rotation = Rotation::Rot0;
        }

        let input = InputDispatcher::setup(config.rotation, output.size(), config.device_scale)
            .context("failed to initialize input")?;

        view.set_device_scale(config.device_scale);
        view.set_target_refresh_rate(output.refresh_millihertz());

        renderer.initialize().context("failed to initialize renderer")?;

        let platform = Platform {
            cursor,
            renderer,
            input,
            view,
            output,
            config,
            handle: event_loop.handle(),
            signal: event_loop.get_signal(),
            repeat_token: None,
        };

        let handle = event_loop.handle();
        handle
            .insert_source(
                Generic::new(platform.output.card().clone(), Interest::READ, Mode::Level),
                callbacks::page_flip,
            )
            .map_err(|err| anyhow::anyhow!("failed to register drm source: {err}"))?;
        handle
            .insert_source(
                Generic::new(platform.input.context(), Interest::READ, Mode::Level),
                callbacks::input,
            )
            .map_err(|err| anyhow::anyhow!("failed to register input source: {err}"))?;

        tracing::info!("platform setup complete");
        Ok(platform)
    }

    fn setup_cursor(output: &Output) -> Result<Cursor, crate::error::DeviceError> {
        let mut cursor = Cursor::setup(output)?;
        cursor.set_pattern("default")?;
        let (width, height) = output.size();
        cursor.move_to(width as i32 / 2, height as i32 / 2);
        Ok(cursor)
    }

    /// Hand a frame exported by the view to the active presentation
    /// strategy.
    pub fn present_frame(&mut self, frame: DmabufFrame) {
        if let Err(err) = self.renderer.present(frame) {
            tracing::error!("failed to present frame: {err}");
        }
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        if rotation == self.config.rotation {
            return;
        }
        if self.renderer.set_rotation(rotation) {
            self.config.rotation = rotation;
            self.input.set_rotation(rotation);
        } else {
            tracing::error!(
                "renderer '{}' cannot rotate by {} degrees",
                self.renderer.name(),
                rotation.degrees(),
            );
        }
    }

    pub fn set_device_scale(&mut self, scale: f64) {
        self.config.device_scale = scale;
        self.input.set_device_scale(scale);
        self.view.set_device_scale(scale);
    }

    /// Rebuild the remap table and tweaks for a newly loaded page.
    pub fn page_navigated(&mut self, uri: &str) {
        let map = PageMap::for_uri(uri);
        self.input.cursor_hidden = map.tweak("cursor", 1) == 0;
        self.input.scroll_enabled = map.tweak("scroll", 1) != 0;
        if self.input.cursor_hidden {
            if let Some(cursor) = self.cursor.as_mut() {
                if let Err(err) = cursor.set_pattern("hidden") {
                    tracing::debug!("failed to hide cursor: {err}");
                }
            }
        }
        self.input.set_page_map(map);
    }

    /// Update the cursor shape from hit-test candidates; the first known
    /// name wins, falling back to the hand.
    pub fn set_cursor(&mut self, names: &[&str]) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        for name in names {
            if cursor.set_pattern(name).is_ok() {
                return;
            }
        }
        if let Err(err) = cursor.set_pattern("pointer") {
            tracing::debug!("failed to set cursor: {err}");
        }
    }

    /// Logical view size: the rendered surface scaled by the device scale.
    pub fn surface_size(&self) -> (u32, u32) {
        let (width, height) = self.renderer.surface_size();
        let scale = self.config.device_scale;
        ((width as f64 / scale) as u32, (height as f64 / scale) as u32)
    }

    pub fn signal(&self) -> LoopSignal {
        self.signal.clone()
    }

    fn process_input(&mut self) {
        let Platform { input, cursor, view, .. } = self;
        let control = input.dispatch(view.as_mut(), cursor);
        self.apply_repeat_control(control);
    }

    fn apply_repeat_control(&mut self, control: RepeatControl) {
        match control {
            RepeatControl::Keep => {}
            RepeatControl::Cancel => {
                if let Some(token) = self.repeat_token.take() {
                    self.handle.remove(token);
                }
            }
            RepeatControl::Arm => {
                if let Some(token) = self.repeat_token.take() {
                    self.handle.remove(token);
                }
                let timer = Timer::from_duration(KEY_STARTUP_DELAY);
                match self.handle.insert_source(timer, callbacks::key_repeat) {
                    Ok(token) => self.repeat_token = Some(token),
                    Err(err) => tracing::error!("failed to arm key repeat timer: {err}"),
                }
            }
        }
    }
}

pub mod callbacks {
    use std::io;
    use std::time::Instant;

    use calloop::generic::NoIoDrop;
    use calloop::{PostAction, Readiness};
    use drm::control::{Device as ControlDevice, Event as DrmEvent};
    use input::Libinput;

    use super::*;
    use crate::display::Card;

    pub fn page_flip(
        _: Readiness,
        card: &mut NoIoDrop<Card>,
        platform: &mut Platform,
    ) -> io::Result<PostAction> {
        match card.receive_events() {
            Ok(events) => {
                for event in events {
                    if let DrmEvent::PageFlip(_) = event {
                        platform.renderer.frame_complete();
                        platform.view.frame_displayed();
                    }
                }
            }
            Err(err) => tracing::error!("failed to read drm events: {err}"),
        }
        Ok(PostAction::Continue)
    }

    pub fn input(
        _: Readiness,
        _: &mut NoIoDrop<Libinput>,
        platform: &mut Platform,
    ) -> io::Result<PostAction> {
        platform.process_input();
        Ok(PostAction::Continue)
    }

    pub fn key_repeat(_: Instant, _: &mut (), platform: &mut Platform) -> TimeoutAction {
        let Platform { input, view, .. } = platform;
        match input.repeat_fire(view.as_mut()) {
            Some(delay) => TimeoutAction::ToDuration(delay),
            None => {
                platform.repeat_token = None;
                TimeoutAction::Drop
            }
        }
    }
}
