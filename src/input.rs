//! raw input pipeline
//!
//! libinput (seat0 via udev) feeds keyboard, pointer and touch events
//! through xkb translation, the page remap table, the fixed binding table
//! and a key-repeat state machine, then into the view. The backend polls
//! the libinput fd from the calloop loop and calls [`InputDispatcher::dispatch`]
//! on readiness.

use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use input::event::device::DeviceEvent;
use input::event::keyboard::{KeyState, KeyboardEvent, KeyboardEventTrait, KeyboardKeyEvent};
use input::event::pointer::{
    Axis, ButtonState, PointerButtonEvent, PointerEvent as LiPointerEvent, PointerEventTrait,
    PointerScrollEvent, PointerScrollWheelEvent,
};
use input::event::touch::{
    TouchEvent as LiTouchEvent, TouchEventPosition, TouchEventSlot, TouchEventTrait,
};
use input::event::{Event, EventTrait};
use input::{Device, DeviceCapability, Libinput, LibinputInterface};
use xkbcommon::xkb;

use crate::config::Rotation;
use crate::cursor::Cursor;
use crate::error::InitError;
use crate::remap::{PageMap, POINTER_KEY_BASE};
use crate::view::{
    ActivityState, AxisEvent, BindingAction, KeyEvent, Modifiers, PointerEvent, PointerEventKind,
    TouchPoint, TouchPointType, ViewSurface,
};

pub const MAX_TOUCH_SLOTS: usize = 10;

/// Delay before a held key starts repeating, then the steady interval.
pub const KEY_STARTUP_DELAY: Duration = Duration::from_millis(500);
pub const KEY_REPEAT_DELAY: Duration = Duration::from_millis(100);

const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;
const BTN_MIDDLE: u32 = 0x112;

/// What the loop should do with the repeat timer after a dispatch batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatControl {
    #[default]
    Keep,
    /// (Re)start the timer at [`KEY_STARTUP_DELAY`].
    Arm,
    Cancel,
}

struct Interface;

impl LibinputInterface for Interface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        OpenOptions::new()
            .custom_flags(flags)
            .read(true)
            .write((flags & libc::O_WRONLY != 0) | (flags & libc::O_RDWR != 0))
            .open(path)
            .map(Into::into)
            .map_err(|err| err.raw_os_error().unwrap_or(-1))
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(File::from(fd));
    }
}

struct KeyboardState {
    state: xkb::State,
    _keymap: xkb::Keymap,
    _context: xkb::Context,
}

impl KeyboardState {
    fn new() -> Result<KeyboardState, InitError> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap =
            xkb::Keymap::new_from_names(&context, "", "", "", "", None, xkb::KEYMAP_COMPILE_NO_FLAGS)
                .ok_or(InitError::Keymap)?;
        let state = xkb::State::new(&keymap);
        Ok(KeyboardState { state, _keymap: keymap, _context: context })
    }

    fn modifiers(&self) -> Modifiers {
        let mut mods = Modifiers::empty();
        let effective = xkb::STATE_MODS_EFFECTIVE;
        if self.state.mod_name_is_active(xkb::MOD_NAME_CTRL, effective) {
            mods |= Modifiers::CONTROL;
        }
        if self.state.mod_name_is_active(xkb::MOD_NAME_SHIFT, effective) {
            mods |= Modifiers::SHIFT;
        }
        if self.state.mod_name_is_active(xkb::MOD_NAME_ALT, effective) {
            mods |= Modifiers::ALT;
        }
        if self.state.mod_name_is_active(xkb::MOD_NAME_LOGO, effective) {
            mods |= Modifiers::META;
        }
        mods
    }
}

/// Remap filter, binding filter and the repeat state machine for one logical
/// key stream.
#[derive(Default)]
struct KeyRouter {
    remap: PageMap,
    staged: Option<KeyEvent>,
    control: RepeatControl,
}

impl KeyRouter {
    /// Returns `false` when `must_remap` is set and the table did not match,
    /// so pointer buttons can fall through to normal button dispatch.
    ///
    /// A no-repeat event neither stages itself nor clears an already staged
    /// repeat; only a release, gating loss or timer exhaustion disarms it.
    fn route(&mut self, mut event: KeyEvent, must_remap: bool, view: &mut dyn ViewSurface) -> bool {
        let mut key = event.key;
        let mut mods = event.modifiers.bits();
        let outcome = self.remap.remap(&mut key, &mut mods);
        if !outcome.matched && must_remap {
            return false;
        }
        event.key = key;
        event.modifiers = Modifiers::from_bits_retain(mods);

        let mut repeat = outcome.repeat;
        let mut gobble = outcome.gobble;
        if event.pressed {
            if let Some(action) = binding_for(&event) {
                if view.handle_binding(action) {
                    repeat = false;
                    gobble = true;
                }
            }
        }
        if !gobble {
            view.dispatch_key_event(&event);
        }
        if repeat {
            if !event.pressed {
                self.clear();
            } else if self.staged != Some(event) {
                self.staged = Some(event);
                self.control = RepeatControl::Arm;
            }
        }
        true
    }

    /// Timer callback. Redispatches the staged event and asks for the steady
    /// interval, or `None` once nothing is staged.
    fn repeat_fire(&mut self, view: &mut dyn ViewSurface) -> Option<Duration> {
        let event = self.staged?;
        view.dispatch_key_event(&event);
        Some(KEY_REPEAT_DELAY)
    }

    fn clear(&mut self) {
        self.staged = None;
        self.control = RepeatControl::Cancel;
    }
}

/// The fixed shortcut table, pressed events only, exact modifier match.
fn binding_for(event: &KeyEvent) -> Option<BindingAction> {
    use xkb::Keysym;

    let sym = Keysym::new(event.key);
    let mods = event.modifiers;

    if sym == Keysym::XF86_HomePage {
        return Some(BindingAction::HistoryHome);
    }
    if mods == Modifiers::CONTROL {
        return match sym {
            Keysym::w => Some(BindingAction::Quit),
            Keysym::plus => Some(BindingAction::ZoomIn),
            Keysym::minus => Some(BindingAction::ZoomOut),
            Keysym::_0 => Some(BindingAction::ZoomReset),
            Keysym::r => Some(BindingAction::Reload),
            _ => None,
        };
    }
    if mods == Modifiers::ALT {
        return match sym {
            Keysym::Left => Some(BindingAction::HistoryBack),
            Keysym::Right => Some(BindingAction::HistoryForward),
            _ => None,
        };
    }
    if mods == (Modifiers::CONTROL | Modifiers::SHIFT) && sym == Keysym::R {
        return Some(BindingAction::ReloadBypassCache);
    }
    if sym == Keysym::F5 {
        if mods.is_empty() {
            return Some(BindingAction::Reload);
        }
        if mods == Modifiers::SHIFT {
            return Some(BindingAction::ReloadBypassCache);
        }
    }
    None
}

/// Touch slots mirror the kernel's seat slots; a FRAME flushes the whole
/// table as one event.
struct TouchTable {
    points: Vec<TouchPoint>,
    last_kind: TouchPointType,
    last_id: i32,
}

impl TouchTable {
    fn new() -> TouchTable {
        TouchTable {
            points: vec![TouchPoint::default(); MAX_TOUCH_SLOTS],
            last_kind: TouchPointType::Null,
            last_id: 0,
        }
    }

    /// Out-of-range slots are dropped entirely.
    fn record(&mut self, slot: usize, kind: TouchPointType, time: u32, position: Option<(i32, i32)>) {
        let Some(point) = self.points.get_mut(slot) else {
            return;
        };
        self.last_kind = kind;
        self.last_id = slot as i32;
        point.kind = kind;
        point.time = time;
        point.id = slot as i32;
        if let Some((x, y)) = position {
            point.x = x;
            point.y = y;
        }
    }

    fn flush(&mut self, time: u32, view: &mut dyn ViewSurface) {
        let event = crate::view::TouchEvent {
            kind: self.last_kind,
            id: self.last_id,
            time,
            points: self.points.clone(),
        };
        view.dispatch_touch_event(&event);
        for point in &mut self.points {
            if point.kind == TouchPointType::Up {
                *point = TouchPoint::default();
            }
        }
    }
}

pub struct InputDispatcher {
    context: Libinput,
    keyboard: KeyboardState,
    router: KeyRouter,
    touch: TouchTable,
    rotatable: Vec<Device>,
    rotation: Rotation,
    /// Physical mode size; pointer coordinates clamp against this.
    screen: (u32, u32),
    /// Rotation-adjusted size used to transform touch positions.
    input_size: (u32, u32),
    device_scale: f64,
    pointer: (i32, i32),
    /// Button modifier remembered across events so drags carry it.
    held: Modifiers,
    pub cursor_hidden: bool,
    pub scroll_enabled: bool,
}

impl InputDispatcher {
    pub fn setup(
        rotation: Rotation,
        screen: (u32, u32),
        device_scale: f64,
    ) -> Result<InputDispatcher, InitError> {
        let mut context = Libinput::new_with_udev(Interface);
        context.udev_assign_seat("seat0").map_err(|()| InitError::Seat)?;
        let keyboard = KeyboardState::new()?;
        tracing::debug!("libinput context on seat0");
        Ok(InputDispatcher {
            context,
            keyboard,
            router: KeyRouter::default(),
            touch: TouchTable::new(),
            rotatable: Vec::new(),
            rotation,
            screen,
            input_size: logical_size(screen, rotation),
            device_scale,
            pointer: ((screen.0 / 2) as i32, (screen.1 / 2) as i32),
            held: Modifiers::empty(),
            cursor_hidden: false,
            scroll_enabled: true,
        })
    }

    /// The libinput context is refcounted; clones share the same fd for
    /// calloop registration.
    pub fn context(&self) -> Libinput {
        self.context.clone()
    }

    pub fn set_page_map(&mut self, map: PageMap) {
        self.router.remap = map;
    }

    pub fn set_device_scale(&mut self, scale: f64) {
        self.device_scale = scale;
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
        self.input_size = logical_size(self.screen, rotation);
        for device in &mut self.rotatable {
            configure_rotation(device, rotation);
        }
    }

    /// Drain the libinput queue. Events are dropped while the view is not
    /// both visible and focused, which also disarms any staged repeat.
    pub fn dispatch(
        &mut self,
        view: &mut dyn ViewSurface,
        cursor: &mut Option<Cursor>,
    ) -> RepeatControl {
        self.router.control = RepeatControl::Keep;
        let mut context = self.context.clone();
        if let Err(err) = context.dispatch() {
            tracing::warn!("libinput dispatch failed: {err}");
            return RepeatControl::Keep;
        }
        for event in &mut context {
            let state = view.activity_state();
            if !state.contains(ActivityState::VISIBLE | ActivityState::FOCUSED) {
                self.router.clear();
                continue;
            }
            self.handle_event(event, view, cursor);
        }
        self.router.control
    }

    /// Repeat-timer callback; `None` means the timer should be dropped.
    pub fn repeat_fire(&mut self, view: &mut dyn ViewSurface) -> Option<Duration> {
        self.router.repeat_fire(view)
    }

    fn handle_event(
        &mut self,
        event: Event,
        view: &mut dyn ViewSurface,
        cursor: &mut Option<Cursor>,
    ) {
        match event {
            Event::Device(DeviceEvent::Added(added)) => self.device_added(added.device()),
            Event::Device(DeviceEvent::Removed(removed)) => {
                let device = removed.device();
                self.rotatable.retain(|known| *known != device);
            }
            Event::Keyboard(KeyboardEvent::Key(key)) => self.on_key(&key, view),
            Event::Pointer(pointer) => self.on_pointer(pointer, view, cursor),
            Event::Touch(touch) => self.on_touch(touch, view),
            _ => {}
        }
    }

    fn device_added(&mut self, mut device: Device) {
        tracing::debug!("input device added: {}", device.name());
        if needs_rotation_config(&device) {
            configure_rotation(&mut device, self.rotation);
            self.rotatable.push(device);
        }
    }

    fn on_key(&mut self, event: &KeyboardKeyEvent, view: &mut dyn ViewSurface) {
        // evdev keycodes are offset by 8 in xkb keymaps
        let keycode = xkb::Keycode::new(event.key() + 8);
        let pressed = event.key_state() == KeyState::Pressed;
        // translate with the pre-update state, then fold the key in
        let keysym = self.keyboard.state.key_get_one_sym(keycode);
        let direction = if pressed { xkb::KeyDirection::Down } else { xkb::KeyDirection::Up };
        self.keyboard.state.update_key(keycode, direction);
        let key_event = KeyEvent {
            time: event.time(),
            key: keysym.raw(),
            hardware_key: keycode.raw(),
            pressed,
            modifiers: self.keyboard.modifiers(),
        };
        self.router.route(key_event, false, view);
    }

    fn on_pointer(
        &mut self,
        event: LiPointerEvent,
        view: &mut dyn ViewSurface,
        cursor: &mut Option<Cursor>,
    ) {
        match event {
            LiPointerEvent::Motion(motion) => {
                let (x, y) = (self.pointer.0 + motion.dx() as i32, self.pointer.1 + motion.dy() as i32);
                self.motion_to(x, y, motion.time(), view, cursor);
            }
            LiPointerEvent::MotionAbsolute(motion) => {
                let x = motion.absolute_x_transformed(self.screen.0) as i32;
                let y = motion.absolute_y_transformed(self.screen.1) as i32;
                self.motion_to(x, y, motion.time(), view, cursor);
            }
            LiPointerEvent::Button(button) => self.on_button(&button, view),
            LiPointerEvent::ScrollWheel(wheel) => self.on_scroll_wheel(&wheel, view),
            LiPointerEvent::ScrollFinger(finger) => self.on_scroll_smooth(&finger, view),
            LiPointerEvent::ScrollContinuous(continuous) => self.on_scroll_smooth(&continuous, view),
            _ => {}
        }
    }

    fn motion_to(
        &mut self,
        x: i32,
        y: i32,
        time: u32,
        view: &mut dyn ViewSurface,
        cursor: &mut Option<Cursor>,
    ) {
        if self.cursor_hidden {
            return;
        }
        let x = x.clamp(0, self.screen.0 as i32 - 1);
        let y = y.clamp(0, self.screen.1 as i32 - 1);
        self.pointer = (x, y);
        if let Some(cursor) = cursor.as_mut() {
            cursor.move_to(x, y);
        }
        let dragging = !self.held.is_empty();
        view.dispatch_pointer_event(&PointerEvent {
            kind: PointerEventKind::Motion,
            time,
            x,
            y,
            button: dragging.into(),
            state: dragging.into(),
            modifiers: self.held,
        });
    }

    fn on_button(&mut self, event: &PointerButtonEvent, view: &mut dyn ViewSurface) {
        let raw = event.button();
        let pressed = event.button_state() == ButtonState::Pressed;
        let time = event.time();

        // pages may claim buttons through the remap table's private range
        if raw > 0 {
            let key_event = KeyEvent {
                time,
                key: POINTER_KEY_BASE + raw,
                hardware_key: raw,
                pressed,
                modifiers: Modifiers::empty(),
            };
            if self.router.route(key_event, true, view) {
                return;
            }
        }

        let (button, modifier) = match raw {
            BTN_LEFT => (1, Modifiers::BUTTON1),
            BTN_RIGHT => (2, Modifiers::BUTTON2),
            BTN_MIDDLE => (3, Modifiers::BUTTON3),
            _ => (0, Modifiers::empty()),
        };
        view.dispatch_pointer_event(&PointerEvent {
            kind: PointerEventKind::Button,
            time,
            x: self.pointer.0,
            y: self.pointer.1,
            button,
            state: pressed.into(),
            modifiers: modifier,
        });
        self.held = if pressed { modifier } else { Modifiers::empty() };
    }

    fn on_scroll_wheel(&mut self, event: &PointerScrollWheelEvent, view: &mut dyn ViewSurface) {
        if !self.scroll_enabled {
            return;
        }
        let mut axis = self.axis_event(false, event.time());
        if event.has_axis(Axis::Vertical) {
            axis.y_axis = -self.device_scale * event.scroll_value_v120(Axis::Vertical);
        }
        if event.has_axis(Axis::Horizontal) {
            axis.x_axis = self.device_scale * event.scroll_value_v120(Axis::Horizontal);
        }
        view.dispatch_axis_event(&axis);
    }

    fn on_scroll_smooth<E>(&mut self, event: &E, view: &mut dyn ViewSurface)
    where
        E: PointerScrollEvent + PointerEventTrait,
    {
        if self.cursor_hidden || !self.scroll_enabled {
            return;
        }
        let mut axis = self.axis_event(true, event.time());
        if event.has_axis(Axis::Vertical) {
            axis.y_axis = self.device_scale * event.scroll_value(Axis::Vertical);
        }
        if event.has_axis(Axis::Horizontal) {
            axis.x_axis = self.device_scale * event.scroll_value(Axis::Horizontal);
        }
        view.dispatch_axis_event(&axis);
    }

    fn axis_event(&self, smooth: bool, time: u32) -> AxisEvent {
        AxisEvent {
            smooth,
            time,
            x: self.pointer.0,
            y: self.pointer.1,
            x_axis: 0.0,
            y_axis: 0.0,
        }
    }

    fn on_touch(&mut self, event: LiTouchEvent, view: &mut dyn ViewSurface) {
        let (width, height) = self.input_size;
        match event {
            LiTouchEvent::Down(down) => {
                let position = (
                    down.x_transformed(width) as i32,
                    down.y_transformed(height) as i32,
                );
                self.touch.record(
                    down.seat_slot() as usize,
                    TouchPointType::Down,
                    down.time(),
                    Some(position),
                );
            }
            LiTouchEvent::Motion(motion) => {
                let position = (
                    motion.x_transformed(width) as i32,
                    motion.y_transformed(height) as i32,
                );
                self.touch.record(
                    motion.seat_slot() as usize,
                    TouchPointType::Motion,
                    motion.time(),
                    Some(position),
                );
            }
            LiTouchEvent::Up(up) => {
                self.touch
                    .record(up.seat_slot() as usize, TouchPointType::Up, up.time(), None);
            }
            LiTouchEvent::Frame(frame) => self.touch.flush(frame.time(), view),
            LiTouchEvent::Cancel(_) => {}
            _ => {}
        }
    }
}

/// Pointer-class devices that expose rotation config follow the output's
/// rotation so their coordinate space matches the panel.
fn needs_rotation_config(device: &Device) -> bool {
    const CAPS: [DeviceCapability; 5] = [
        DeviceCapability::Gesture,
        DeviceCapability::Pointer,
        DeviceCapability::TabletPad,
        DeviceCapability::TabletTool,
        DeviceCapability::Touch,
    ];
    CAPS.iter().any(|cap| device.has_capability(*cap)) && device.config_rotation_is_available()
}

fn configure_rotation(device: &mut Device, rotation: Rotation) {
    match device.config_rotation_set_angle(rotation.degrees()) {
        Ok(()) => tracing::debug!("rotated '{}' to {} degrees", device.name(), rotation.degrees()),
        Err(err) => tracing::debug!("cannot rotate '{}': {err:?}", device.name()),
    }
}

fn logical_size(screen: (u32, u32), rotation: Rotation) -> (u32, u32) {
    if rotation.swaps_axes() {
        (screen.1, screen.0)
    } else {
        screen
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::view::TouchEvent;

    #[derive(Default)]
    struct RecordingView {
        keys: Vec<KeyEvent>,
        bindings: Vec<BindingAction>,
        touches: Vec<TouchEvent>,
        consume_bindings: bool,
    }

    impl ViewSurface for RecordingView {
        fn activity_state(&self) -> ActivityState {
            ActivityState::VISIBLE | ActivityState::FOCUSED
        }

        fn dispatch_key_event(&mut self, event: &KeyEvent) {
            self.keys.push(*event);
        }

        fn dispatch_pointer_event(&mut self, _event: &PointerEvent) {}

        fn dispatch_axis_event(&mut self, _event: &AxisEvent) {}

        fn dispatch_touch_event(&mut self, event: &TouchEvent) {
            self.touches.push(event.clone());
        }

        fn handle_binding(&mut self, action: BindingAction) -> bool {
            self.bindings.push(action);
            self.consume_bindings
        }
    }

    fn key(sym: u32, pressed: bool, modifiers: Modifiers) -> KeyEvent {
        KeyEvent { time: 1000, key: sym, hardware_key: 38, pressed, modifiers }
    }

    #[test]
    fn plain_key_dispatches_and_arms_repeat() {
        let mut router = KeyRouter::default();
        let mut view = RecordingView::default();
        let event = key('a' as u32, true, Modifiers::empty());
        assert!(router.route(event, false, &mut view));
        assert_eq!(view.keys.len(), 1);
        assert_eq!(router.control, RepeatControl::Arm);
        assert_eq!(router.staged, Some(event));
    }

    #[test]
    fn release_disarms_repeat() {
        let mut router = KeyRouter::default();
        let mut view = RecordingView::default();
        router.route(key('a' as u32, true, Modifiers::empty()), false, &mut view);
        router.route(key('a' as u32, false, Modifiers::empty()), false, &mut view);
        assert_eq!(router.staged, None);
        assert_eq!(router.control, RepeatControl::Cancel);
        // both press and release reached the view
        assert_eq!(view.keys.len(), 2);
    }

    #[test]
    fn repeat_fire_redispatches_staged() {
        let mut router = KeyRouter::default();
        let mut view = RecordingView::default();
        router.route(key('a' as u32, true, Modifiers::empty()), false, &mut view);
        assert_eq!(router.repeat_fire(&mut view), Some(KEY_REPEAT_DELAY));
        assert_eq!(view.keys.len(), 2);
        router.clear();
        assert_eq!(router.repeat_fire(&mut view), None);
    }

    #[test]
    fn consumed_binding_gobbles_and_never_repeats() {
        let mut router = KeyRouter::default();
        let mut view = RecordingView { consume_bindings: true, ..Default::default() };
        let event = key(xkb::Keysym::w.raw(), true, Modifiers::CONTROL);
        router.route(event, false, &mut view);
        assert_eq!(view.bindings, [BindingAction::Quit]);
        assert!(view.keys.is_empty());
        assert_eq!(router.staged, None);
        assert_eq!(router.control, RepeatControl::Keep);
    }

    #[test]
    fn declined_binding_still_dispatches() {
        let mut router = KeyRouter::default();
        let mut view = RecordingView::default();
        router.route(key(xkb::Keysym::F5.raw(), true, Modifiers::empty()), false, &mut view);
        assert_eq!(view.bindings, [BindingAction::Reload]);
        assert_eq!(view.keys.len(), 1);
    }

    #[test]
    fn remap_to_null_gobbles() {
        let mut router = KeyRouter { remap: PageMap::parse("60:0=0:0"), ..Default::default() };
        let mut view = RecordingView::default();
        router.route(key(60, true, Modifiers::empty()), false, &mut view);
        assert!(view.keys.is_empty());
        assert_eq!(router.staged, None);
    }

    #[test]
    fn no_repeat_flag_skips_staging() {
        let mut router = KeyRouter { remap: PageMap::parse("30=40!"), ..Default::default() };
        let mut view = RecordingView::default();
        router.route(key(30, true, Modifiers::empty()), false, &mut view);
        assert_eq!(view.keys[0].key, 40);
        assert_eq!(router.staged, None);
        assert_eq!(router.control, RepeatControl::Keep);
    }

    #[test]
    fn no_repeat_event_leaves_staged_repeat() {
        let mut router = KeyRouter { remap: PageMap::parse("30=40!"), ..Default::default() };
        let mut view = RecordingView::default();
        let staged = key('a' as u32, true, Modifiers::empty());
        router.route(staged, false, &mut view);
        router.route(key(30, true, Modifiers::empty()), false, &mut view);
        assert_eq!(router.staged, Some(staged));
        assert_eq!(router.control, RepeatControl::Arm);
    }

    #[test]
    fn unmatched_button_remap_falls_through() {
        let mut router = KeyRouter::default();
        let mut view = RecordingView::default();
        let event = key(POINTER_KEY_BASE + BTN_LEFT, true, Modifiers::empty());
        assert!(!router.route(event, true, &mut view));
        assert!(view.keys.is_empty());
    }

    #[test]
    fn matched_button_remap_dispatches_as_key() {
        let mut router =
            KeyRouter { remap: PageMap::parse("0xf110=13"), ..Default::default() };
        let mut view = RecordingView::default();
        let event = key(POINTER_KEY_BASE + BTN_LEFT, true, Modifiers::empty());
        assert!(router.route(event, true, &mut view));
        assert_eq!(view.keys[0].key, 13);
    }

    #[test]
    fn binding_table() {
        use xkb::Keysym;
        let pressed = |sym: Keysym, mods| key(sym.raw(), true, mods);
        assert_eq!(binding_for(&pressed(Keysym::plus, Modifiers::CONTROL)), Some(BindingAction::ZoomIn));
        assert_eq!(binding_for(&pressed(Keysym::minus, Modifiers::CONTROL)), Some(BindingAction::ZoomOut));
        assert_eq!(binding_for(&pressed(Keysym::_0, Modifiers::CONTROL)), Some(BindingAction::ZoomReset));
        assert_eq!(binding_for(&pressed(Keysym::Left, Modifiers::ALT)), Some(BindingAction::HistoryBack));
        assert_eq!(binding_for(&pressed(Keysym::Right, Modifiers::ALT)), Some(BindingAction::HistoryForward));
        assert_eq!(
            binding_for(&pressed(Keysym::R, Modifiers::CONTROL | Modifiers::SHIFT)),
            Some(BindingAction::ReloadBypassCache)
        );
        assert_eq!(binding_for(&pressed(Keysym::F5, Modifiers::SHIFT)), Some(BindingAction::ReloadBypassCache));
        // home-page jumps regardless of held modifiers
        assert_eq!(
            binding_for(&pressed(Keysym::XF86_HomePage, Modifiers::CONTROL)),
            Some(BindingAction::HistoryHome)
        );
        assert_eq!(binding_for(&pressed(Keysym::w, Modifiers::empty())), None);
        assert_eq!(binding_for(&pressed(Keysym::Left, Modifiers::CONTROL)), None);
    }

    #[test]
    fn touch_frame_flushes_and_resets_up_slots() {
        let mut table = TouchTable::new();
        let mut view = RecordingView::default();
        table.record(0, TouchPointType::Down, 10, Some((100, 200)));
        table.record(1, TouchPointType::Down, 11, Some((300, 400)));
        table.record(1, TouchPointType::Up, 12, None);
        table.flush(12, &mut view);

        let frame = &view.touches[0];
        assert_eq!(frame.kind, TouchPointType::Up);
        assert_eq!(frame.id, 1);
        assert_eq!(frame.points[0].kind, TouchPointType::Down);
        assert_eq!((frame.points[0].x, frame.points[0].y), (100, 200));
        // up slot keeps its last position inside the frame
        assert_eq!((frame.points[1].x, frame.points[1].y), (300, 400));

        // after the flush the up slot is null again, the down slot stays
        assert_eq!(table.points[1].kind, TouchPointType::Null);
        assert_eq!(table.points[0].kind, TouchPointType::Down);
    }

    #[test]
    fn out_of_range_slot_dropped() {
        let mut table = TouchTable::new();
        table.record(MAX_TOUCH_SLOTS, TouchPointType::Down, 10, Some((1, 2)));
        assert_eq!(table.last_kind, TouchPointType::Null);
        assert!(table.points.iter().all(|p| p.kind == TouchPointType::Null));
    }
}
