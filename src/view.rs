//! events delivered to the embedded web view
//!
//! [`ViewSurface`] is the seam between the backend and whatever renders the
//! page. The backend only needs event dispatch, activity gating and a couple
//! of display hints, so the trait stays deliberately small.

use bitflags::bitflags;

bitflags! {
    /// Modifier mask carried on keyboard and pointer events.
    ///
    /// Button bits are remembered between pointer events so drags report the
    /// held button.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const CONTROL = 1 << 0;
        const SHIFT   = 1 << 1;
        const ALT     = 1 << 2;
        const META    = 1 << 3;
        const BUTTON1 = 1 << 4;
        const BUTTON2 = 1 << 5;
        const BUTTON3 = 1 << 6;
    }
}

bitflags! {
    /// Whether the view is currently shown and focused. Input is dropped
    /// unless both bits are set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ActivityState: u32 {
        const VISIBLE = 1 << 0;
        const FOCUSED = 1 << 1;
    }
}

/// A translated keyboard event. `key` is the xkb keysym, `hardware_key` the
/// xkb keycode (evdev code + 8) or the raw button code for remapped pointer
/// buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub time: u32,
    pub key: u32,
    pub hardware_key: u32,
    pub pressed: bool,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEventKind {
    Motion,
    Button,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    pub time: u32,
    pub x: i32,
    pub y: i32,
    /// 0 for none, 1/2/3 for left/right/middle.
    pub button: u32,
    /// 1 pressed, 0 released.
    pub state: u32,
    pub modifiers: Modifiers,
}

/// 2D scroll. `smooth` distinguishes finger/continuous scrolling from
/// discrete wheel steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisEvent {
    pub smooth: bool,
    pub time: u32,
    pub x: i32,
    pub y: i32,
    pub x_axis: f64,
    pub y_axis: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TouchPointType {
    #[default]
    Null,
    Down,
    Up,
    Motion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchPoint {
    pub kind: TouchPointType,
    pub time: u32,
    pub id: i32,
    pub x: i32,
    pub y: i32,
}

/// One touch frame: the full slot table plus the type and id of the contact
/// that changed last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchEvent {
    pub kind: TouchPointType,
    pub id: i32,
    pub time: u32,
    pub points: Vec<TouchPoint>,
}

/// Actions triggered by the fixed keyboard shortcut table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingAction {
    Quit,
    ZoomIn,
    ZoomOut,
    ZoomReset,
    HistoryBack,
    HistoryForward,
    Reload,
    ReloadBypassCache,
    /// Jump to the earliest entry in the back/forward list.
    HistoryHome,
}

pub trait ViewSurface {
    fn activity_state(&self) -> ActivityState;

    fn dispatch_key_event(&mut self, event: &KeyEvent);
    fn dispatch_pointer_event(&mut self, event: &PointerEvent);
    fn dispatch_axis_event(&mut self, event: &AxisEvent);
    fn dispatch_touch_event(&mut self, event: &TouchEvent);

    /// Returns `true` when the action was consumed; the triggering key event
    /// is then gobbled.
    fn handle_binding(&mut self, action: BindingAction) -> bool;

    fn set_device_scale(&mut self, _scale: f64) {}

    /// Target refresh rate in millihertz.
    fn set_target_refresh_rate(&mut self, _rate: u32) {}

    /// A previously presented frame reached the screen.
    fn frame_displayed(&mut self) {}
}

/// Surface that only logs what it receives. Stands in for a real web view in
/// the demo binary.
#[derive(Default)]
pub struct HeadlessView {
    signal: Option<calloop::LoopSignal>,
}

impl HeadlessView {
    /// Quit bindings stop the given loop.
    pub fn with_signal(signal: calloop::LoopSignal) -> HeadlessView {
        HeadlessView { signal: Some(signal) }
    }
}

impl ViewSurface for HeadlessView {
    fn activity_state(&self) -> ActivityState {
        ActivityState::VISIBLE | ActivityState::FOCUSED
    }

    fn dispatch_key_event(&mut self, event: &KeyEvent) {
        tracing::debug!(?event, "key event");
    }

    fn dispatch_pointer_event(&mut self, event: &PointerEvent) {
        tracing::trace!(?event, "pointer event");
    }

    fn dispatch_axis_event(&mut self, event: &AxisEvent) {
        tracing::debug!(?event, "axis event");
    }

    fn dispatch_touch_event(&mut self, event: &TouchEvent) {
        tracing::debug!(?event, "touch event");
    }

    fn handle_binding(&mut self, action: BindingAction) -> bool {
        tracing::info!(?action, "key binding");
        if action == BindingAction::Quit {
            if let Some(signal) = &self.signal {
                signal.stop();
            }
        }
        true
    }

    fn set_device_scale(&mut self, scale: f64) {
        tracing::info!("device scale {scale}");
    }

    fn set_target_refresh_rate(&mut self, rate: u32) {
        tracing::info!("target refresh rate {rate} mHz");
    }
}
