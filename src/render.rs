//! frame presentation strategies
//!
//! The view exports each rendered frame as a dmabuf. Two strategies put it on
//! screen:
//!
//! - `modeset`: import the dmabuf as a GBM buffer object and scan it out
//!   directly on the primary plane. Zero-copy, but no rotation.
//! - `gles`: draw the dmabuf as a textured quad through a GLES2 context on a
//!   GBM surface, then flip the surface's front buffer. Supports all four
//!   quarter-turn rotations.
//!
//! Both strategies share the same plane-flip plumbing ([`Scanout`]): an
//! atomic commit when the device granted the atomic capability, legacy
//! set-crtc plus page-flip otherwise. A pending/presented buffer pair keeps
//! the scanned-out framebuffer alive until the flip event retires it.

use std::collections::HashMap;
use std::os::fd::OwnedFd;

use drm::control::{
    atomic::AtomicModeReq, connector, crtc, framebuffer, plane, property, AtomicCommitFlags,
    Device as ControlDevice, FbCmd2Flags, Mode, PageFlipFlags,
};
use gbm::{BufferObject, BufferObjectFlags, Device as GbmDevice, Format};

use crate::config::{Config, RendererKind, Rotation};
use crate::display::{properties_by_name, Card, Output};
use crate::error::{DeviceError, InitError};

/// One frame exported by the view. Owning the fd keeps the buffer alive
/// until the strategy retires it.
#[derive(Debug)]
pub struct DmabufFrame {
    pub fd: OwnedFd,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// DRM fourcc code.
    pub format: u32,
}

pub trait Renderer {
    fn name(&self) -> &'static str;

    fn supports_rotation(&self, rotation: Rotation) -> bool;

    /// Returns `false` when the strategy refuses the rotation; the caller
    /// keeps the previous one.
    fn set_rotation(&mut self, rotation: Rotation) -> bool;

    fn initialize(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    fn present(&mut self, frame: DmabufFrame) -> Result<(), DeviceError>;

    /// The queued page flip reached the screen; retire the previous buffer.
    fn frame_complete(&mut self);

    /// Size of the surface the view renders into, rotation applied.
    fn surface_size(&self) -> (u32, u32);
}

pub fn setup(output: &Output, config: &Config) -> Result<Box<dyn Renderer>, InitError> {
    let gbm = GbmDevice::new(output.card().clone()).map_err(InitError::GbmDevice)?;
    let scanout = Scanout::new(output)?;
    let renderer: Box<dyn Renderer> = match config.renderer {
        RendererKind::Modeset => {
            let _ = EglDisplay::setup(&gbm)?;
            Box::new(modeset::ModesetRenderer::new(gbm, scanout))
        }
        RendererKind::Gles => {
            let egl = EglDisplay::setup(&gbm)?;
            Box::new(gles::GlesRenderer::new(gbm, egl, scanout, output.size()))
        }
    };
    tracing::info!("renderer '{}'", renderer.name());
    Ok(renderer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flip {
    /// Committed synchronously, no flip event will arrive.
    Immediate,
    /// A page-flip event will signal completion.
    Scheduled,
}

/// Primary-plane flip plumbing shared by both strategies. The first commit
/// carries the full mode set, later ones only swap the framebuffer.
struct Scanout {
    card: Card,
    crtc: crtc::Handle,
    connector: connector::Handle,
    mode: Mode,
    plane: plane::Handle,
    atomic: bool,
    modeset_done: bool,
    plane_props: HashMap<String, property::Info>,
    crtc_props: HashMap<String, property::Info>,
    connector_props: HashMap<String, property::Info>,
}

impl Scanout {
    fn new(output: &Output) -> Result<Scanout, InitError> {
        let card = output.card().clone();
        let (plane_props, crtc_props, connector_props) = if output.atomic {
            (
                properties_by_name(&card, output.plane)?,
                properties_by_name(&card, output.crtc)?,
                properties_by_name(&card, output.connector.handle())?,
            )
        } else {
            (HashMap::new(), HashMap::new(), HashMap::new())
        };
        Ok(Scanout {
            card,
            crtc: output.crtc,
            connector: output.connector.handle(),
            mode: output.mode,
            plane: output.plane,
            atomic: output.atomic,
            modeset_done: false,
            plane_props,
            crtc_props,
            connector_props,
        })
    }

    fn card(&self) -> &Card {
        &self.card
    }

    fn queue(&mut self, fb: framebuffer::Handle) -> Result<Flip, DeviceError> {
        if self.atomic {
            self.queue_atomic(fb)
        } else if !self.modeset_done {
            self.card
                .set_crtc(self.crtc, Some(fb), (0, 0), &[self.connector], Some(self.mode))
                .map_err(DeviceError::ModeSet)?;
            self.modeset_done = true;
            Ok(Flip::Immediate)
        } else {
            self.card
                .page_flip(self.crtc, fb, PageFlipFlags::EVENT, None)
                .map_err(DeviceError::PageFlip)?;
            Ok(Flip::Scheduled)
        }
    }

    fn queue_atomic(&mut self, fb: framebuffer::Handle) -> Result<Flip, DeviceError> {
        let (width, height) = self.mode.size();
        let (width, height) = (u64::from(width), u64::from(height));
        let mut req = AtomicModeReq::new();
        let plane = self.plane;
        req.add_property(plane, self.plane_prop("FB_ID")?, property::Value::Framebuffer(Some(fb)));
        req.add_property(plane, self.plane_prop("CRTC_ID")?, property::Value::CRTC(Some(self.crtc)));
        req.add_property(plane, self.plane_prop("SRC_X")?, property::Value::UnsignedRange(0));
        req.add_property(plane, self.plane_prop("SRC_Y")?, property::Value::UnsignedRange(0));
        // SRC_* are 16.16 fixed point
        req.add_property(plane, self.plane_prop("SRC_W")?, property::Value::UnsignedRange(width << 16));
        req.add_property(plane, self.plane_prop("SRC_H")?, property::Value::UnsignedRange(height << 16));
        req.add_property(plane, self.plane_prop("CRTC_X")?, property::Value::SignedRange(0));
        req.add_property(plane, self.plane_prop("CRTC_Y")?, property::Value::SignedRange(0));
        req.add_property(plane, self.plane_prop("CRTC_W")?, property::Value::UnsignedRange(width));
        req.add_property(plane, self.plane_prop("CRTC_H")?, property::Value::UnsignedRange(height));

        if !self.modeset_done {
            let mode_blob = self
                .card
                .create_property_blob(&self.mode)
                .map_err(DeviceError::AtomicCommit)?;
            req.add_property(
                self.connector,
                prop(&self.connector_props, "CRTC_ID")?,
                property::Value::CRTC(Some(self.crtc)),
            );
            req.add_property(self.crtc, prop(&self.crtc_props, "MODE_ID")?, mode_blob);
            req.add_property(self.crtc, prop(&self.crtc_props, "ACTIVE")?, property::Value::Boolean(true));
            self.card
                .atomic_commit(AtomicCommitFlags::ALLOW_MODESET, req)
                .map_err(DeviceError::AtomicCommit)?;
            self.modeset_done = true;
            return Ok(Flip::Immediate);
        }

        self.card
            .atomic_commit(AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::PAGE_FLIP_EVENT, req)
            .map_err(DeviceError::AtomicCommit)?;
        Ok(Flip::Scheduled)
    }

    fn plane_prop(&self, name: &'static str) -> Result<property::Handle, DeviceError> {
        prop(&self.plane_props, name)
    }
}

fn prop(
    props: &HashMap<String, property::Info>,
    name: &'static str,
) -> Result<property::Handle, DeviceError> {
    props
        .get(name)
        .map(|info| info.handle())
        .ok_or(DeviceError::MissingProperty(name))
}

/// Dynamically loaded EGL over the GBM device, platform entry point first
/// with a generic fallback.
pub(crate) struct EglDisplay {
    api: khronos_egl::DynamicInstance<khronos_egl::EGL1_4>,
    display: khronos_egl::Display,
}

const EGL_PLATFORM_GBM_KHR: khronos_egl::Enum = 0x31D7;

impl EglDisplay {
    fn setup(gbm: &GbmDevice<Card>) -> Result<EglDisplay, InitError> {
        use gbm::AsRaw;

        let api = unsafe { khronos_egl::DynamicInstance::<khronos_egl::EGL1_4>::load_required() }
            .map_err(|err| InitError::Egl(format!("failed to load libEGL: {err}")))?;
        let native = gbm.as_raw() as *mut std::ffi::c_void;

        let display = match api.upcast::<khronos_egl::EGL1_5>() {
            Some(api15) => unsafe {
                api15
                    .get_platform_display(EGL_PLATFORM_GBM_KHR, native, &[khronos_egl::ATTRIB_NONE])
                    .map_err(|err| tracing::debug!("egl platform display unavailable: {err}"))
                    .ok()
            },
            None => None,
        };
        let display = match display {
            Some(display) => display,
            None => unsafe { api.get_display(native) }
                .ok_or_else(|| InitError::Egl("no egl display for gbm device".into()))?,
        };

        let (major, minor) = api
            .initialize(display)
            .map_err(|err| InitError::Egl(format!("initialize failed: {err}")))?;
        tracing::debug!("egl {major}.{minor}");
        Ok(EglDisplay { api, display })
    }
}

impl Drop for EglDisplay {
    fn drop(&mut self) {
        let _ = self.api.terminate(self.display);
        let _ = self.api.release_thread();
    }
}

/// A framebuffer that is on screen or queued to be, plus whatever backing
/// storage must stay alive until it is retired.
struct LiveBuffer {
    fb: framebuffer::Handle,
    _bo: BufferObject<()>,
    _frame: Option<DmabufFrame>,
}

pub mod modeset {
    use super::*;

    /// Scans the exported dmabuf out directly on the primary plane.
    pub struct ModesetRenderer {
        gbm: GbmDevice<Card>,
        scanout: Scanout,
        pending: Option<LiveBuffer>,
        current: Option<LiveBuffer>,
    }

    impl ModesetRenderer {
        pub(super) fn new(gbm: GbmDevice<Card>, scanout: Scanout) -> ModesetRenderer {
            ModesetRenderer { gbm, scanout, pending: None, current: None }
        }

        fn retire(&mut self, replacement: Option<LiveBuffer>) {
            if let Some(retired) = std::mem::replace(&mut self.current, replacement) {
                let _ = self.scanout.card().destroy_framebuffer(retired.fb);
            }
        }
    }

    impl Renderer for ModesetRenderer {
        fn name(&self) -> &'static str {
            "modeset"
        }

        fn supports_rotation(&self, rotation: Rotation) -> bool {
            rotation == Rotation::Rot0
        }

        fn set_rotation(&mut self, rotation: Rotation) -> bool {
            rotation == Rotation::Rot0
        }

        fn present(&mut self, frame: DmabufFrame) -> Result<(), DeviceError> {
            use std::os::fd::AsFd;

            let format =
                Format::try_from(frame.format).map_err(|_| DeviceError::BadFormat(frame.format))?;
            let bo = self
                .gbm
                .import_buffer_object_from_dma_buf::<()>(
                    frame.fd.as_fd(),
                    frame.width,
                    frame.height,
                    frame.stride,
                    format,
                    BufferObjectFlags::SCANOUT,
                )
                .map_err(DeviceError::Import)?;
            let fb = self
                .scanout
                .card()
                .add_planar_framebuffer(&bo, FbCmd2Flags::empty())
                .map_err(DeviceError::AddFramebuffer)?;
            let live = LiveBuffer { fb, _bo: bo, _frame: Some(frame) };
            match self.scanout.queue(fb)? {
                Flip::Scheduled => self.pending = Some(live),
                Flip::Immediate => self.retire(Some(live)),
            }
            Ok(())
        }

        fn frame_complete(&mut self) {
            let pending = self.pending.take();
            self.retire(pending);
        }

        fn surface_size(&self) -> (u32, u32) {
            let (width, height) = self.scanout.mode.size();
            (width.into(), height.into())
        }
    }

    impl Drop for ModesetRenderer {
        fn drop(&mut self) {
            for live in self.pending.take().into_iter().chain(self.current.take()) {
                let _ = self.scanout.card().destroy_framebuffer(live.fb);
            }
        }
    }
}

pub mod gles {
    use std::ffi::{c_char, c_void};
    use std::os::fd::AsRawFd;

    use super::*;

    const EGL_LINUX_DMA_BUF_EXT: khronos_egl::Enum = 0x3270;
    const EGL_LINUX_DRM_FOURCC_EXT: khronos_egl::Int = 0x3271;
    const EGL_DMA_BUF_PLANE0_FD_EXT: khronos_egl::Int = 0x3272;
    const EGL_DMA_BUF_PLANE0_OFFSET_EXT: khronos_egl::Int = 0x3273;
    const EGL_DMA_BUF_PLANE0_PITCH_EXT: khronos_egl::Int = 0x3274;

    const GL_TEXTURE_2D: u32 = 0x0DE1;
    const GL_TEXTURE0: u32 = 0x84C0;
    const GL_TEXTURE_MIN_FILTER: u32 = 0x2801;
    const GL_TEXTURE_MAG_FILTER: u32 = 0x2800;
    const GL_LINEAR: i32 = 0x2601;
    const GL_COLOR_BUFFER_BIT: u32 = 0x4000;
    const GL_VERTEX_SHADER: u32 = 0x8B31;
    const GL_FRAGMENT_SHADER: u32 = 0x8B30;
    const GL_COMPILE_STATUS: u32 = 0x8B81;
    const GL_LINK_STATUS: u32 = 0x8B82;
    const GL_FLOAT: u32 = 0x1406;
    const GL_TRIANGLE_STRIP: u32 = 0x0005;

    const VERTEX_SHADER: &str = "\
attribute vec2 position;
attribute vec2 texcoord;
varying vec2 v_texcoord;
void main() {
    gl_Position = vec4(position, 0.0, 1.0);
    v_texcoord = texcoord;
}
";

    const FRAGMENT_SHADER: &str = "\
precision mediump float;
uniform sampler2D u_texture;
varying vec2 v_texcoord;
void main() {
    gl_FragColor = texture2D(u_texture, v_texcoord);
}
";

    const VERTICES: [f32; 8] = [-1.0, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0];

    /// Texture coordinates per quarter turn, same vertex order as above.
    const TEXCOORDS: [[f32; 8]; 4] = [
        [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        [1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        [1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0],
    ];

    type EglCreateImageKhr = unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        khronos_egl::Enum,
        *mut c_void,
        *const khronos_egl::Int,
    ) -> *mut c_void;
    type EglDestroyImageKhr = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
    type GlEglImageTargetTexture2dOes = unsafe extern "C" fn(u32, *mut c_void);

    type EglApi = khronos_egl::DynamicInstance<khronos_egl::EGL1_4>;

    /// GLES2 entry points resolved through `eglGetProcAddress`, which covers
    /// everything a GLES implementation exports.
    struct GlApi {
        clear_color: unsafe extern "C" fn(f32, f32, f32, f32),
        clear: unsafe extern "C" fn(u32),
        viewport: unsafe extern "C" fn(i32, i32, i32, i32),
        gen_textures: unsafe extern "C" fn(i32, *mut u32),
        delete_textures: unsafe extern "C" fn(i32, *const u32),
        bind_texture: unsafe extern "C" fn(u32, u32),
        active_texture: unsafe extern "C" fn(u32),
        tex_parameteri: unsafe extern "C" fn(u32, u32, i32),
        create_shader: unsafe extern "C" fn(u32) -> u32,
        shader_source: unsafe extern "C" fn(u32, i32, *const *const c_char, *const i32),
        compile_shader: unsafe extern "C" fn(u32),
        get_shaderiv: unsafe extern "C" fn(u32, u32, *mut i32),
        delete_shader: unsafe extern "C" fn(u32),
        create_program: unsafe extern "C" fn() -> u32,
        attach_shader: unsafe extern "C" fn(u32, u32),
        link_program: unsafe extern "C" fn(u32),
        get_programiv: unsafe extern "C" fn(u32, u32, *mut i32),
        use_program: unsafe extern "C" fn(u32),
        get_attrib_location: unsafe extern "C" fn(u32, *const c_char) -> i32,
        get_uniform_location: unsafe extern "C" fn(u32, *const c_char) -> i32,
        uniform1i: unsafe extern "C" fn(i32, i32),
        vertex_attrib_pointer: unsafe extern "C" fn(u32, i32, u32, u8, i32, *const c_void),
        enable_vertex_attrib_array: unsafe extern "C" fn(u32),
        draw_arrays: unsafe extern "C" fn(u32, i32, i32),
        image_target_texture: GlEglImageTargetTexture2dOes,
        create_image: EglCreateImageKhr,
        destroy_image: EglDestroyImageKhr,
    }

    macro_rules! load_proc {
        ($api:expr, $name:literal) => {
            match $api.get_proc_address($name) {
                Some(ptr) => unsafe { std::mem::transmute(ptr) },
                None => return Err(InitError::GlEntryPoint($name)),
            }
        };
    }

    impl GlApi {
        fn load(api: &EglApi) -> Result<GlApi, InitError> {
            Ok(GlApi {
                clear_color: load_proc!(api, "glClearColor"),
                clear: load_proc!(api, "glClear"),
                viewport: load_proc!(api, "glViewport"),
                gen_textures: load_proc!(api, "glGenTextures"),
                delete_textures: load_proc!(api, "glDeleteTextures"),
                bind_texture: load_proc!(api, "glBindTexture"),
                active_texture: load_proc!(api, "glActiveTexture"),
                tex_parameteri: load_proc!(api, "glTexParameteri"),
                create_shader: load_proc!(api, "glCreateShader"),
                shader_source: load_proc!(api, "glShaderSource"),
                compile_shader: load_proc!(api, "glCompileShader"),
                get_shaderiv: load_proc!(api, "glGetShaderiv"),
                delete_shader: load_proc!(api, "glDeleteShader"),
                create_program: load_proc!(api, "glCreateProgram"),
                attach_shader: load_proc!(api, "glAttachShader"),
                link_program: load_proc!(api, "glLinkProgram"),
                get_programiv: load_proc!(api, "glGetProgramiv"),
                use_program: load_proc!(api, "glUseProgram"),
                get_attrib_location: load_proc!(api, "glGetAttribLocation"),
                get_uniform_location: load_proc!(api, "glGetUniformLocation"),
                uniform1i: load_proc!(api, "glUniform1i"),
                vertex_attrib_pointer: load_proc!(api, "glVertexAttribPointer"),
                enable_vertex_attrib_array: load_proc!(api, "glEnableVertexAttribArray"),
                draw_arrays: load_proc!(api, "glDrawArrays"),
                image_target_texture: load_proc!(api, "glEGLImageTargetTexture2DOES"),
                create_image: load_proc!(api, "eglCreateImageKHR"),
                destroy_image: load_proc!(api, "eglDestroyImageKHR"),
            })
        }
    }

    /// Everything created by `initialize`.
    struct GlState {
        surface: gbm::Surface<()>,
        window: khronos_egl::Surface,
        _context: khronos_egl::Context,
        gl: GlApi,
        program: u32,
        texture: u32,
        a_position: u32,
        a_texcoord: u32,
        u_texture: i32,
    }

    /// Draws the exported dmabuf as a textured quad and flips the GBM
    /// surface's front buffer.
    pub struct GlesRenderer {
        gbm: GbmDevice<Card>,
        egl: EglDisplay,
        scanout: Scanout,
        size: (u32, u32),
        rotation: Rotation,
        state: Option<GlState>,
        pending: Option<LiveBuffer>,
        current: Option<LiveBuffer>,
    }

    impl GlesRenderer {
        pub(super) fn new(
            gbm: GbmDevice<Card>,
            egl: EglDisplay,
            scanout: Scanout,
            size: (u32, u32),
        ) -> GlesRenderer {
            GlesRenderer {
                gbm,
                egl,
                scanout,
                size,
                rotation: Rotation::Rot0,
                state: None,
                pending: None,
                current: None,
            }
        }

        fn retire(&mut self, replacement: Option<LiveBuffer>) {
            if let Some(retired) = std::mem::replace(&mut self.current, replacement) {
                let _ = self.scanout.card().destroy_framebuffer(retired.fb);
            }
        }

        fn draw(&self, frame: &DmabufFrame) -> Result<(), DeviceError> {
            let state = self
                .state
                .as_ref()
                .ok_or_else(|| DeviceError::Egl("renderer not initialized".into()))?;
            let gl = &state.gl;
            let display = self.egl.display.as_ptr();

            let attribs = [
                khronos_egl::WIDTH,
                frame.width as khronos_egl::Int,
                khronos_egl::HEIGHT,
                frame.height as khronos_egl::Int,
                EGL_LINUX_DRM_FOURCC_EXT,
                frame.format as khronos_egl::Int,
                EGL_DMA_BUF_PLANE0_FD_EXT,
                frame.fd.as_raw_fd(),
                EGL_DMA_BUF_PLANE0_OFFSET_EXT,
                0,
                EGL_DMA_BUF_PLANE0_PITCH_EXT,
                frame.stride as khronos_egl::Int,
                khronos_egl::NONE,
            ];
            let image = unsafe {
                (gl.create_image)(
                    display,
                    std::ptr::null_mut(),
                    EGL_LINUX_DMA_BUF_EXT,
                    std::ptr::null_mut(),
                    attribs.as_ptr(),
                )
            };
            if image.is_null() {
                return Err(DeviceError::Egl("eglCreateImageKHR failed for dmabuf".into()));
            }

            let (width, height) = self.size;
            let uv = &TEXCOORDS[self.rotation.index() as usize];
            unsafe {
                (gl.viewport)(0, 0, width as i32, height as i32);
                (gl.clear_color)(0.0, 0.0, 0.0, 1.0);
                (gl.clear)(GL_COLOR_BUFFER_BIT);
                (gl.use_program)(state.program);
                (gl.active_texture)(GL_TEXTURE0);
                (gl.bind_texture)(GL_TEXTURE_2D, state.texture);
                (gl.image_target_texture)(GL_TEXTURE_2D, image);
                (gl.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_MIN_FILTER, GL_LINEAR);
                (gl.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_MAG_FILTER, GL_LINEAR);
                (gl.uniform1i)(state.u_texture, 0);
                (gl.vertex_attrib_pointer)(state.a_position, 2, GL_FLOAT, 0, 0, VERTICES.as_ptr().cast());
                (gl.enable_vertex_attrib_array)(state.a_position);
                (gl.vertex_attrib_pointer)(state.a_texcoord, 2, GL_FLOAT, 0, 0, uv.as_ptr().cast());
                (gl.enable_vertex_attrib_array)(state.a_texcoord);
                (gl.draw_arrays)(GL_TRIANGLE_STRIP, 0, 4);
            }

            let swapped = self.egl.api.swap_buffers(self.egl.display, state.window);
            unsafe { (gl.destroy_image)(display, image) };
            swapped.map_err(|err| DeviceError::Egl(format!("swap failed: {err}")))
        }
    }

    impl Renderer for GlesRenderer {
        fn name(&self) -> &'static str {
            "gles"
        }

        fn supports_rotation(&self, _rotation: Rotation) -> bool {
            true
        }

        fn set_rotation(&mut self, rotation: Rotation) -> bool {
            self.rotation = rotation;
            true
        }

        fn initialize(&mut self) -> Result<(), InitError> {
            use gbm::AsRaw;

            let api = &self.egl.api;
            let display = self.egl.display;
            let egl_err = |err: khronos_egl::Error| InitError::Egl(err.to_string());

            api.bind_api(khronos_egl::OPENGL_ES_API).map_err(egl_err)?;
            let config_attribs = [
                khronos_egl::SURFACE_TYPE,
                khronos_egl::WINDOW_BIT,
                khronos_egl::RENDERABLE_TYPE,
                khronos_egl::OPENGL_ES2_BIT,
                khronos_egl::RED_SIZE,
                8,
                khronos_egl::GREEN_SIZE,
                8,
                khronos_egl::BLUE_SIZE,
                8,
                khronos_egl::ALPHA_SIZE,
                8,
                khronos_egl::NONE,
            ];
            let config = api
                .choose_first_config(display, &config_attribs)
                .map_err(egl_err)?
                .ok_or_else(|| InitError::Egl("no gles2 config".into()))?;
            let context_attribs = [khronos_egl::CONTEXT_CLIENT_VERSION, 2, khronos_egl::NONE];
            let context = api
                .create_context(display, config, None, &context_attribs)
                .map_err(egl_err)?;

            let (width, height) = self.size;
            let surface = self
                .gbm
                .create_surface::<()>(
                    width,
                    height,
                    Format::Argb8888,
                    BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
                )
                .map_err(InitError::GbmSurface)?;
            let window = unsafe {
                api.create_window_surface(
                    display,
                    config,
                    surface.as_raw() as khronos_egl::NativeWindowType,
                    None,
                )
            }
            .map_err(egl_err)?;
            api.make_current(display, Some(window), Some(window), Some(context))
                .map_err(egl_err)?;

            let gl = GlApi::load(api)?;
            let program = build_program(&gl)?;
            let mut texture = 0u32;
            let a_position;
            let a_texcoord;
            let u_texture;
            unsafe {
                (gl.gen_textures)(1, &mut texture);
                a_position = (gl.get_attrib_location)(program, c"position".as_ptr());
                a_texcoord = (gl.get_attrib_location)(program, c"texcoord".as_ptr());
                u_texture = (gl.get_uniform_location)(program, c"u_texture".as_ptr());
            }
            if a_position < 0 || a_texcoord < 0 {
                return Err(InitError::Program);
            }

            self.state = Some(GlState {
                surface,
                window,
                _context: context,
                gl,
                program,
                texture,
                a_position: a_position as u32,
                a_texcoord: a_texcoord as u32,
                u_texture,
            });
            Ok(())
        }

        fn present(&mut self, frame: DmabufFrame) -> Result<(), DeviceError> {
            self.draw(&frame)?;
            let state = self
                .state
                .as_mut()
                .ok_or_else(|| DeviceError::Egl("renderer not initialized".into()))?;
            // SAFETY: eglSwapBuffers has completed in draw(), so a front
            // buffer is available to lock.
            let bo = unsafe { state.surface.lock_front_buffer() }
                .map_err(|err| DeviceError::Egl(format!("front buffer lock failed: {err}")))?;
            let fb = self
                .scanout
                .card()
                .add_planar_framebuffer(&bo, FbCmd2Flags::empty())
                .map_err(DeviceError::AddFramebuffer)?;
            let live = LiveBuffer { fb, _bo: bo, _frame: None };
            match self.scanout.queue(fb)? {
                Flip::Scheduled => self.pending = Some(live),
                Flip::Immediate => self.retire(Some(live)),
            }
            Ok(())
        }

        fn frame_complete(&mut self) {
            let pending = self.pending.take();
            self.retire(pending);
        }

        fn surface_size(&self) -> (u32, u32) {
            let (width, height) = self.size;
            if self.rotation.swaps_axes() {
                (height, width)
            } else {
                (width, height)
            }
        }
    }

    impl Drop for GlesRenderer {
        fn drop(&mut self) {
            for live in self.pending.take().into_iter().chain(self.current.take()) {
                let _ = self.scanout.card().destroy_framebuffer(live.fb);
            }
            if let Some(state) = self.state.take() {
                unsafe { (state.gl.delete_textures)(1, &state.texture) };
                let _ = self.egl.api.make_current(self.egl.display, None, None, None);
                let _ = self.egl.api.destroy_surface(self.egl.display, state.window);
            }
        }
    }

    fn build_program(gl: &GlApi) -> Result<u32, InitError> {
        let vertex = compile_shader(gl, GL_VERTEX_SHADER, VERTEX_SHADER, "vertex")?;
        let fragment = compile_shader(gl, GL_FRAGMENT_SHADER, FRAGMENT_SHADER, "fragment")?;
        unsafe {
            let program = (gl.create_program)();
            (gl.attach_shader)(program, vertex);
            (gl.attach_shader)(program, fragment);
            (gl.link_program)(program);
            (gl.delete_shader)(vertex);
            (gl.delete_shader)(fragment);
            let mut linked = 0;
            (gl.get_programiv)(program, GL_LINK_STATUS, &mut linked);
            if linked == 0 {
                return Err(InitError::Program);
            }
            Ok(program)
        }
    }

    fn compile_shader(
        gl: &GlApi,
        kind: u32,
        source: &str,
        label: &'static str,
    ) -> Result<u32, InitError> {
        unsafe {
            let shader = (gl.create_shader)(kind);
            let ptr = source.as_ptr().cast::<c_char>();
            let len = source.len() as i32;
            (gl.shader_source)(shader, 1, &ptr, &len);
            (gl.compile_shader)(shader);
            let mut compiled = 0;
            (gl.get_shaderiv)(shader, GL_COMPILE_STATUS, &mut compiled);
            if compiled == 0 {
                return Err(InitError::Shader(label));
            }
            Ok(shader)
        }
    }
}
