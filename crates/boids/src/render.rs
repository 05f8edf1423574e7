//! Renderer interfaces
//!
//! The core consumes a renderer; it never implements one. Hosts wire any
//! backend behind this trait, and headless drivers and tests use
//! [`NullRenderer`].

use boids_core::math::{Vec3, Vec4};

/// Opaque handle for a mesh registered with the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshHandle(pub u32);

/// The rendering collaborator the integration loop drives
///
/// `draw_frame` is called once after each completed tick, after the
/// spatial hash rebuild, with the positions already observable through
/// [`FrameView`].
pub trait Renderer {
    fn add_mesh(&mut self, vertices: &[[f32; 3]], indices: &[u32]) -> MeshHandle;
    fn set_model(&mut self, mesh: MeshHandle, transform: [[f32; 4]; 4]);
    fn set_view_projection(
        &mut self,
        view: [[f32; 4]; 4],
        projection: [[f32; 4]; 4],
        camera_position: [f32; 3],
    );
    fn draw_frame(&mut self);
}

/// Borrow-only snapshot handed to the renderer between ticks
pub struct FrameView<'a> {
    pub positions: &'a [Vec4],
    pub velocities: &'a [Vec3],
    pub frame: u64,
}

/// A renderer that renders nothing
///
/// Counts calls so drivers and tests can assert the hand-off happened.
#[derive(Debug, Default)]
pub struct NullRenderer {
    meshes: u32,
    pub frames_drawn: u64,
}

impl NullRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for NullRenderer {
    fn add_mesh(&mut self, _vertices: &[[f32; 3]], _indices: &[u32]) -> MeshHandle {
        let handle = MeshHandle(self.meshes);
        self.meshes += 1;
        handle
    }

    fn set_model(&mut self, _mesh: MeshHandle, _transform: [[f32; 4]; 4]) {}

    fn set_view_projection(
        &mut self,
        _view: [[f32; 4]; 4],
        _projection: [[f32; 4]; 4],
        _camera_position: [f32; 3],
    ) {
    }

    fn draw_frame(&mut self) {
        self.frames_drawn += 1;
    }
}
