//! Built-in subpasses.

pub mod forward;
pub mod geometry;
pub mod lighting;

pub use forward::ForwardSubpass;
pub use geometry::GeometrySubpass;
pub use lighting::LightingSubpass;
