//! # engine_math
//!
//! Math types for the networked ECS runtime. Re-exports [`glam`] for linear
//! algebra and defines spatial components that implement
//! [`NetworkComponent`](engine_component::NetworkComponent).

pub mod transform;

// Re-export glam types for convenience.
pub use glam::{EulerRot, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

pub use transform::Transform3D;
