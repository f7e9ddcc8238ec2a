// Re-export glam for convenience
pub use glam::*;

// Arbor math helpers
mod transform;
pub use transform::Mat4Ext;
