// Transform utilities for Mat4
//
// Extends glam::Mat4 with the helpers geometry conversion needs: unit
// conversion scales and transforming flat `[x, y, z, x, y, z, ...]` buffers.

use glam::{Mat4, Vec3};

/// Extension trait for Mat4 to provide unit-conversion and buffer helpers
pub trait Mat4Ext {
    /// Uniform scale matrix for a unit conversion factor.
    fn uniform_scale(factor: f32) -> Mat4;

    /// Compose `S(factor) * self * S(1 / factor)`.
    /// A factor of 1 returns `self` unchanged. `factor` must be finite and
    /// non-zero.
    fn rescaled(&self, factor: f32) -> Mat4;

    /// Transform a flat position buffer (3 floats per point).
    /// Trailing components that do not form a full point are dropped.
    fn transform_flat_points(&self, positions: &[f32]) -> Vec<f32>;
}

impl Mat4Ext for Mat4 {
    fn uniform_scale(factor: f32) -> Mat4 {
        Mat4::from_scale(Vec3::splat(factor))
    }

    fn rescaled(&self, factor: f32) -> Mat4 {
        if factor == 1.0 {
            return *self;
        }
        Mat4::uniform_scale(factor) * *self * Mat4::uniform_scale(1.0 / factor)
    }

    fn transform_flat_points(&self, positions: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(positions.len() - positions.len() % 3);
        for p in positions.chunks_exact(3) {
            let t = self.transform_point3(Vec3::new(p[0], p[1], p[2]));
            out.extend_from_slice(&[t.x, t.y, t.z]);
        }
        out
    }
}
