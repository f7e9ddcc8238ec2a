//! Raw buffer geometry carried by source nodes.
//!
//! Buffers are flat (`[x, y, z, x, y, z, ...]`) the way model parsers hand
//! them over. Nothing here knows about GPUs; the render tree decides what to
//! upload.

use std::collections::HashMap;

/// Default distance under which two vertices are considered coincident.
pub const DEFAULT_MERGE_TOLERANCE: f32 = 1e-4;

/// Vertex, index and color buffers of a mesh-like node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferGeometry {
    /// Vertex positions (3 floats per vertex)
    pub positions: Vec<f32>,

    /// Triangle indices (optional - non-indexed geometry is merged on extraction)
    pub index: Option<Vec<u32>>,

    /// Vertex colors (optional - 3 floats per vertex)
    pub colors: Option<Vec<f32>>,
}

impl BufferGeometry {
    /// Create a geometry from flat positions and optional indices.
    pub fn new(positions: Vec<f32>, index: Option<Vec<u32>>) -> Self {
        Self {
            positions,
            index,
            colors: None,
        }
    }

    /// Attach per-vertex colors.
    pub fn with_colors(mut self, colors: Vec<f32>) -> Self {
        self.colors = Some(colors);
        self
    }

    /// Get the number of vertices in the geometry.
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Get the number of triangles (0 for non-indexed geometry).
    pub fn triangle_count(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.len() / 3)
    }

    /// Check if the geometry has a non-empty index buffer.
    pub fn has_index(&self) -> bool {
        self.index.as_ref().is_some_and(|index| !index.is_empty())
    }

    /// Check if the geometry has vertex colors.
    pub fn has_colors(&self) -> bool {
        self.colors.as_ref().is_some_and(|colors| !colors.is_empty())
    }

    /// Merge coincident vertices into an indexed geometry.
    ///
    /// Vertices whose position (and color, if present) quantize to the same
    /// cell of size `tolerance` share a single index. First occurrences keep
    /// their relative order. Indexed input is expanded through its index
    /// first, so merging an already merged geometry returns it unchanged.
    pub fn merge_vertices(&self, tolerance: f32) -> BufferGeometry {
        let tolerance = if tolerance > 0.0 {
            tolerance
        } else {
            DEFAULT_MERGE_TOLERANCE
        };
        let scale = 1.0 / tolerance;

        let colors = match &self.colors {
            Some(colors) if colors.len() == self.positions.len() => Some(colors.as_slice()),
            Some(colors) => {
                log::warn!(
                    "Color buffer length ({}) doesn't match position buffer length ({}), dropping colors",
                    colors.len(),
                    self.positions.len()
                );
                None
            }
            None => None,
        };

        // Order in which source vertices are visited. Triangles referencing a
        // missing vertex are dropped whole so later corners stay aligned.
        let order: Vec<usize> = match &self.index {
            Some(index) if !index.is_empty() => {
                let vertex_count = self.vertex_count();
                if index.len() % 3 != 0 {
                    log::warn!(
                        "Index buffer length {} is not a multiple of 3, dropping the trailing indices",
                        index.len()
                    );
                }
                let mut order = Vec::with_capacity(index.len());
                for triangle in index.chunks_exact(3) {
                    if triangle.iter().all(|&i| (i as usize) < vertex_count) {
                        order.extend(triangle.iter().map(|&i| i as usize));
                    } else {
                        log::warn!(
                            "Triangle {:?} out of range for {} vertices, dropping it",
                            triangle,
                            vertex_count
                        );
                    }
                }
                order
            }
            _ => (0..self.vertex_count()).collect(),
        };

        let quantize = |v: f32| (v * scale).round() as i64;

        let mut lookup: HashMap<[i64; 6], u32> = HashMap::with_capacity(order.len());
        let mut positions = Vec::new();
        let mut merged_colors = colors.map(|_| Vec::new());
        let mut index = Vec::with_capacity(order.len());

        for vertex in order {
            let p = &self.positions[vertex * 3..vertex * 3 + 3];
            let c = colors.map(|colors| &colors[vertex * 3..vertex * 3 + 3]);

            let mut key = [quantize(p[0]), quantize(p[1]), quantize(p[2]), 0, 0, 0];
            if let Some(c) = c {
                key[3] = quantize(c[0]);
                key[4] = quantize(c[1]);
                key[5] = quantize(c[2]);
            }

            let next = (positions.len() / 3) as u32;
            let slot = *lookup.entry(key).or_insert_with(|| {
                positions.extend_from_slice(p);
                if let (Some(out), Some(c)) = (merged_colors.as_mut(), c) {
                    out.extend_from_slice(c);
                }
                next
            });
            index.push(slot);
        }

        BufferGeometry {
            positions,
            index: Some(index),
            colors: merged_colors,
        }
    }
}
