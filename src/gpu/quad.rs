//! Fullscreen quad geometry and the five texture-coordinate permutations.
//!
//! Corners are listed in output memory order: first row left, first row
//! right, last row left, last row right. That order is also the triangle
//! strip order, so a backend only has to place the corners in its own clip
//! space.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Selects how the input texture is sampled across the quad. Only texture
/// coordinates change, vertex positions are fixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderOrientation {
    #[default]
    Standard,
    Mirrored,
    Flipped,
    FlippedMirrored,
    /// Transposed: output x walks input y and vice versa.
    Diagonal,
}

impl RenderOrientation {
    pub const ALL: [RenderOrientation; 5] = [
        RenderOrientation::Standard,
        RenderOrientation::Mirrored,
        RenderOrientation::Flipped,
        RenderOrientation::FlippedMirrored,
        RenderOrientation::Diagonal,
    ];

    /// Texture coordinates for the four quad corners.
    pub fn tex_coords(self) -> [[f32; 2]; 4] {
        match self {
            RenderOrientation::Standard => [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            RenderOrientation::Mirrored => [[1.0, 0.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            RenderOrientation::Flipped => [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]],
            RenderOrientation::FlippedMirrored => [[1.0, 1.0], [0.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
            RenderOrientation::Diagonal => [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]],
        }
    }

    /// Index into per-orientation buffers.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether sampling through this orientation swaps the axes.
    pub fn is_transposed(self) -> bool {
        self == RenderOrientation::Diagonal
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" | "std" => Some(RenderOrientation::Standard),
            "mirrored" => Some(RenderOrientation::Mirrored),
            "flipped" => Some(RenderOrientation::Flipped),
            "flipped_mirrored" => Some(RenderOrientation::FlippedMirrored),
            "diagonal" => Some(RenderOrientation::Diagonal),
            _ => None,
        }
    }
}

/// Interpolated texture coordinate at normalized output position `(s, t)`,
/// where `s` runs along a row and `t` down the rows.
pub fn interpolate(coords: &[[f32; 2]; 4], s: f32, t: f32) -> [f32; 2] {
    let mut uv = [0.0; 2];
    for (axis, value) in uv.iter_mut().enumerate() {
        let top = coords[0][axis] + (coords[1][axis] - coords[0][axis]) * s;
        let bottom = coords[2][axis] + (coords[3][axis] - coords[2][axis]) * s;
        *value = top + (bottom - top) * t;
    }
    uv
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadPosition {
    pub position: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadTexCoord {
    pub tex_coord: [f32; 2],
}

/// Clip-space corners for a device whose first framebuffer row is at +Y.
pub const QUAD_POSITIONS: [QuadPosition; 4] = [
    QuadPosition { position: [-1.0, 1.0] },
    QuadPosition { position: [1.0, 1.0] },
    QuadPosition { position: [-1.0, -1.0] },
    QuadPosition { position: [1.0, -1.0] },
];

pub fn quad_tex_coords(orientation: RenderOrientation) -> [QuadTexCoord; 4] {
    orientation.tex_coords().map(|tex_coord| QuadTexCoord { tex_coord })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(o: RenderOrientation, uv: [f32; 2]) -> [f32; 2] {
        interpolate(&o.tex_coords(), uv[0], uv[1])
    }

    #[test]
    fn test_standard_is_identity() {
        assert_eq!(apply(RenderOrientation::Standard, [0.25, 0.75]), [0.25, 0.75]);
    }

    #[test]
    fn test_flip_is_self_inverse() {
        for o in [
            RenderOrientation::Flipped,
            RenderOrientation::Mirrored,
            RenderOrientation::FlippedMirrored,
            RenderOrientation::Diagonal,
        ] {
            let p = [0.125, 0.625];
            assert_eq!(apply(o, apply(o, p)), p, "{:?}", o);
        }
    }

    #[test]
    fn test_diagonal_swaps_axes() {
        assert_eq!(apply(RenderOrientation::Diagonal, [0.25, 0.5]), [0.5, 0.25]);
        assert!(RenderOrientation::Diagonal.is_transposed());
        assert!(!RenderOrientation::Flipped.is_transposed());
    }

    #[test]
    fn test_orientation_indices_are_distinct() {
        let mut seen: Vec<usize> = RenderOrientation::ALL.iter().map(|o| o.index()).collect();
        seen.dedup();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(RenderOrientation::from_str("Flipped"), Some(RenderOrientation::Flipped));
        assert_eq!(RenderOrientation::from_str("sideways"), None);
    }
}
