//! Per-frame filter: geometry transform plus a color matrix.

use serde::{Deserialize, Serialize};

use super::matrix::{self, IDENTITY, Mat4};

/// Color transform applied to every pixel: `out = matrix * rgba + offset`.
///
/// `matrix` is column-major. Results are clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorMatrix {
    /// Column-major 4x4 matrix over normalized RGBA.
    pub matrix: Mat4,
    /// Added after the matrix.
    pub offset: [f32; 4],
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl ColorMatrix {
    /// Leaves colors unchanged.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            matrix: IDENTITY,
            offset: [0.0; 4],
        }
    }

    /// BT.601 luma on every color channel.
    #[must_use]
    pub const fn grayscale() -> Self {
        Self {
            matrix: [
                0.299, 0.299, 0.299, 0.0, //
                0.587, 0.587, 0.587, 0.0, //
                0.114, 0.114, 0.114, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
            offset: [0.0; 4],
        }
    }

    /// Warm brown tone.
    #[must_use]
    pub const fn sepia() -> Self {
        Self {
            matrix: [
                0.393, 0.349, 0.272, 0.0, //
                0.769, 0.686, 0.534, 0.0, //
                0.189, 0.168, 0.131, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
            offset: [0.0; 4],
        }
    }

    /// Color negative. Alpha is kept.
    #[must_use]
    pub const fn invert() -> Self {
        Self {
            matrix: [
                -1.0, 0.0, 0.0, 0.0, //
                0.0, -1.0, 0.0, 0.0, //
                0.0, 0.0, -1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
            offset: [1.0, 1.0, 1.0, 0.0],
        }
    }

    /// Look up a preset by name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "identity" | "none" => Some(Self::identity()),
            "grayscale" | "gray" => Some(Self::grayscale()),
            "sepia" => Some(Self::sepia()),
            "invert" => Some(Self::invert()),
            _ => None,
        }
    }

    /// Apply to one normalized RGBA pixel.
    #[must_use]
    pub fn apply(&self, rgba: [f32; 4]) -> [f32; 4] {
        let mut out = matrix::transform(&self.matrix, rgba);
        for (value, offset) in out.iter_mut().zip(self.offset) {
            *value = (*value + offset).clamp(0.0, 1.0);
        }
        out
    }
}

/// Filter run by every render context.
///
/// `mvp` positions the full-frame quad in clip space; the color matrix is
/// applied to each sampled pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameFilter {
    /// Column-major model-view-projection matrix.
    pub mvp: Mat4,
    /// Per-pixel color transform.
    pub color: ColorMatrix,
}

impl Default for FrameFilter {
    fn default() -> Self {
        Self {
            mvp: IDENTITY,
            color: ColorMatrix::identity(),
        }
    }
}

impl FrameFilter {
    /// Identity geometry with `color`.
    #[must_use]
    pub const fn with_color(color: ColorMatrix) -> Self {
        Self {
            mvp: IDENTITY,
            color,
        }
    }

    /// Apply the color transform to an 8-bit RGBA pixel.
    #[must_use]
    pub fn apply_color(&self, px: [u8; 4]) -> [u8; 4] {
        let out = self.color.apply(px.map(|c| f32::from(c) / 255.0));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let px = out.map(|c| (c * 255.0).round() as u8);
        px
    }
}

/// Uniform block matching `Uniforms` in [`SHADER`].
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct FilterUniforms {
    mvp: Mat4,
    tex: Mat4,
    color: Mat4,
    offset: [f32; 4],
}

impl FilterUniforms {
    pub(crate) const fn new(filter: &FrameFilter, tex: &Mat4) -> Self {
        Self {
            mvp: filter.mvp,
            tex: *tex,
            color: filter.color.matrix,
            offset: filter.color.offset,
        }
    }
}

/// Full-frame quad with the filter math.
pub(crate) const SHADER: &str = r"
struct Uniforms {
    mvp: mat4x4<f32>,
    tex: mat4x4<f32>,
    color: mat4x4<f32>,
    offset: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var t_texture: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;
@group(0) @binding(2) var<uniform> u: Uniforms;

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2(-1.0, -1.0),
        vec2( 1.0, -1.0),
        vec2(-1.0,  1.0),
        vec2(-1.0,  1.0),
        vec2( 1.0, -1.0),
        vec2( 1.0,  1.0),
    );

    var uvs = array<vec2<f32>, 6>(
        vec2(0.0, 1.0),
        vec2(1.0, 1.0),
        vec2(0.0, 0.0),
        vec2(0.0, 0.0),
        vec2(1.0, 1.0),
        vec2(1.0, 0.0),
    );

    var out: VertexOutput;
    out.position = u.mvp * vec4(positions[idx], 0.0, 1.0);
    out.uv = (u.tex * vec4(uvs[idx], 0.0, 1.0)).xy;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let rgba = textureSample(t_texture, s_sampler, in.uv);
    return clamp(u.color * rgba + u.offset, vec4(0.0), vec4(1.0));
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keeps_pixels() {
        let filter = FrameFilter::default();
        assert_eq!(filter.apply_color([10, 20, 30, 255]), [10, 20, 30, 255]);
    }

    #[test]
    fn grayscale_uses_bt601_luma() {
        let filter = FrameFilter::with_color(ColorMatrix::grayscale());
        let [r, g, b, a] = filter.apply_color([255, 0, 0, 255]);
        assert_eq!((r, g, b, a), (76, 76, 76, 255));
    }

    #[test]
    fn invert_keeps_alpha() {
        let filter = FrameFilter::with_color(ColorMatrix::invert());
        assert_eq!(filter.apply_color([0, 255, 100, 200]), [255, 0, 155, 200]);
    }

    #[test]
    fn sepia_saturates() {
        let filter = FrameFilter::with_color(ColorMatrix::sepia());
        let [r, g, b, _] = filter.apply_color([255, 255, 255, 255]);
        assert_eq!(r, 255);
        assert_eq!(g, 255);
        assert_eq!(b, 239);
    }

    #[test]
    fn presets_by_name() {
        assert_eq!(ColorMatrix::preset("sepia"), Some(ColorMatrix::sepia()));
        assert!(ColorMatrix::preset("posterize").is_none());
    }

    #[test]
    fn filter_reads_partial_json() {
        let filter: FrameFilter = serde_json::from_str(
            r#"{ "color": { "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1], "offset": [0.5,0,0,0] } }"#,
        )
        .unwrap();
        assert_eq!(filter.mvp, IDENTITY);
        assert_eq!(filter.apply_color([0, 0, 0, 255]), [128, 0, 0, 255]);
    }
}
