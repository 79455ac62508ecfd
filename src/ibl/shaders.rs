//! WGSL programs for the GPU bake.
//!
//! Capture programs share a vertex stage that draws the unit cube through one
//! cube-face camera (`@group(0)`); their fragment stages read `@group(1)`.

use crate::pipeline::FULLSCREEN_VERTEX_SHADER;

/// Cube-face capture vertex stage and the per-draw parameter block
pub const CAPTURE_COMMON: &str = r#"
const PI: f32 = 3.14159265359;

struct FaceUniform {
    view_proj: mat4x4<f32>,
}

struct CaptureParams {
    roughness: f32,
    source_size: f32,
    sample_delta: f32,
    source_lod: f32,
    sample_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct CaptureOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) local_position: vec3<f32>,
}

@group(0) @binding(0) var<uniform> face: FaceUniform;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> CaptureOutput {
    var output: CaptureOutput;
    output.local_position = position;
    output.clip_position = face.view_proj * vec4<f32>(position, 1.0);
    return output;
}
"#;

/// Panorama lookup by direction
pub const EQUIRECT_FRAGMENT: &str = r#"
@group(1) @binding(0) var<uniform> params: CaptureParams;
@group(1) @binding(1) var equirect_map: texture_2d<f32>;
@group(1) @binding(2) var source_sampler: sampler;

fn sample_spherical_map(dir: vec3<f32>) -> vec2<f32> {
    let inv_atan = vec2<f32>(0.5 / PI, 1.0 / PI);
    let uv = vec2<f32>(atan2(dir.z, dir.x), asin(clamp(dir.y, -1.0, 1.0))) * inv_atan + 0.5;
    // Row 0 of the panorama is the zenith
    return vec2<f32>(uv.x, 1.0 - uv.y);
}

@fragment
fn fs_main(input: CaptureOutput) -> @location(0) vec4<f32> {
    let dir = normalize(input.local_position);
    let color = textureSampleLevel(equirect_map, source_sampler, sample_spherical_map(dir), 0.0).rgb;
    return vec4<f32>(color, 1.0);
}
"#;

/// Next mip from the previous one; the bound view holds only the source level
pub const DOWNSAMPLE_FRAGMENT: &str = r#"
@group(1) @binding(0) var<uniform> params: CaptureParams;
@group(1) @binding(1) var source_cube: texture_cube<f32>;
@group(1) @binding(2) var source_sampler: sampler;

@fragment
fn fs_main(input: CaptureOutput) -> @location(0) vec4<f32> {
    let dir = normalize(input.local_position);
    let color = textureSampleLevel(source_cube, source_sampler, dir, params.source_lod).rgb;
    return vec4<f32>(color, 1.0);
}
"#;

/// Cosine-weighted hemisphere integral with a fixed angular step
pub const IRRADIANCE_FRAGMENT: &str = r#"
@group(1) @binding(0) var<uniform> params: CaptureParams;
@group(1) @binding(1) var source_cube: texture_cube<f32>;
@group(1) @binding(2) var source_sampler: sampler;

@fragment
fn fs_main(input: CaptureOutput) -> @location(0) vec4<f32> {
    let normal = normalize(input.local_position);

    var up_hint = vec3<f32>(0.0, 1.0, 0.0);
    if abs(normal.y) >= 0.999 {
        up_hint = vec3<f32>(1.0, 0.0, 0.0);
    }
    let right = normalize(cross(up_hint, normal));
    let up = cross(normal, right);

    var irradiance = vec3<f32>(0.0);
    var sample_count = 0.0;
    for (var phi = 0.0; phi < 2.0 * PI; phi += params.sample_delta) {
        for (var theta = 0.0; theta < 0.5 * PI; theta += params.sample_delta) {
            let tangent_sample = vec3<f32>(sin(theta) * cos(phi), sin(theta) * sin(phi), cos(theta));
            let sample_vec = tangent_sample.x * right + tangent_sample.y * up + tangent_sample.z * normal;
            irradiance += textureSampleLevel(source_cube, source_sampler, sample_vec, params.source_lod).rgb
                * cos(theta) * sin(theta);
            sample_count += 1.0;
        }
    }

    return vec4<f32>(PI * irradiance / max(sample_count, 1.0), 1.0);
}
"#;

/// GGX sampling helpers shared by the prefilter and LUT programs
pub const GGX_SAMPLING: &str = r#"
fn radical_inverse_vdc(bits: u32) -> f32 {
    return f32(reverseBits(bits)) * 2.3283064365386963e-10;
}

fn hammersley(i: u32, n: u32) -> vec2<f32> {
    return vec2<f32>(f32(i) / f32(n), radical_inverse_vdc(i));
}

fn importance_sample_ggx(xi: vec2<f32>, n: vec3<f32>, roughness: f32) -> vec3<f32> {
    let a = roughness * roughness;
    let phi = 2.0 * PI * xi.x;
    let cos_theta = sqrt((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y));
    let sin_theta = sqrt(max(1.0 - cos_theta * cos_theta, 0.0));
    let h = vec3<f32>(cos(phi) * sin_theta, sin(phi) * sin_theta, cos_theta);

    var up_hint = vec3<f32>(0.0, 0.0, 1.0);
    if abs(n.z) >= 0.999 {
        up_hint = vec3<f32>(1.0, 0.0, 0.0);
    }
    let tangent = normalize(cross(up_hint, n));
    let bitangent = cross(n, tangent);
    return normalize(tangent * h.x + bitangent * h.y + n * h.z);
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * denom * denom);
}
"#;

/// GGX-importance-sampled prefilter; samples below the surface are skipped
pub const PREFILTER_FRAGMENT: &str = r#"
@group(1) @binding(0) var<uniform> params: CaptureParams;
@group(1) @binding(1) var source_cube: texture_cube<f32>;
@group(1) @binding(2) var source_sampler: sampler;

@fragment
fn fs_main(input: CaptureOutput) -> @location(0) vec4<f32> {
    let n = normalize(input.local_position);
    let v = n;

    var color = vec3<f32>(0.0);
    var total_weight = 0.0;
    let sa_texel = 4.0 * PI / (6.0 * params.source_size * params.source_size);

    for (var i = 0u; i < params.sample_count; i++) {
        let xi = hammersley(i, params.sample_count);
        let h = importance_sample_ggx(xi, n, params.roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);

        let n_dot_l = dot(n, l);
        if n_dot_l > 0.0 {
            let n_dot_h = max(dot(n, h), 0.0);
            let h_dot_v = max(dot(h, v), 0.0);
            var lod = 0.0;
            if params.roughness > 0.0 {
                let pdf = distribution_ggx(n_dot_h, params.roughness) * n_dot_h / (4.0 * h_dot_v) + 0.0001;
                let sa_sample = 1.0 / (f32(params.sample_count) * pdf + 0.0001);
                lod = max(0.5 * log2(sa_sample / sa_texel), 0.0);
            }
            color += textureSampleLevel(source_cube, source_sampler, l, lod).rgb * n_dot_l;
            total_weight += n_dot_l;
        }
    }

    return vec4<f32>(color / max(total_weight, 0.001), 1.0);
}
"#;

/// Full-screen split-sum integration into a two-channel target
pub const BRDF_FRAGMENT: &str = r#"
const PI: f32 = 3.14159265359;

struct BrdfParams {
    sample_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<uniform> params: BrdfParams;

fn geometry_schlick_ggx_ibl(n_dot_x: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec2<f32> {
    let n_dot_v = max(input.uv.x, 0.0001);
    let roughness = input.uv.y;
    let v = vec3<f32>(sqrt(1.0 - n_dot_v * n_dot_v), 0.0, n_dot_v);
    let n = vec3<f32>(0.0, 0.0, 1.0);

    var scale = 0.0;
    var bias = 0.0;
    for (var i = 0u; i < params.sample_count; i++) {
        let xi = hammersley(i, params.sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);

        let n_dot_l = max(l.z, 0.0);
        let n_dot_h = max(h.z, 0.0);
        let v_dot_h = max(dot(v, h), 0.0);
        if n_dot_l > 0.0 {
            let g = geometry_schlick_ggx_ibl(n_dot_v, roughness) * geometry_schlick_ggx_ibl(n_dot_l, roughness);
            let g_vis = g * v_dot_h / max(n_dot_h * n_dot_v, 0.000001);
            let fc = pow(1.0 - v_dot_h, 5.0);
            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }

    let count = f32(max(params.sample_count, 1u));
    return vec2<f32>(scale / count, bias / count);
}
"#;

/// Complete module for one capture stage
pub fn capture_shader(fragment: &str) -> String {
    [CAPTURE_COMMON, fragment].concat()
}

pub fn prefilter_shader() -> String {
    [CAPTURE_COMMON, GGX_SAMPLING, PREFILTER_FRAGMENT].concat()
}

pub fn brdf_shader() -> String {
    [FULLSCREEN_VERTEX_SHADER, BRDF_FRAGMENT, GGX_SAMPLING].concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shader_validation::validate;

    #[test]
    fn test_capture_shaders_validate() {
        validate(&capture_shader(EQUIRECT_FRAGMENT));
        validate(&capture_shader(DOWNSAMPLE_FRAGMENT));
        validate(&capture_shader(IRRADIANCE_FRAGMENT));
        validate(&prefilter_shader());
    }

    #[test]
    fn test_brdf_shader_validates() {
        validate(&brdf_shader());
    }
}
