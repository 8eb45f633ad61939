use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use log::warn;
use serde_json::{json, Map, Value};

use crate::codec::{BufferViewId, SceneBuffers};
use crate::content::TextureImage;
use crate::helpers::{ReadContext, TileResult};
use crate::settings::PublisherConfig;

pub const SAMPLER_NAME: &str = "sampler_0";

const GL_RGB: u32 = 6407;
const GL_RGBA: u32 = 6408;
const GL_LINEAR: u32 = 9729;
const GL_REPEAT: u32 = 10497;
const GL_TEXTURE_2D: u32 = 3553;
const GL_UNSIGNED_BYTE: u32 = 5121;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureSettings {
    pub quality: u8,
    pub max_size: u32,
    pub min_size: u32,
}

impl Default for TextureSettings {
    fn default() -> Self {
        TextureSettings {
            quality: 50,
            max_size: 1024,
            min_size: 64,
        }
    }
}

impl From<&PublisherConfig> for TextureSettings {
    fn from(cfg: &PublisherConfig) -> Self {
        TextureSettings {
            quality: cfg.texture_quality,
            max_size: cfg.max_texture_size,
            min_size: cfg.min_texture_size,
        }
    }
}

/// Texel count the mesh needs along one side at the tile's tolerance.
pub fn required_texture_size(
    mesh_diagonal: f64,
    uv_diagonal: f64,
    tolerance: f64,
    max_size: u32,
) -> u32 {
    if tolerance <= 0.0 || !mesh_diagonal.is_finite() {
        return max_size;
    }
    let uv = uv_diagonal.min(1.0).max(f64::EPSILON);
    let required = 2.0 * mesh_diagonal / (tolerance * uv);
    if !required.is_finite() {
        return max_size;
    }
    required.min(max_size as f64).max(1.0) as u32
}

pub fn nearest_power_of_two(v: u32) -> u32 {
    if v <= 1 {
        return 1;
    }
    let up = v.next_power_of_two();
    let down = up / 2;
    if v - down < up - v {
        down
    } else {
        up
    }
}

/// Target dimensions for a source image given the required size.
pub fn target_dimensions(width: u32, height: u32, required: u32, settings: &TextureSettings) -> (u32, u32) {
    let smaller = width.min(height).max(1);
    let (mut w, mut h) = (width.max(1), height.max(1));
    if required < smaller {
        let side = settings.min_size.max(required).min(smaller);
        let scale = side as f64 / smaller as f64;
        w = ((width as f64 * scale).round() as u32).max(1);
        h = ((height as f64 * scale).round() as u32).max(1);
    }
    let clamp = |v: u32| nearest_power_of_two(v).min(settings.max_size.next_power_of_two());
    (clamp(w), clamp(h))
}

fn has_alpha(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    img.to_rgba8().pixels().any(|p| p.0[3] != 255)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);

impl TextureId {
    pub fn name(&self) -> String {
        format!("texture_{}", self.0)
    }

    pub fn image_name(&self) -> String {
        format!("image_{}", self.0)
    }
}

#[derive(Debug)]
struct EmbeddedTexture {
    identity: u64,
    view: BufferViewId,
    mime: &'static str,
    width: u32,
    height: u32,
    alpha: bool,
}

/// Re-encoded textures of one scene, keyed by source identity.
#[derive(Debug, Default)]
pub struct TextureCache {
    entries: Vec<EmbeddedTexture>,
}

impl TextureCache {
    pub fn new() -> Self {
        TextureCache {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embeds `source` once, resized for `required` texels.
    pub fn add(
        &mut self,
        buffers: &mut SceneBuffers,
        source: &TextureImage,
        required: u32,
        settings: &TextureSettings,
    ) -> TileResult<TextureId> {
        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.identity == source.identity())
        {
            return Ok(TextureId(i));
        }

        let img = image::load_from_memory(source.bytes()).scene_data("texture decode failed")?;
        let (sw, sh) = img.dimensions();
        let (w, h) = target_dimensions(sw, sh, required, settings);
        let img = if (w, h) != (sw, sh) {
            img.resize_exact(w, h, FilterType::Triangle)
        } else {
            img
        };

        let alpha = has_alpha(&img);
        let mut bytes = Vec::new();
        let mime = if alpha {
            img.to_rgba8()
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .scene_data("png encode failed")?;
            "image/png"
        } else {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, settings.quality)
                .encode_image(&rgb)
                .scene_data("jpeg encode failed")?;
            "image/jpeg"
        };
        if (w, h) != (sw, sh) {
            log::debug!("texture {:x} resized {}x{} -> {}x{}", source.identity(), sw, sh, w, h);
        }
        if bytes.is_empty() {
            warn!("texture {:x} encoded to zero bytes", source.identity());
        }

        let view = buffers.add_view(&bytes, None);
        self.entries.push(EmbeddedTexture {
            identity: source.identity(),
            view,
            mime,
            width: w,
            height: h,
            alpha,
        });
        Ok(TextureId(self.entries.len() - 1))
    }

    /// (textures, images, samplers) tables.
    pub fn emit(&self) -> (Map<String, Value>, Map<String, Value>, Map<String, Value>) {
        let mut textures = Map::new();
        let mut images = Map::new();
        let mut samplers = Map::new();
        if self.entries.is_empty() {
            return (textures, images, samplers);
        }
        samplers.insert(
            SAMPLER_NAME.to_string(),
            json!({
                "magFilter": GL_LINEAR,
                "minFilter": GL_LINEAR,
                "wrapS": GL_REPEAT,
                "wrapT": GL_REPEAT,
            }),
        );
        for (i, e) in self.entries.iter().enumerate() {
            let id = TextureId(i);
            let format = if e.alpha { GL_RGBA } else { GL_RGB };
            textures.insert(
                id.name(),
                json!({
                    "format": format,
                    "internalFormat": format,
                    "sampler": SAMPLER_NAME,
                    "source": id.image_name(),
                    "target": GL_TEXTURE_2D,
                    "type": GL_UNSIGNED_BYTE,
                }),
            );
            images.insert(
                id.image_name(),
                json!({
                    "extensions": { "KHR_binary_glTF": {
                        "bufferView": e.view.name(),
                        "mimeType": e.mime,
                        "width": e.width,
                        "height": e.height,
                    }}
                }),
            );
        }
        (textures, images, samplers)
    }
}
