use serde_json::{json, Map, Value};

use crate::codec::BinaryBuffer;
use crate::helpers::{TileError, TileResult};

pub const QUANTIZED_EXTENSION: &str = "WEB3D_quantized_attributes";
pub const BINARY_BUFFER_NAME: &str = "binary_glTF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessorId(pub usize);

impl BufferViewId {
    pub fn name(&self) -> String {
        format!("bv{}", self.0)
    }
}

impl AccessorId {
    pub fn name(&self) -> String {
        format!("acc{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTarget {
    ArrayBuffer,
    ElementArrayBuffer,
}

impl BufferTarget {
    pub fn gl(&self) -> u32 {
        match self {
            BufferTarget::ArrayBuffer => 34962,
            BufferTarget::ElementArrayBuffer => 34963,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    Float,
}

impl ComponentType {
    pub fn gl(&self) -> u32 {
        match self {
            ComponentType::UnsignedByte => 5121,
            ComponentType::UnsignedShort => 5123,
            ComponentType::UnsignedInt => 5125,
            ComponentType::Float => 5126,
        }
    }

    pub fn from_gl(v: u64) -> TileResult<Self> {
        match v {
            5121 => Ok(ComponentType::UnsignedByte),
            5123 => Ok(ComponentType::UnsignedShort),
            5125 => Ok(ComponentType::UnsignedInt),
            5126 => Ok(ComponentType::Float),
            _ => Err(TileError::SceneDataError(format!(
                "unsupported componentType {}",
                v
            ))),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ComponentType::UnsignedByte => 1,
            ComponentType::UnsignedShort => 2,
            ComponentType::UnsignedInt | ComponentType::Float => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorType {
    Scalar,
    Vec2,
    Vec3,
}

impl AccessorType {
    pub fn from_components(n: usize) -> TileResult<Self> {
        match n {
            1 => Ok(AccessorType::Scalar),
            2 => Ok(AccessorType::Vec2),
            3 => Ok(AccessorType::Vec3),
            _ => Err(TileError::SceneDataError(format!(
                "{} components per element",
                n
            ))),
        }
    }

    pub fn parse(s: &str) -> TileResult<Self> {
        match s {
            "SCALAR" => Ok(AccessorType::Scalar),
            "VEC2" => Ok(AccessorType::Vec2),
            "VEC3" => Ok(AccessorType::Vec3),
            _ => Err(TileError::SceneDataError(format!(
                "unsupported accessor type {}",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessorType::Scalar => "SCALAR",
            AccessorType::Vec2 => "VEC2",
            AccessorType::Vec3 => "VEC3",
        }
    }

    pub fn components(&self) -> usize {
        match self {
            AccessorType::Scalar => 1,
            AccessorType::Vec2 => 2,
            AccessorType::Vec3 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferView {
    pub byte_offset: usize,
    pub byte_length: usize,
    /// `None` for shader sources and images.
    pub target: Option<BufferTarget>,
}

/// Linear decode transform carried by quantized accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantization {
    pub decoded_min: Vec<f64>,
    pub decoded_max: Vec<f64>,
}

impl Quantization {
    /// Column-major (n+1)x(n+1) matrix: diagonal scale, translation in the last column.
    pub fn decode_matrix(&self) -> Vec<f64> {
        let n = self.decoded_min.len();
        let mut m = Vec::with_capacity((n + 1) * (n + 1));
        for col in 0..n {
            for row in 0..n {
                m.push(if row == col {
                    (self.decoded_max[col] - self.decoded_min[col]) / crate::codec::QUANTIZATION_RANGE_SCALE
                } else {
                    0.0
                });
            }
            m.push(0.0);
        }
        m.extend(self.decoded_min.iter().copied());
        m.push(1.0);
        m
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub buffer_view: BufferViewId,
    pub component_type: ComponentType,
    pub accessor_type: AccessorType,
    pub count: usize,
    pub min: Option<Vec<f64>>,
    pub max: Option<Vec<f64>>,
    pub quantization: Option<Quantization>,
}

impl Accessor {
    pub fn byte_length(&self) -> usize {
        self.count * self.accessor_type.components() * self.component_type.size()
    }
}

/// The shared buffer plus the view and accessor tables that index into it.
#[derive(Debug, Default)]
pub struct SceneBuffers {
    pub buffer: BinaryBuffer,
    pub views: Vec<BufferView>,
    pub accessors: Vec<Accessor>,
}

impl SceneBuffers {
    pub fn new() -> Self {
        SceneBuffers {
            buffer: BinaryBuffer::new(),
            views: Vec::new(),
            accessors: Vec::new(),
        }
    }

    pub fn add_view(&mut self, bytes: &[u8], target: Option<BufferTarget>) -> BufferViewId {
        let byte_offset = self.buffer.append(bytes);
        self.views.push(BufferView {
            byte_offset,
            byte_length: bytes.len(),
            target,
        });
        BufferViewId(self.views.len() - 1)
    }

    pub fn add_accessor(&mut self, accessor: Accessor) -> AccessorId {
        self.accessors.push(accessor);
        AccessorId(self.accessors.len() - 1)
    }

    pub fn accessor(&self, id: AccessorId) -> &Accessor {
        &self.accessors[id.0]
    }

    pub fn accessor_mut(&mut self, id: AccessorId) -> &mut Accessor {
        &mut self.accessors[id.0]
    }

    pub fn views_json(&self) -> Map<String, Value> {
        self.views
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut view = json!({
                    "buffer": BINARY_BUFFER_NAME,
                    "byteOffset": v.byte_offset,
                    "byteLength": v.byte_length,
                });
                if let Some(target) = v.target {
                    view["target"] = json!(target.gl());
                }
                (BufferViewId(i).name(), view)
            })
            .collect()
    }

    pub fn accessors_json(&self) -> Map<String, Value> {
        self.accessors
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let mut acc = json!({
                    "bufferView": a.buffer_view.name(),
                    "byteOffset": 0,
                    "componentType": a.component_type.gl(),
                    "count": a.count,
                    "type": a.accessor_type.as_str(),
                });
                if let Some(min) = &a.min {
                    acc["min"] = json!(min);
                }
                if let Some(max) = &a.max {
                    acc["max"] = json!(max);
                }
                if let Some(q) = &a.quantization {
                    acc["extensions"] = json!({
                        QUANTIZED_EXTENSION: {
                            "decodeMatrix": q.decode_matrix(),
                            "decodedMin": q.decoded_min,
                            "decodedMax": q.decoded_max,
                        }
                    });
                }
                (AccessorId(i).name(), acc)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_matrix_layout() {
        let q = Quantization {
            decoded_min: vec![1.0, 2.0],
            decoded_max: vec![1.0 + 65535.0, 2.0 + 2.0 * 65535.0],
        };
        assert_eq!(
            q.decode_matrix(),
            vec![1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 1.0, 2.0, 1.0]
        );
    }

    #[test]
    fn views_record_their_target() {
        let mut sb = SceneBuffers::new();
        let a = sb.add_view(&[0u8; 6], Some(BufferTarget::ElementArrayBuffer));
        let b = sb.add_view(b"void main(){}", None);
        assert_eq!(sb.views[b.0].byte_offset, 8);
        let json = sb.views_json();
        assert_eq!(json[&a.name()]["target"], 34963);
        assert!(json[&b.name()].get("target").is_none());
    }
}
