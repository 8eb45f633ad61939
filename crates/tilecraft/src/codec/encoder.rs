use byteorder::{LittleEndian, WriteBytesExt};
use cgmath::{InnerSpace, Vector3};

use crate::codec::{
    Accessor, AccessorId, AccessorType, BufferTarget, ComponentType, Quantization, SceneBuffers,
};
use crate::helpers::{TileError, TileResult};

pub const QUANTIZATION_RANGE_SCALE: f64 = 65535.0;

/// Narrower ranges are widened to this before a scale is derived.
pub const MIN_QUANTIZATION_RANGE: f64 = 1.0e-5;

#[derive(Debug, Clone, PartialEq)]
pub enum Encoding {
    /// Per-component 16-bit quantization over `[min, max]`.
    StandardQuantization { min: Vec<f64>, max: Vec<f64> },
    RawFloat,
    OctEncodedNormal,
}

pub fn widened_range(min: f64, max: f64) -> (f64, f64) {
    if max - min < MIN_QUANTIZATION_RANGE {
        (min, min + MIN_QUANTIZATION_RANGE)
    } else {
        (min, max)
    }
}

#[inline]
pub fn quantize(v: f64, min: f64, max: f64) -> u16 {
    let t = (v - min) / (max - min) * QUANTIZATION_RANGE_SCALE;
    t.round().clamp(0.0, QUANTIZATION_RANGE_SCALE) as u16
}

#[inline]
pub fn dequantize(q: u16, min: f64, max: f64) -> f64 {
    min + q as f64 * (max - min) / QUANTIZATION_RANGE_SCALE
}

#[inline]
fn sign_not_zero(v: f64) -> f64 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

#[inline]
fn to_unorm8(v: f64) -> u8 {
    ((v.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0).round() as u8
}

#[inline]
fn from_unorm8(v: u8) -> f64 {
    v as f64 / 255.0 * 2.0 - 1.0
}

/// Octahedral projection of a unit vector into two bytes.
pub fn oct_encode(n: Vector3<f64>) -> [u8; 2] {
    let l1 = n.x.abs() + n.y.abs() + n.z.abs();
    if l1 <= f64::EPSILON {
        return [to_unorm8(0.0), to_unorm8(0.0)];
    }
    let (mut x, mut y) = (n.x / l1, n.y / l1);
    if n.z < 0.0 {
        let (ox, oy) = (x, y);
        x = (1.0 - oy.abs()) * sign_not_zero(ox);
        y = (1.0 - ox.abs()) * sign_not_zero(oy);
    }
    [to_unorm8(x), to_unorm8(y)]
}

pub fn oct_decode(e: [u8; 2]) -> Vector3<f64> {
    let mut x = from_unorm8(e[0]);
    let mut y = from_unorm8(e[1]);
    let z = 1.0 - x.abs() - y.abs();
    if z < 0.0 {
        let (ox, oy) = (x, y);
        x = (1.0 - oy.abs()) * sign_not_zero(ox);
        y = (1.0 - ox.abs()) * sign_not_zero(oy);
    }
    let v = Vector3::new(x, y, z);
    if v.magnitude2() <= f64::EPSILON {
        return Vector3::new(0.0, 0.0, 1.0);
    }
    v.normalize()
}

/// Encodes one attribute stream into the shared buffer and registers its accessor.
pub fn encode_attribute(
    buffers: &mut SceneBuffers,
    values: &[f64],
    components: usize,
    encoding: &Encoding,
) -> TileResult<AccessorId> {
    let accessor_type = AccessorType::from_components(components)?;
    if values.len() % components != 0 {
        return Err(TileError::SceneDataError(format!(
            "{} values is not a multiple of {} components",
            values.len(),
            components
        )));
    }
    let count = values.len() / components;

    let mut bytes = Vec::new();
    let accessor = match encoding {
        Encoding::StandardQuantization { min, max } => {
            if min.len() < components || max.len() < components {
                return Err(TileError::SceneDataError(
                    "quantization range has too few components".into(),
                ));
            }
            let ranges: Vec<(f64, f64)> = (0..components)
                .map(|c| widened_range(min[c], max[c]))
                .collect();
            bytes.reserve(values.len() * 2);
            for (i, v) in values.iter().enumerate() {
                let (lo, hi) = ranges[i % components];
                bytes.write_u16::<LittleEndian>(quantize(*v, lo, hi))?;
            }
            Accessor {
                buffer_view: buffers.add_view(&bytes, Some(BufferTarget::ArrayBuffer)),
                component_type: ComponentType::UnsignedShort,
                accessor_type,
                count,
                min: None,
                max: None,
                quantization: Some(Quantization {
                    decoded_min: ranges.iter().map(|r| r.0).collect(),
                    decoded_max: ranges.iter().map(|r| r.1).collect(),
                }),
            }
        }
        Encoding::RawFloat => {
            bytes.reserve(values.len() * 4);
            for v in values {
                bytes.write_f32::<LittleEndian>(*v as f32)?;
            }
            Accessor {
                buffer_view: buffers.add_view(&bytes, Some(BufferTarget::ArrayBuffer)),
                component_type: ComponentType::Float,
                accessor_type,
                count,
                min: None,
                max: None,
                quantization: None,
            }
        }
        Encoding::OctEncodedNormal => {
            if components != 3 {
                return Err(TileError::SceneDataError(
                    "oct encoding needs 3 components".into(),
                ));
            }
            bytes.reserve(count * 2);
            for n in values.chunks_exact(3) {
                bytes.extend_from_slice(&oct_encode(Vector3::new(n[0], n[1], n[2])));
            }
            Accessor {
                buffer_view: buffers.add_view(&bytes, Some(BufferTarget::ArrayBuffer)),
                component_type: ComponentType::UnsignedByte,
                accessor_type: AccessorType::Vec2,
                count,
                min: None,
                max: None,
                quantization: None,
            }
        }
    };

    Ok(buffers.add_accessor(accessor))
}

/// 16-bit indices unless some index needs 32 bits.
pub fn index_component_type(indices: &[u32]) -> ComponentType {
    if indices.iter().any(|&i| i > u16::MAX as u32) {
        ComponentType::UnsignedInt
    } else {
        ComponentType::UnsignedShort
    }
}

pub fn encode_indices(buffers: &mut SceneBuffers, indices: &[u32]) -> TileResult<AccessorId> {
    let component_type = index_component_type(indices);
    let mut bytes = Vec::with_capacity(indices.len() * component_type.size());
    for &i in indices {
        match component_type {
            ComponentType::UnsignedInt => bytes.write_u32::<LittleEndian>(i)?,
            _ => bytes.write_u16::<LittleEndian>(i as u16)?,
        }
    }
    let buffer_view = buffers.add_view(&bytes, Some(BufferTarget::ElementArrayBuffer));
    Ok(buffers.add_accessor(Accessor {
        buffer_view,
        component_type,
        accessor_type: AccessorType::Scalar,
        count: indices.len(),
        min: None,
        max: None,
        quantization: None,
    }))
}

/// Batch ids are always 16-bit.
pub fn encode_batch_ids(buffers: &mut SceneBuffers, ids: &[u32]) -> TileResult<AccessorId> {
    let mut bytes = Vec::with_capacity(ids.len() * 2);
    for &id in ids {
        let id = u16::try_from(id).map_err(|_| {
            TileError::SceneDataError(format!("batch id {} does not fit in 16 bits", id))
        })?;
        bytes.write_u16::<LittleEndian>(id)?;
    }
    let buffer_view = buffers.add_view(&bytes, Some(BufferTarget::ArrayBuffer));
    Ok(buffers.add_accessor(Accessor {
        buffer_view,
        component_type: ComponentType::UnsignedShort,
        accessor_type: AccessorType::Scalar,
        count: ids.len(),
        min: None,
        max: None,
        quantization: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_error_within_one_step() {
        let (lo, hi) = (-3.5, 12.25);
        let step = (hi - lo) / QUANTIZATION_RANGE_SCALE;
        for k in 0..=100 {
            let v = lo + (hi - lo) * k as f64 / 100.0;
            let back = dequantize(quantize(v, lo, hi), lo, hi);
            assert!((back - v).abs() <= step);
        }
        assert_eq!(quantize(lo, lo, hi), 0);
        assert_eq!(quantize(hi, lo, hi), 65535);
    }

    #[test]
    fn zero_width_range_is_widened() {
        let mut sb = SceneBuffers::new();
        let id = encode_attribute(
            &mut sb,
            &[2.0, 2.0, 2.0],
            1,
            &Encoding::StandardQuantization {
                min: vec![2.0],
                max: vec![2.0],
            },
        )
        .unwrap();
        let q = sb.accessor(id).quantization.clone().unwrap();
        assert!(q.decoded_max[0] - q.decoded_min[0] >= MIN_QUANTIZATION_RANGE);
        assert!(q.decode_matrix().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn oct_round_trip_axes_and_diagonals() {
        let dirs = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0).normalize(),
            Vector3::new(-1.0, 0.5, -0.25).normalize(),
        ];
        for d in dirs {
            let back = oct_decode(oct_encode(d));
            assert!(back.dot(d) >= 1.0 - 0.002, "{:?} -> {:?}", d, back);
        }
    }

    #[test]
    fn index_width_switches_above_u16() {
        assert_eq!(index_component_type(&[0, 1, 65535]), ComponentType::UnsignedShort);
        assert_eq!(index_component_type(&[0, 65536]), ComponentType::UnsignedInt);

        let mut sb = SceneBuffers::new();
        let id = encode_indices(&mut sb, &[0, 70000, 2]).unwrap();
        let acc = sb.accessor(id);
        assert_eq!(acc.component_type, ComponentType::UnsignedInt);
        assert_eq!(sb.views[acc.buffer_view.0].byte_length, 12);
    }

    #[test]
    fn oversized_batch_id_is_rejected() {
        let mut sb = SceneBuffers::new();
        assert!(encode_batch_ids(&mut sb, &[1, 70000]).is_err());
    }
}
