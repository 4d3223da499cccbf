//! Binary gradient framing for blob transport.
//!
//! Layout: 4-byte big-endian metadata length, JSON metadata
//! (`{keys, shapes, dtype}`), then the raw little-endian f64 buffers of
//! every array concatenated in key order.

use super::GradientMap;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

const DTYPE_F64: &str = "float64";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("gradient blob truncated: {0}")]
    Truncated(String),
    #[error("invalid gradient metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("unsupported gradient dtype: {0}")]
    UnsupportedDtype(String),
    #[error("gradient payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("gradient shape error: {0}")]
    Shape(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct GradientMetadata {
    keys: Vec<String>,
    shapes: Vec<Vec<usize>>,
    dtype: String,
}

/// Serialize a gradient map into the framed binary format. Keys are written
/// in sorted order so equal maps produce identical blobs.
pub fn encode_gradients(gradients: &GradientMap) -> Result<Vec<u8>, CodecError> {
    let mut keys: Vec<&String> = gradients.keys().collect();
    keys.sort();

    let metadata = GradientMetadata {
        keys: keys.iter().map(|k| (*k).clone()).collect(),
        shapes: keys.iter().map(|k| gradients[*k].shape().to_vec()).collect(),
        dtype: DTYPE_F64.to_string(),
    };
    let metadata_bytes = serde_json::to_vec(&metadata)?;

    let payload_len: usize = keys.iter().map(|k| gradients[*k].len() * 8).sum();
    let mut out = Vec::with_capacity(4 + metadata_bytes.len() + payload_len);
    out.write_u32::<BigEndian>(metadata_bytes.len() as u32)
        .map_err(|e| CodecError::Truncated(e.to_string()))?;
    out.extend_from_slice(&metadata_bytes);
    for key in keys {
        for value in gradients[key].iter() {
            out.write_f64::<LittleEndian>(*value)
                .map_err(|e| CodecError::Truncated(e.to_string()))?;
        }
    }
    Ok(out)
}

/// Parse a framed gradient blob back into a gradient map.
pub fn decode_gradients(bytes: &[u8]) -> Result<GradientMap, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::Truncated(format!(
            "blob is {} bytes, need at least 4 for the metadata header",
            bytes.len()
        )));
    }
    let metadata_len = BigEndian::read_u32(&bytes[..4]) as usize;
    let metadata_end = 4 + metadata_len;
    if bytes.len() < metadata_end {
        return Err(CodecError::Truncated(format!(
            "metadata header claims {metadata_len} bytes, blob has {}",
            bytes.len() - 4
        )));
    }

    let metadata: GradientMetadata = serde_json::from_slice(&bytes[4..metadata_end])?;
    if metadata.dtype != DTYPE_F64 {
        return Err(CodecError::UnsupportedDtype(metadata.dtype));
    }
    if metadata.keys.len() != metadata.shapes.len() {
        return Err(CodecError::Shape(format!(
            "{} keys but {} shapes",
            metadata.keys.len(),
            metadata.shapes.len()
        )));
    }

    // shape metadata comes off the wire, so the element and byte counts
    // must not be allowed to wrap
    let mut counts = Vec::with_capacity(metadata.shapes.len());
    let mut total_elements: usize = 0;
    for shape in &metadata.shapes {
        let count = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| CodecError::Shape(format!("element count overflows for {shape:?}")))?;
        total_elements = total_elements
            .checked_add(count)
            .ok_or_else(|| CodecError::Shape("total element count overflows".to_string()))?;
        counts.push(count);
    }
    let expected_payload = total_elements
        .checked_mul(8)
        .ok_or_else(|| CodecError::Shape("payload byte length overflows".to_string()))?;
    let payload = &bytes[metadata_end..];
    if payload.len() != expected_payload {
        return Err(CodecError::LengthMismatch {
            expected: expected_payload,
            actual: payload.len(),
        });
    }

    let mut cursor = Cursor::new(payload);
    let mut gradients = GradientMap::with_capacity(metadata.keys.len());
    for ((key, shape), count) in metadata.keys.into_iter().zip(metadata.shapes).zip(counts) {
        let mut data = vec![0.0; count];
        cursor
            .read_f64_into::<LittleEndian>(&mut data)
            .map_err(|e| CodecError::Truncated(e.to_string()))?;
        let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| CodecError::Shape(e.to_string()))?;
        gradients.insert(key, array);
    }
    Ok(gradients)
}

/// Cheap well-formedness check used before accepting an uploaded blob.
pub fn validate_gradients(bytes: &[u8]) -> bool {
    decode_gradients(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> GradientMap {
        let mut gradients = GradientMap::new();
        gradients.insert(
            "layer_0_weights".to_string(),
            array![[0.1, -0.2], [0.3, 0.4]].into_dyn(),
        );
        gradients.insert("layer_0_biases".to_string(), array![0.01, 0.02].into_dyn());
        gradients
    }

    #[test]
    fn roundtrip_preserves_shapes_and_values() {
        let gradients = sample();
        let bytes = encode_gradients(&gradients).unwrap();
        let decoded = decode_gradients(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["layer_0_weights"].shape(), &[2, 2]);
        assert_eq!(decoded["layer_0_weights"], gradients["layer_0_weights"]);
        assert_eq!(decoded["layer_0_biases"], gradients["layer_0_biases"]);
    }

    #[test]
    fn encoding_is_deterministic() {
        let gradients = sample();
        assert_eq!(
            encode_gradients(&gradients).unwrap(),
            encode_gradients(&gradients).unwrap()
        );
    }

    #[test]
    fn truncated_blob_rejected() {
        let bytes = encode_gradients(&sample()).unwrap();
        assert!(!validate_gradients(&bytes[..bytes.len() - 3]));
        assert!(!validate_gradients(&bytes[..2]));
        assert!(validate_gradients(&bytes));
    }

    #[test]
    fn wrong_dtype_rejected() {
        let metadata = br#"{"keys":[],"shapes":[],"dtype":"float32"}"#;
        let mut bytes = (metadata.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(metadata);
        assert!(matches!(
            decode_gradients(&bytes),
            Err(CodecError::UnsupportedDtype(_))
        ));
    }

    fn framed(metadata: &str) -> Vec<u8> {
        let mut bytes = (metadata.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(metadata.as_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        bytes
    }

    #[test]
    fn overflowing_shape_metadata_rejected() {
        // dimension product wraps
        let metadata = format!(
            r#"{{"keys":["w"],"shapes":[[{},8]],"dtype":"float64"}}"#,
            usize::MAX / 8 + 2
        );
        assert!(matches!(
            decode_gradients(&framed(&metadata)),
            Err(CodecError::Shape(_))
        ));

        // element count fits but the byte length wraps
        let metadata = format!(
            r#"{{"keys":["w"],"shapes":[[{}]],"dtype":"float64"}}"#,
            usize::MAX / 8 + 2
        );
        assert!(matches!(
            decode_gradients(&framed(&metadata)),
            Err(CodecError::Shape(_))
        ));
    }

    #[test]
    fn payload_length_checked() {
        let mut bytes = encode_gradients(&sample()).unwrap();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decode_gradients(&bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
    }
}
