//! Minimal FlatBuffers walk over a TFLite model.
//!
//! The driver needs exactly one thing from a model blob: the byte sizes of
//! the input tensors of the first subgraph and the output tensors of the
//! last subgraph. Instead of pulling in a schema compiler for that, this
//! module walks the handful of tables involved directly, with every offset
//! bounds-checked against the blob.
//!
//! FlatBuffers refresher: the file starts with a u32 offset to the root
//! table. A table begins with an i32 back-offset to its vtable; the vtable
//! lists per-field data offsets (0 = field absent). Offsets to child
//! objects (vectors, strings, tables) are u32s relative to where they are
//! stored and always point forward.

use crate::error::{ModelError, Result};

/// TFLite file identifier at bytes 4..8.
pub const FILE_IDENTIFIER: &[u8; 4] = b"TFL3";

// Field indices from the TFLite schema.
const MODEL_FIELD_SUBGRAPHS: usize = 2;
const SUBGRAPH_FIELD_TENSORS: usize = 0;
const SUBGRAPH_FIELD_INPUTS: usize = 1;
const SUBGRAPH_FIELD_OUTPUTS: usize = 2;
const TENSOR_FIELD_SHAPE: usize = 0;
const TENSOR_FIELD_TYPE: usize = 1;

/// IFM/OFM byte-size vectors derived from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDims {
    /// Byte size of each input of the first subgraph. Zero-size tensors are
    /// elided.
    pub ifm: Vec<u32>,
    /// Byte size of each output of the last subgraph. Zero-size tensors are
    /// elided.
    pub ofm: Vec<u32>,
}

/// Derive [`ModelDims`] from a TFLite model blob.
///
/// # Errors
///
/// Fails on a short or unidentified blob, structurally broken tables, tensor
/// types the driver cannot size, or sizes that overflow the wire `u32`.
pub fn model_dims(data: &[u8]) -> Result<ModelDims> {
    let reader = Reader { data };

    if data.len() < 8 {
        return Err(ModelError::TooSmall { size: data.len() });
    }
    if &data[4..8] != FILE_IDENTIFIER {
        return Err(ModelError::InvalidHeader);
    }

    let root = reader.indirect(0)?;
    let subgraphs = reader
        .table_field(root, MODEL_FIELD_SUBGRAPHS)?
        .ok_or_else(|| ModelError::malformed("model has no subgraphs"))?;
    let subgraphs = reader.vector(reader.indirect(subgraphs)?)?;
    if subgraphs.len == 0 {
        return Err(ModelError::malformed("model has no subgraphs"));
    }

    let first = reader.indirect(subgraphs.element(0)?)?;
    let last = reader.indirect(subgraphs.element(subgraphs.len - 1)?)?;

    let ifm = subgraph_dims(&reader, first, SUBGRAPH_FIELD_INPUTS)?;
    let ofm = subgraph_dims(&reader, last, SUBGRAPH_FIELD_OUTPUTS)?;

    tracing::debug!("Model dims: ifm={ifm:?}, ofm={ofm:?}");
    Ok(ModelDims { ifm, ofm })
}

/// Byte sizes of the tensors a subgraph's `inputs` or `outputs` map names.
fn subgraph_dims(reader: &Reader<'_>, subgraph: usize, map_field: usize) -> Result<Vec<u32>> {
    let tensors = reader
        .table_field(subgraph, SUBGRAPH_FIELD_TENSORS)?
        .ok_or_else(|| ModelError::malformed("subgraph has no tensors"))?;
    let tensors = reader.vector(reader.indirect(tensors)?)?;

    let Some(map) = reader.table_field(subgraph, map_field)? else {
        return Ok(Vec::new());
    };
    let map = reader.vector(reader.indirect(map)?)?;

    let mut dims = Vec::with_capacity(map.len);
    for i in 0..map.len {
        let index = reader.i32_at(map.element(i)?)?;
        let index = usize::try_from(index)
            .map_err(|_| ModelError::malformed("negative tensor index"))?;
        if index >= tensors.len {
            return Err(ModelError::malformed(format!(
                "tensor index {index} out of range"
            )));
        }

        let tensor = reader.indirect(tensors.element(index)?)?;
        let size = tensor_byte_size(reader, tensor)?;
        if size > 0 {
            dims.push(size);
        }
    }
    Ok(dims)
}

/// Shape product times element size.
fn tensor_byte_size(reader: &Reader<'_>, tensor: usize) -> Result<u32> {
    let ttype = match reader.table_field(tensor, TENSOR_FIELD_TYPE)? {
        Some(pos) => reader.i8_at(pos)?,
        None => 0, // schema default: FLOAT32
    };
    let elem = element_size(ttype)?;

    let mut product: u64 = 1;
    if let Some(shape) = reader.table_field(tensor, TENSOR_FIELD_SHAPE)? {
        let shape = reader.vector(reader.indirect(shape)?)?;
        for i in 0..shape.len {
            let dim = reader.i32_at(shape.element(i)?)?;
            let dim = u64::try_from(dim)
                .map_err(|_| ModelError::malformed("negative shape dimension"))?;
            product = product
                .checked_mul(dim)
                .ok_or(ModelError::SizeOutOfRange)?;
        }
    }

    product
        .checked_mul(elem)
        .and_then(|bytes| u32::try_from(bytes).ok())
        .ok_or(ModelError::SizeOutOfRange)
}

/// Element size for the tensor types the firmware handles.
fn element_size(ttype: i8) -> Result<u64> {
    match ttype {
        // FLOAT32, INT32
        0 | 2 => Ok(4),
        // UINT8, INT8
        3 | 9 => Ok(1),
        // INT16
        7 => Ok(2),
        code => Err(ModelError::UnsupportedTensorType { code }),
    }
}

/// Bounds-checked cursor over the blob.
struct Reader<'a> {
    data: &'a [u8],
}

/// A FlatBuffers vector: element count plus the position of element 0.
struct Vector {
    len: usize,
    elems: usize,
    elem_size: usize,
}

impl Vector {
    fn element(&self, index: usize) -> Result<usize> {
        if index >= self.len {
            return Err(ModelError::malformed("vector index out of range"));
        }
        Ok(self.elems + index * self.elem_size)
    }
}

impl Reader<'_> {
    fn bytes(&self, pos: usize, n: usize) -> Result<&[u8]> {
        self.data
            .get(pos..pos + n)
            .ok_or_else(|| ModelError::malformed(format!("offset {pos} out of bounds")))
    }

    fn u16_at(&self, pos: usize) -> Result<u16> {
        let b = self.bytes(pos, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_at(&self, pos: usize) -> Result<u32> {
        let b = self.bytes(pos, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32_at(&self, pos: usize) -> Result<i32> {
        let b = self.bytes(pos, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i8_at(&self, pos: usize) -> Result<i8> {
        #[allow(clippy::cast_possible_wrap)]
        Ok(self.bytes(pos, 1)?[0] as i8)
    }

    /// Follow a u32 forward offset stored at `pos`.
    fn indirect(&self, pos: usize) -> Result<usize> {
        let rel = self.u32_at(pos)? as usize;
        let target = pos
            .checked_add(rel)
            .ok_or_else(|| ModelError::malformed("offset overflow"))?;
        if target >= self.data.len() {
            return Err(ModelError::malformed("offset past end of model"));
        }
        Ok(target)
    }

    /// Resolve field `index` of the table at `table`. `None` means the field
    /// is absent (schema default applies).
    fn table_field(&self, table: usize, index: usize) -> Result<Option<usize>> {
        let soffset = i64::from(self.i32_at(table)?);
        let vtable = i64::try_from(table)
            .map_err(|_| ModelError::malformed("table position overflow"))?
            - soffset;
        let vtable = usize::try_from(vtable)
            .map_err(|_| ModelError::malformed("vtable before start of model"))?;

        let vtable_len = self.u16_at(vtable)? as usize;
        let slot = 4 + index * 2;
        if slot + 2 > vtable_len {
            return Ok(None);
        }

        let field_off = self.u16_at(vtable + slot)? as usize;
        if field_off == 0 {
            return Ok(None);
        }
        Ok(Some(table + field_off))
    }

    /// Interpret `pos` as a vector of 4-byte elements.
    fn vector(&self, pos: usize) -> Result<Vector> {
        let len = self.u32_at(pos)? as usize;
        let elems = pos + 4;
        let end = len
            .checked_mul(4)
            .and_then(|total| elems.checked_add(total));
        if end.map_or(true, |end| end > self.data.len()) {
            return Err(ModelError::malformed("vector exceeds model"));
        }
        Ok(Vector {
            len,
            elems,
            elem_size: 4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_model::{self, SubGraphSpec, TensorSpec};

    #[test]
    fn single_subgraph_dims() {
        let model = test_model::single_subgraph(&[784], &[10]);
        let dims = model_dims(&model).unwrap();
        assert_eq!(dims.ifm, vec![784]);
        assert_eq!(dims.ofm, vec![10]);
    }

    #[test]
    fn multi_dimensional_shapes_multiply_out() {
        let model = test_model::build_model(&[SubGraphSpec {
            inputs: vec![TensorSpec {
                shape: vec![1, 28, 28, 1],
                ttype: test_model::TYPE_UINT8,
            }],
            outputs: vec![TensorSpec {
                shape: vec![1, 10],
                ttype: test_model::TYPE_FLOAT32,
            }],
        }]);
        let dims = model_dims(&model).unwrap();
        assert_eq!(dims.ifm, vec![28 * 28]);
        assert_eq!(dims.ofm, vec![40]);
    }

    #[test]
    fn element_sizes_follow_tensor_type() {
        let model = test_model::build_model(&[SubGraphSpec {
            inputs: vec![
                TensorSpec {
                    shape: vec![6],
                    ttype: test_model::TYPE_INT16,
                },
                TensorSpec {
                    shape: vec![6],
                    ttype: test_model::TYPE_INT32,
                },
                TensorSpec {
                    shape: vec![6],
                    ttype: test_model::TYPE_INT8,
                },
            ],
            outputs: vec![],
        }]);
        let dims = model_dims(&model).unwrap();
        assert_eq!(dims.ifm, vec![12, 24, 6]);
        assert_eq!(dims.ofm, Vec::<u32>::new());
    }

    #[test]
    fn first_subgraph_inputs_last_subgraph_outputs() {
        let model = test_model::build_model(&[
            SubGraphSpec {
                inputs: vec![TensorSpec {
                    shape: vec![100],
                    ttype: test_model::TYPE_UINT8,
                }],
                outputs: vec![TensorSpec {
                    shape: vec![50],
                    ttype: test_model::TYPE_UINT8,
                }],
            },
            SubGraphSpec {
                inputs: vec![TensorSpec {
                    shape: vec![50],
                    ttype: test_model::TYPE_UINT8,
                }],
                outputs: vec![TensorSpec {
                    shape: vec![25],
                    ttype: test_model::TYPE_UINT8,
                }],
            },
        ]);
        let dims = model_dims(&model).unwrap();
        assert_eq!(dims.ifm, vec![100], "inputs come from the first subgraph");
        assert_eq!(dims.ofm, vec![25], "outputs come from the last subgraph");
    }

    #[test]
    fn zero_sized_tensors_are_elided() {
        let model = test_model::build_model(&[SubGraphSpec {
            inputs: vec![
                TensorSpec {
                    shape: vec![16],
                    ttype: test_model::TYPE_UINT8,
                },
                TensorSpec {
                    shape: vec![0],
                    ttype: test_model::TYPE_UINT8,
                },
            ],
            outputs: vec![TensorSpec {
                shape: vec![4],
                ttype: test_model::TYPE_UINT8,
            }],
        }]);
        let dims = model_dims(&model).unwrap();
        assert_eq!(dims.ifm, vec![16]);
    }

    #[test]
    fn unsupported_tensor_type_fails() {
        let model = test_model::build_model(&[SubGraphSpec {
            inputs: vec![TensorSpec {
                shape: vec![8],
                ttype: 4, // INT64
            }],
            outputs: vec![],
        }]);
        assert!(matches!(
            model_dims(&model),
            Err(ModelError::UnsupportedTensorType { code: 4 })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            model_dims(&[0u8; 4]),
            Err(ModelError::TooSmall { size: 4 })
        ));
        assert!(matches!(
            model_dims(&[0u8; 64]),
            Err(ModelError::InvalidHeader)
        ));

        let mut model = test_model::single_subgraph(&[16], &[4]);
        model.truncate(model.len() / 2);
        assert!(model_dims(&model).is_err());
    }
}
