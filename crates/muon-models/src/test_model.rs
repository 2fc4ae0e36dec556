//! Tiny TFLite model builder for tests.
//!
//! Emits just enough of the FlatBuffers layout for [`crate::model_dims`] to
//! walk: a model table, subgraph tables with `tensors`/`inputs`/`outputs`,
//! and tensor tables with `shape` and `type`. Parents are written before
//! children and forward references patched afterwards, which keeps every
//! offset positive as the format requires.

/// TFLite `FLOAT32` tensor type code.
pub const TYPE_FLOAT32: i8 = 0;
/// TFLite `INT32` tensor type code.
pub const TYPE_INT32: i8 = 2;
/// TFLite `UINT8` tensor type code.
pub const TYPE_UINT8: i8 = 3;
/// TFLite `INT16` tensor type code.
pub const TYPE_INT16: i8 = 7;
/// TFLite `INT8` tensor type code.
pub const TYPE_INT8: i8 = 9;

/// Shape and element type of one tensor.
pub struct TensorSpec {
    /// Tensor shape; the byte size is the product times the element size.
    pub shape: Vec<i32>,
    /// TFLite tensor type code.
    pub ttype: i8,
}

/// Inputs and outputs of one subgraph. The tensor table is the
/// concatenation of both, with the index maps pointing at the right halves.
pub struct SubGraphSpec {
    /// Input tensors.
    pub inputs: Vec<TensorSpec>,
    /// Output tensors.
    pub outputs: Vec<TensorSpec>,
}

/// Build a one-subgraph model with `UINT8` tensors of the given byte sizes.
pub fn single_subgraph(ifm_bytes: &[i32], ofm_bytes: &[i32]) -> Vec<u8> {
    let tensor = |&n: &i32| TensorSpec {
        shape: vec![n],
        ttype: TYPE_UINT8,
    };
    build_model(&[SubGraphSpec {
        inputs: ifm_bytes.iter().map(tensor).collect(),
        outputs: ofm_bytes.iter().map(tensor).collect(),
    }])
}

/// Build a model blob from subgraph specs.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn build_model(subgraphs: &[SubGraphSpec]) -> Vec<u8> {
    let mut buf = Vec::new();

    put_u32(&mut buf, 0); // root offset, patched below
    buf.extend_from_slice(crate::FILE_IDENTIFIER);

    // Model table: version (field 0) and subgraphs (field 2).
    pad4(&mut buf);
    let model_pos = buf.len();
    put_i32(&mut buf, 0); // vtable back-offset, patched below
    put_i32(&mut buf, 3); // schema version
    let subgraphs_site = buf.len();
    put_u32(&mut buf, 0);
    let model_vt = buf.len();
    put_u16(&mut buf, 10); // vtable length: 3 fields
    put_u16(&mut buf, 12); // table length
    put_u16(&mut buf, 4); // version
    put_u16(&mut buf, 0); // operator_codes absent
    put_u16(&mut buf, 8); // subgraphs
    patch_i32(&mut buf, model_pos, model_pos as i32 - model_vt as i32);
    patch_rel(&mut buf, 0, model_pos);

    // Subgraphs vector.
    pad4(&mut buf);
    let sg_vec = buf.len();
    put_u32(&mut buf, subgraphs.len() as u32);
    let sg_sites: Vec<usize> = subgraphs
        .iter()
        .map(|_| {
            let site = buf.len();
            put_u32(&mut buf, 0);
            site
        })
        .collect();
    patch_rel(&mut buf, subgraphs_site, sg_vec);

    for (spec, &sg_site) in subgraphs.iter().zip(&sg_sites) {
        write_subgraph(&mut buf, spec, sg_site);
    }

    buf
}

fn write_subgraph(buf: &mut Vec<u8>, spec: &SubGraphSpec, sg_site: usize) {
    #![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

    // Subgraph table: tensors (field 0), inputs (field 1), outputs (field 2).
    pad4(buf);
    let sg_pos = buf.len();
    put_i32(buf, 0);
    let tensors_site = buf.len();
    put_u32(buf, 0);
    let inputs_site = buf.len();
    put_u32(buf, 0);
    let outputs_site = buf.len();
    put_u32(buf, 0);
    let sg_vt = buf.len();
    put_u16(buf, 10);
    put_u16(buf, 16);
    put_u16(buf, 4);
    put_u16(buf, 8);
    put_u16(buf, 12);
    patch_i32(buf, sg_pos, sg_pos as i32 - sg_vt as i32);
    patch_rel(buf, sg_site, sg_pos);

    let input_count = spec.inputs.len() as i32;
    let output_count = spec.outputs.len() as i32;

    // Index maps: inputs first in the tensor table, outputs after.
    pad4(buf);
    let in_vec = buf.len();
    put_u32(buf, input_count as u32);
    for i in 0..input_count {
        put_i32(buf, i);
    }
    patch_rel(buf, inputs_site, in_vec);

    pad4(buf);
    let out_vec = buf.len();
    put_u32(buf, output_count as u32);
    for i in 0..output_count {
        put_i32(buf, input_count + i);
    }
    patch_rel(buf, outputs_site, out_vec);

    // Tensor table vector.
    pad4(buf);
    let t_vec = buf.len();
    put_u32(buf, (input_count + output_count) as u32);
    let t_sites: Vec<usize> = (0..input_count + output_count)
        .map(|_| {
            let site = buf.len();
            put_u32(buf, 0);
            site
        })
        .collect();
    patch_rel(buf, tensors_site, t_vec);

    for (tensor, &t_site) in spec.inputs.iter().chain(&spec.outputs).zip(&t_sites) {
        write_tensor(buf, tensor, t_site);
    }
}

fn write_tensor(buf: &mut Vec<u8>, tensor: &TensorSpec, t_site: usize) {
    #![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

    // Tensor table: shape (field 0), type (field 1).
    pad4(buf);
    let t_pos = buf.len();
    put_i32(buf, 0);
    let shape_site = buf.len();
    put_u32(buf, 0);
    buf.push(tensor.ttype as u8);
    pad4(buf);
    let t_vt = buf.len();
    put_u16(buf, 8);
    put_u16(buf, 12);
    put_u16(buf, 4);
    put_u16(buf, 8);
    patch_i32(buf, t_pos, t_pos as i32 - t_vt as i32);
    patch_rel(buf, t_site, t_pos);

    pad4(buf);
    let shape_vec = buf.len();
    put_u32(buf, tensor.shape.len() as u32);
    for &dim in &tensor.shape {
        put_i32(buf, dim);
    }
    patch_rel(buf, shape_site, shape_vec);
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn patch_u32(buf: &mut [u8], site: usize, value: u32) {
    buf[site..site + 4].copy_from_slice(&value.to_le_bytes());
}

fn patch_i32(buf: &mut [u8], site: usize, value: i32) {
    buf[site..site + 4].copy_from_slice(&value.to_le_bytes());
}

#[allow(clippy::cast_possible_truncation)]
fn patch_rel(buf: &mut [u8], site: usize, target: usize) {
    patch_u32(buf, site, (target - site) as u32);
}
