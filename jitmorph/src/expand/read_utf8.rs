//! Unroll UTF-8 reads of constant string literals.
//!
//! `ReadUtf8(srcPtr, srcLen, dstPtr, dstLen)` transcodes `srcLen` UTF-16
//! units at `srcPtr` into the buffer at `dstPtr`, returning the number of
//! bytes written or -1 when the buffer is too small. When the source is a
//! frozen literal the bytes are known at compile time:
//!
//! ```text
//! length_check_bb: result = -1
//!                  if (dstLen < n) goto tail
//! fast_path_bb:    STOREIND<w>(dstPtr + 0, bytes[0..w])
//!                  ...
//!                  STOREIND<w>(dstPtr + n - w, bytes[n-w..n])
//!                  result = n
//! tail:            use of the call -> result
//! ```

use tracing::{debug, trace};

use crate::error::{JitError, JitResult};
use crate::ir::{
    BinOp, BlockId, HandleKind, JumpKind, NodeId, NodeKind, StmtId, StringHandle, VarType,
};
use super::HelperExpander;

/// Longest source literal considered, in UTF-16 units.
pub const MAX_LITERAL_LENGTH: i64 = 256;

/// Byte offset of the first character from a string object's address.
pub const STRING_CHARS_OFFSET: i64 = 12;

/// Store widths tried, widest first.
const STORE_WIDTHS: [(u32, VarType); 6] = [
    (32, VarType::Simd32),
    (16, VarType::Simd16),
    (8, VarType::Long),
    (4, VarType::Int),
    (2, VarType::UShort),
    (1, VarType::UByte),
];

/// Widest store not exceeding `len` or `max_simd_bytes`.
pub fn store_width(len: u32, max_simd_bytes: u32) -> Option<(u32, VarType)> {
    STORE_WIDTHS
        .iter()
        .copied()
        .find(|&(width, _)| width <= len && width <= max_simd_bytes)
}

/// Index of the UTF-16 unit a source pointer designates. A bare handle
/// stands for the first character; an explicit offset must land on a
/// character at or after [`STRING_CHARS_OFFSET`].
pub fn first_unit(byte_offset: Option<i64>) -> Option<usize> {
    let Some(offset) = byte_offset else {
        return Some(0);
    };
    let past_header = offset.checked_sub(STRING_CHARS_OFFSET)?;
    if past_header < 0 || past_header % 2 != 0 {
        return None;
    }
    usize::try_from(past_header / 2).ok()
}

/// Offsets of the overlapping `width`-byte stores that cover `len` bytes.
pub fn store_offsets(len: u32, width: u32) -> Vec<u32> {
    if width == 0 || width > len {
        return Vec::new();
    }
    let mut offsets: Vec<u32> = (0..len / width).map(|i| i * width).collect();
    if len % width != 0 {
        offsets.push(len - width);
    }
    offsets
}

impl<'a> HelperExpander<'a> {
    pub(super) fn expand_read_utf8(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        call: NodeId,
    ) -> JitResult<Option<BlockId>> {
        let (src_ptr, src_len) = match self.body.node(call).as_call() {
            Some(c) => match (c.arg(0), c.arg(1), c.arg(2), c.arg(3)) {
                (Some(src_ptr), Some(src_len), Some(_), Some(_)) => (src_ptr, src_len),
                _ => return self.decline(call, "malformed ReadUtf8 call"),
            },
            None => return Ok(None),
        };

        let Some((handle, byte_offset)) = self.literal_handle(src_ptr) else {
            return self.decline(call, "source is not a string literal");
        };
        let Some(start) = first_unit(byte_offset) else {
            return self.decline(call, "source does not point at a character");
        };
        let len = match self.body.node(src_len).int_con() {
            Some(len) if (1..=MAX_LITERAL_LENGTH).contains(&len) => len as usize,
            Some(_) => return self.decline(call, "source length out of range"),
            None => return self.decline(call, "source length is not a constant"),
        };
        let runtime = self.runtime;
        let units = match runtime.string_literal(handle) {
            Some(units) if start.checked_add(len).is_some_and(|end| end <= units.len()) => {
                &units[start..start + len]
            }
            _ => return self.decline(call, "string literal contents unavailable"),
        };
        let Ok(text) = String::from_utf16(units) else {
            return self.decline(call, "unpaired surrogate in literal");
        };
        let bytes = text.into_bytes();
        let byte_len = bytes.len() as u32;
        if byte_len > self.config.expansion.utf8_unroll_limit {
            return self.decline(call, "UTF-8 payload too long to unroll");
        }
        let Some((width, store_ty)) = store_width(byte_len, self.config.expansion.max_simd_bytes)
        else {
            return self.decline(call, "empty UTF-8 payload");
        };
        trace!(call = %call, bytes = byte_len, width, "unrolling literal read");

        let il_offset = self.body.stmt(stmt).il_offset;
        let split = self.body.split_block_before_tree(block, stmt, call)?;
        let prev = block;
        let tail = split.after;

        let (dst_ptr, dst_len) = match self.body.node(call).as_call() {
            Some(c) => match (c.arg(2), c.arg(3)) {
                (Some(dst_ptr), Some(dst_len)) => (dst_ptr, dst_len),
                _ => {
                    return Err(JitError::InconsistentCfg {
                        block,
                        detail: format!("ReadUtf8 {} lost its destination arguments", call),
                    })
                }
            },
            None => {
                return Err(JitError::InconsistentCfg {
                    block,
                    detail: format!("{} is no longer a call", call),
                })
            }
        };

        let length_check_bb = self.new_block(prev, block)?;
        let fast_path_bb = self.new_block(length_check_bb, block)?;
        let result = self.body.locals.grab_temp(VarType::Int, "utf8 bytes written");

        // length_check_bb
        let minus_one = self.body.new_icon(-1, VarType::Int);
        let init = self.body.new_store_lcl_var(result, minus_one);
        self.append(length_check_bb, init, il_offset);
        let capacity = self.clone_arg(dst_len, block)?;
        let needed = self.body.new_icon(i64::from(byte_len), VarType::Int);
        let too_small = self.body.new_oper(BinOp::Lt, VarType::Int, capacity, needed);
        let jtrue = self.body.new_jtrue(too_small);
        self.append(length_check_bb, jtrue, il_offset);

        // fast_path_bb
        for offset in store_offsets(byte_len, width) {
            let start = offset as usize;
            let chunk = &bytes[start..start + width as usize];
            let value = self.chunk_constant(chunk, store_ty);
            let base = self.clone_arg(dst_ptr, block)?;
            let addr = if offset == 0 {
                base
            } else {
                let offset = self.body.new_icon(i64::from(offset), VarType::NativeInt);
                self.body.new_oper(BinOp::Add, VarType::NativeInt, base, offset)
            };
            let store = self.body.new_store_ind(store_ty, addr, value);
            self.append(fast_path_bb, store, il_offset);
        }
        let written = self.body.new_icon(i64::from(byte_len), VarType::Int);
        let done = self.body.new_store_lcl_var(result, written);
        self.append(fast_path_bb, done, il_offset);

        // tail; the call itself is gone
        let read = self.body.new_lcl_var(result);
        self.replace_call_use(tail, stmt, split.call_use, Some(read));
        self.clear_candidate(call);

        self.body.set_jump(prev, JumpKind::Always(length_check_bb));
        self.body
            .set_jump(length_check_bb, JumpKind::cond(tail, fast_path_bb, 0.0));
        self.body.set_jump(fast_path_bb, JumpKind::Always(tail));

        self.set_weight_percent(length_check_bb, tail, 100);
        self.set_weight_percent(fast_path_bb, tail, 100);

        debug!(call = %call, bytes = byte_len, width, "literal UTF-8 read unrolled");
        Ok(Some(tail))
    }

    /// The literal behind a source pointer: a string handle, optionally plus
    /// a constant byte offset (`None` for the bare handle).
    fn literal_handle(&self, src_ptr: NodeId) -> Option<(StringHandle, Option<i64>)> {
        let string_of = |node: NodeId| match self.body.node(node).handle() {
            Some(HandleKind::String(handle)) => Some(handle),
            _ => None,
        };
        match &self.body.node(src_ptr).kind {
            NodeKind::IntCon { .. } => string_of(src_ptr).map(|handle| (handle, None)),
            NodeKind::Binary {
                op: BinOp::Add,
                op1,
                op2,
            } => {
                let offset = self.body.node(*op2);
                match offset.int_con() {
                    Some(c) if offset.handle().is_none() => {
                        string_of(*op1).map(|handle| (handle, Some(c)))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Constant holding `chunk` in little-endian order.
    fn chunk_constant(&mut self, chunk: &[u8], ty: VarType) -> NodeId {
        if ty.is_simd() {
            return self.body.new_vcon(chunk.to_vec(), ty);
        }
        let mut raw = [0u8; 8];
        raw[..chunk.len()].copy_from_slice(chunk);
        let value = i64::from_le_bytes(raw);
        let node_ty = if ty.is_small_int() { VarType::Int } else { ty };
        self.body.new_icon(value, node_ty)
    }
}
