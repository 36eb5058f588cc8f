//! Bytecode pre-analysis.
//!
//! One linear scan classifies every byte as opcode, PUSH immediate or
//! padding, marks the valid JUMPDESTs, partitions the opcode stream into
//! basic blocks and emits the instruction stream the main interpreter
//! executes: a synthetic `BlockInfo` at each block entry carrying the
//! block's pre-summed constant gas and stack requirements, pre-decoded PUSH
//! (and PC) immediates, and handler instructions for everything else.
//!
//! The result is pure in `(code, fork)` and cached by code hash.

use crate::{
    dispatch::{DispatchTable, OpFn},
    opcodes::Opcode,
    vm::VM,
};
use bitvec::prelude::*;
use kestrel_common::{U256, types::Fork, utils::u256_from_big_endian};

/// Marker for byte positions that do not start a block (immediates,
/// padding).
pub const PC_SENTINEL: u32 = u32::MAX;

/// One pre-decoded instruction of the analysis stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    /// Synthetic block header: constant gas, the stack depth the block
    /// needs at entry, and the largest net growth it can reach.
    BlockInfo {
        gas_cost: u64,
        stack_req: u16,
        stack_max_growth: u16,
    },
    /// Statically priced opcode.
    Exec(OpFn),
    /// Opcode whose handler charges operand-dependent gas before running.
    DynamicGas(OpFn),
    /// Pre-decoded PUSH immediate; also used for PC, whose value is a
    /// per-site constant.
    Push(U256),
}

/// Immutable per-contract analysis, shared by frames through `Rc`.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAnalysis {
    pub instructions: Vec<Instruction>,
    /// Byte offset of each instruction (block start for `BlockInfo`).
    pub pcs: Vec<u32>,
    /// Opcode byte of each instruction, for tracing.
    pub opcodes: Vec<u8>,
    /// Valid dynamic-jump targets.
    pub jumpdests: BitVec,
    /// pc → index of the `BlockInfo` of the containing block, or
    /// `PC_SENTINEL` for non-opcode positions.
    pub pc_to_instruction: Vec<u32>,
    /// pc-level block entry points, used by the reference interpreter for
    /// block-granular comparisons.
    pub block_starts: BitVec,
    pub fork: Fork,
}

struct OpenBlock {
    info_index: usize,
    gas: u64,
    stack_change: i32,
    stack_req: i32,
    stack_max: i32,
}

impl CodeAnalysis {
    /// Analyse `code` for `fork`. Deterministic; never fails.
    pub fn analyze(code: &[u8], fork: Fork) -> CodeAnalysis {
        let table = DispatchTable::for_fork(fork);
        let len = code.len();

        let jumpdests = find_jumpdests(code);

        let mut analysis = CodeAnalysis {
            instructions: Vec::with_capacity(len.saturating_add(1)),
            pcs: Vec::with_capacity(len.saturating_add(1)),
            opcodes: Vec::with_capacity(len.saturating_add(1)),
            jumpdests,
            pc_to_instruction: vec![PC_SENTINEL; len],
            block_starts: bitvec![0; len],
            fork,
        };

        let mut block: Option<OpenBlock> = None;
        let mut pc = 0usize;
        while pc < len {
            let op = code.get(pc).copied().unwrap_or(u8::from(Opcode::STOP));
            let index = usize::from(op);

            // A block begins at pc 0, at every JUMPDEST, and after every
            // block-ending instruction.
            if block.is_none() || op == u8::from(Opcode::JUMPDEST) {
                if let Some(open) = block.take() {
                    analysis.patch_block(open);
                }
                block = Some(analysis.open_block(pc, op));
            }
            let Some(open) = block.as_mut() else {
                break;
            };

            if let Some(slot) = analysis.pc_to_instruction.get_mut(pc) {
                *slot = u32::try_from(open.info_index).unwrap_or(PC_SENTINEL);
            }

            open.gas = open
                .gas
                .saturating_add(table.base_gas.get(index).copied().unwrap_or(0));
            let inputs = i32::from(table.min_stack.get(index).copied().unwrap_or(0));
            let outputs = i32::from(table.outputs.get(index).copied().unwrap_or(0));
            open.stack_req = open
                .stack_req
                .max(inputs.saturating_sub(open.stack_change));
            open.stack_change = open
                .stack_change
                .saturating_sub(inputs)
                .saturating_add(outputs);
            open.stack_max = open.stack_max.max(open.stack_change);

            if is_push(op) {
                let immediate_len = usize::from(op.wrapping_sub(0x5F));
                let value = decode_push_immediate(code, pc, immediate_len);
                analysis.emit(Instruction::Push(value), pc, op);
                pc = pc.saturating_add(1).saturating_add(immediate_len);
                continue;
            }

            if op == u8::from(Opcode::PC) {
                analysis.emit(Instruction::Push(U256::from(pc)), pc, op);
            } else if op == u8::from(Opcode::JUMPDEST) {
                // Accounted by the block header; nothing to execute.
            } else {
                let handler = table
                    .handlers
                    .get(index)
                    .copied()
                    .unwrap_or(VM::on_invalid_opcode);
                let instruction = if table.has_dynamic_gas.get(index).copied().unwrap_or(false) {
                    Instruction::DynamicGas(handler)
                } else {
                    Instruction::Exec(handler)
                };
                analysis.emit(instruction, pc, op);
            }

            let ends_block = table.ends_block.get(index).copied().unwrap_or(true);
            pc = pc.saturating_add(1);
            if ends_block {
                if let Some(open) = block.take() {
                    analysis.patch_block(open);
                }
            }
        }

        // Running off the end of code is an implicit STOP. Emit it inside
        // the open block if there is one, otherwise as a trivial trailing
        // block (also the landing pad of a JUMPI at the very end of code,
        // and the whole stream for empty code).
        match block.take() {
            Some(open) => {
                analysis.emit(Instruction::Exec(VM::op_stop), len, u8::from(Opcode::STOP));
                analysis.patch_block(open);
            }
            None => {
                let open = analysis.open_block(len, u8::from(Opcode::STOP));
                analysis.emit(Instruction::Exec(VM::op_stop), len, u8::from(Opcode::STOP));
                analysis.patch_block(open);
            }
        }

        analysis
    }

    fn open_block(&mut self, pc: usize, op: u8) -> OpenBlock {
        if let Some(mut bit) = self.block_starts.get_mut(pc) {
            *bit = true;
        }
        let info_index = self.instructions.len();
        self.emit(
            Instruction::BlockInfo {
                gas_cost: 0,
                stack_req: 0,
                stack_max_growth: 0,
            },
            pc,
            op,
        );
        OpenBlock {
            info_index,
            gas: 0,
            stack_change: 0,
            stack_req: 0,
            stack_max: 0,
        }
    }

    fn emit(&mut self, instruction: Instruction, pc: usize, op: u8) {
        self.instructions.push(instruction);
        self.pcs.push(u32::try_from(pc).unwrap_or(u32::MAX));
        self.opcodes.push(op);
    }

    fn patch_block(&mut self, open: OpenBlock) {
        if let Some(Instruction::BlockInfo {
            gas_cost,
            stack_req,
            stack_max_growth,
        }) = self.instructions.get_mut(open.info_index)
        {
            *gas_cost = open.gas;
            *stack_req = u16::try_from(open.stack_req.max(0)).unwrap_or(u16::MAX);
            *stack_max_growth = u16::try_from(open.stack_max.max(0)).unwrap_or(u16::MAX);
        }
    }

    /// Validate a dynamic jump destination. Returns `(pc, instruction
    /// index of the target block's header)` for a valid JUMPDEST.
    pub fn jump_target(&self, destination: U256) -> Option<(usize, usize)> {
        // Destinations beyond 32 bits can never land in code.
        if destination > U256::from(u32::MAX) {
            return None;
        }
        let pc = usize::try_from(destination).ok()?;
        if !*self.jumpdests.get(pc)? {
            return None;
        }
        let index = *self.pc_to_instruction.get(pc)?;
        if index == PC_SENTINEL {
            return None;
        }
        Some((pc, usize::try_from(index).ok()?))
    }

    /// Whether a basic block begins at this byte offset.
    pub fn is_block_start(&self, pc: usize) -> bool {
        self.block_starts.get(pc).map(|bit| *bit).unwrap_or(false)
    }
}

fn is_push(op: u8) -> bool {
    (u8::from(Opcode::PUSH1)..=u8::from(Opcode::PUSH32)).contains(&op)
}

/// Mark every JUMPDEST that sits on an opcode position (immediate bytes do
/// not count).
fn find_jumpdests(code: &[u8]) -> BitVec {
    let mut jumpdests = bitvec![0; code.len()];
    let mut pc = 0usize;
    while pc < code.len() {
        let op = code.get(pc).copied().unwrap_or_default();
        if is_push(op) {
            pc = pc
                .saturating_add(usize::from(op.wrapping_sub(0x5F)))
                .saturating_add(1);
        } else {
            if op == u8::from(Opcode::JUMPDEST)
                && let Some(mut bit) = jumpdests.get_mut(pc)
            {
                *bit = true;
            }
            pc = pc.saturating_add(1);
        }
    }
    jumpdests
}

/// Big-endian decode of the `n` bytes following a PUSH opcode; bytes past
/// the end of code read as zero.
fn decode_push_immediate(code: &[u8], pc: usize, n: usize) -> U256 {
    let mut buffer = [0u8; 32];
    let start = pc.saturating_add(1);
    let available = code.len().saturating_sub(start).min(n);
    if let (Some(target), Some(source)) = (
        buffer.get_mut(..available),
        code.get(start..start.saturating_add(available)),
    ) {
        target.copy_from_slice(source);
    }
    // The immediate is left-aligned in `buffer`; missing trailing bytes stay
    // zero, matching a truncated PUSH at the end of code.
    u256_from_big_endian(buffer.get(..n).unwrap_or(&buffer))
}
