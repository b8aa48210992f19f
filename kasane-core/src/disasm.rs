//! 逆アセンブル機能
//!
//! スタック上の値が戻りアドレスかどうかを判定するため、
//! その直前にある命令を後方に向かって探し、call命令かどうかを調べます。

use crate::Result;
use capstone::arch::x86::X86OperandType;
use capstone::arch::ArchOperand;
use capstone::prelude::*;
use capstone::Insn;
use tracing::{trace, warn};

/// 分岐先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    /// 分岐先が静的に分からない（レジスタ間接など）
    None,
    /// 即値で指定された分岐先
    Direct(u64),
    /// 分岐先が格納されているメモリのアドレス
    Indirect(u64),
}

/// デコードされた1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: u64,
    pub len: usize,
    pub is_call: bool,
    pub target: BranchTarget,
}

impl DecodedInstruction {
    /// 命令の直後のアドレス
    pub fn end(&self) -> u64 {
        self.address + self.len as u64
    }
}

/// 命令デコーダ
pub trait InstructionDecoder: Send + Sync {
    /// `code[..end]` の中で、ちょうど `end` で終わる命令の開始オフセットを返す
    ///
    /// `base` は `code[0]` のアドレスです。
    fn instruction_before(&self, code: &[u8], base: u64, end: usize) -> Option<usize>;

    /// `code` の先頭の1命令をデコードする
    fn decode(&self, code: &[u8], address: u64) -> Option<DecodedInstruction>;
}

/// `end` でちょうど終わる命令境界を探す
///
/// `start` から `end` に向かって候補の開始位置を順に試し、
/// それぞれ前方にデコードして `end` にちょうど着地した最初の経路の
/// 最後の命令の開始オフセットを返します。
/// 経路が `end` を越える、デコードできないバイトで止まる場合はその候補を捨てます。
///
/// `len_at(offset)` は `offset` から始まる命令の長さを返します。
pub fn find_boundary_ending_at<F>(mut len_at: F, start: usize, end: usize) -> Option<usize>
where
    F: FnMut(usize) -> Option<usize>,
{
    if start >= end {
        return None;
    }

    // 同じオフセットを何度もデコードしないようにメモ化する
    let mut lengths: Vec<Option<Option<usize>>> = vec![None; end - start];

    for candidate in start..end {
        let mut offset = candidate;
        let mut last = None;

        while offset < end {
            let len = *lengths[offset - start].get_or_insert_with(|| len_at(offset));
            match len {
                Some(len) if len > 0 => {
                    last = Some(offset);
                    offset += len;
                }
                _ => break,
            }
        }

        if offset == end {
            if let Some(last) = last {
                trace!(candidate, last, "instruction boundary found");
                return Some(last);
            }
        }
    }

    None
}

/// capstoneによるx86-64デコーダ
#[derive(Debug, Clone, Copy, Default)]
pub struct CapstoneDecoder;

impl CapstoneDecoder {
    pub fn new() -> Self {
        Self
    }

    fn engine() -> Result<Capstone> {
        Capstone::new()
            .x86()
            .mode(arch::x86::ArchMode::Mode64)
            .syntax(arch::x86::ArchSyntax::Intel)
            .detail(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create Capstone: {}", e))
    }

    /// call命令の分岐先を取り出す
    fn call_target(cs: &Capstone, insn: &Insn) -> BranchTarget {
        let detail = match cs.insn_detail(insn) {
            Ok(detail) => detail,
            Err(_) => return BranchTarget::None,
        };
        let next = insn.address() + insn.bytes().len() as u64;

        for operand in detail.arch_detail().operands() {
            let ArchOperand::X86Operand(op) = operand else {
                continue;
            };
            match op.op_type {
                X86OperandType::Imm(imm) => return BranchTarget::Direct(imm as u64),
                X86OperandType::Mem(mem) => {
                    if mem.index().0 != 0 {
                        return BranchTarget::None;
                    }
                    // call [rip+disp]
                    if cs.reg_name(mem.base()).as_deref() == Some("rip") {
                        return BranchTarget::Indirect(next.wrapping_add(mem.disp() as u64));
                    }
                    // call [disp]
                    if mem.base().0 == 0 {
                        return BranchTarget::Indirect(mem.disp() as u64);
                    }
                    return BranchTarget::None;
                }
                _ => {}
            }
        }

        BranchTarget::None
    }
}

impl InstructionDecoder for CapstoneDecoder {
    fn instruction_before(&self, code: &[u8], base: u64, end: usize) -> Option<usize> {
        let cs = match Self::engine() {
            Ok(cs) => cs,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        let end = end.min(code.len());

        find_boundary_ending_at(
            |offset| {
                let insns = cs
                    .disasm_count(&code[offset..end], base + offset as u64, 1)
                    .ok()?;
                let len = insns.iter().next().map(|insn| insn.bytes().len());
                len
            },
            0,
            end,
        )
    }

    fn decode(&self, code: &[u8], address: u64) -> Option<DecodedInstruction> {
        let cs = Self::engine().ok()?;
        let insns = cs.disasm_count(code, address, 1).ok()?;
        let insn = insns.iter().next()?;

        // call命令を検出
        let mnemonic = insn.mnemonic().unwrap_or("");
        let is_call = mnemonic == "call" || mnemonic == "lcall";
        let target = if is_call {
            Self::call_target(&cs, &insn)
        } else {
            BranchTarget::None
        };

        Some(DecodedInstruction {
            address,
            len: insn.bytes().len(),
            is_call,
            target,
        })
    }
}
