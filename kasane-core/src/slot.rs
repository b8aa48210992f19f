//! スタックスロットのコメント解決
//!
//! スタック上の1ワードに格納された値が何を指しているかを推測し、
//! 短いコメントを生成します。判定は次の順で行い、最初に一致したものを採用します。
//!
//! 1. SEHチェーンキャッシュ
//! 2. 戻りアドレス（直前の命令がcall）
//! 3. 文字列
//! 4. モジュールとラベル

use crate::comment::{ColorTag, StackComment};
use crate::config::StackConfig;
use crate::disasm::{BranchTarget, DecodedInstruction, InstructionDecoder};
use crate::seh::SehChainCache;
use crate::symname::{format_pointer, format_symbol_address};
use crate::target::{StringProbe, SymbolSource, TargetMemory};
use tracing::trace;

/// スタックスロットのコメント解決器
pub struct SlotResolver<'a> {
    pub memory: &'a dyn TargetMemory,
    pub symbols: &'a dyn SymbolSource,
    pub strings: &'a dyn StringProbe,
    pub decoder: &'a dyn InstructionDecoder,
    pub seh: &'a SehChainCache,
    pub config: &'a StackConfig,
}

impl<'a> SlotResolver<'a> {
    /// `address` にあるスロットのコメントを生成する
    ///
    /// どの判定にも一致しない場合は `None` を返します。
    pub fn resolve(&self, address: u64) -> Option<StackComment> {
        if let Some(comment) = self.seh.lookup(address) {
            return Some(comment);
        }

        // スロットの値がポインタでなければ普通のデータとみなす
        let data = self.memory.read_word(address)?;
        if !self.memory.is_readable(data) {
            return None;
        }

        if let Some(comment) = self.return_address_comment(data) {
            return Some(comment);
        }

        if let Some(text) = self.strings.string_at(data) {
            return Some(self.comment(text, ColorTag::Default));
        }

        self.label_comment(data)
    }

    fn comment(&self, text: String, color: ColorTag) -> StackComment {
        StackComment::with_capacity(text, color, self.config.comment_capacity)
    }

    /// `target` の直前の命令がcallなら戻りアドレスとしてのコメントを返す
    fn return_address_comment(&self, target: u64) -> Option<StackComment> {
        let call = self.preceding_instruction(target).filter(|insn| insn.is_call)?;

        let from = match call.target {
            BranchTarget::Direct(addr) => addr,
            BranchTarget::Indirect(slot) => self.memory.read_word(slot).unwrap_or(0),
            BranchTarget::None => 0,
        };

        let text = format!(
            "return to {} from {}",
            format_symbol_address(self.symbols, target),
            format_symbol_address(self.symbols, from)
        );
        Some(self.comment(text, ColorTag::ReturnAddress))
    }

    /// `target` でちょうど終わる命令を探す
    ///
    /// 読み取り範囲は `target` を含む領域のベースで切り詰めます。
    pub fn preceding_instruction(&self, target: u64) -> Option<DecodedInstruction> {
        let region = self.memory.find_region(target)?;
        let read_start = target
            .saturating_sub(self.config.disasm_window)
            .max(region.base);
        let len = target.checked_sub(read_start)? as usize;
        if len == 0 {
            return None;
        }

        let mut code = vec![0u8; len];
        let read = self.memory.read(read_start, &mut code).ok()?;
        if read < len {
            // 末尾が読めていなければ境界を判定できない
            trace!(target, read, len, "partial read before candidate return address");
            return None;
        }

        let offset = self.decoder.instruction_before(&code, read_start, len)?;
        let insn = self
            .decoder
            .decode(&code[offset..], read_start + offset as u64)?;

        (insn.end() == target).then_some(insn)
    }

    /// モジュール名とラベルからコメントを生成する
    fn label_comment(&self, target: u64) -> Option<StackComment> {
        let label = self
            .symbols
            .resolve(target)
            .label
            .filter(|l| !l.is_empty());
        let module = self
            .symbols
            .module_name_of(target)
            .filter(|m| !m.is_empty());

        let text = match (module, label) {
            (Some(module), Some(label)) => format!("{}.{}", module, label),
            (Some(module), None) => format!("{}.{}", module, format_pointer(target)),
            (None, Some(label)) => format!("<{}>", label),
            (None, None) => return None,
        };
        Some(self.comment(text, ColorTag::Default))
    }
}
