//! フレーム単位のアンワインド
//!
//! アンワインダは1回の呼び出しで1フレームずつ進みます。
//! 対象プロセスへのアクセスは [`UnwindCallbacks`] を通して行います。

use crate::target::{SymbolSource, TargetMemory, ThreadContext};
use crate::WORD_SIZE;
use tracing::{error, trace};

/// 開始フレームまでに辿るフレームポインタの上限
const MAX_SEEK_FRAMES: usize = 1024;

/// アンワインド中のフレーム
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindFrame {
    /// プログラムカウンタ
    pub pc: u64,
    /// フレームベース
    pub frame: u64,
    /// スタックポインタ
    pub stack: u64,
    /// このフレームの戻りアドレス
    pub return_address: u64,
    /// pcを含むモジュールのベースアドレス
    pub module_base: Option<u64>,
    /// これまでに進んだフレーム数
    pub depth: usize,
}

impl UnwindFrame {
    /// レジスタコンテキストと開始スタックポインタから最初のフレームを作る
    pub fn seed(context: &ThreadContext, stack_pointer: u64) -> Self {
        Self {
            pc: context.instruction_pointer,
            frame: context.frame_pointer,
            stack: stack_pointer,
            ..Self::default()
        }
    }
}

/// アンワインダが対象プロセスにアクセスするための機能
pub trait UnwindCallbacks {
    /// メモリを読み取り、転送できたバイト数を返す
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Option<usize>;

    /// アドレスを含むモジュールのベースアドレス
    fn module_base(&self, address: u64) -> Option<u64>;

    /// アドレス変換（この構成では呼ばれてはならない）
    fn translate_address(&self, address: u64) -> u64;

    /// 1ワードを読み取る
    fn read_word(&self, address: u64) -> Option<u64> {
        let mut bytes = [0u8; WORD_SIZE as usize];
        match self.read_memory(address, &mut bytes) {
            Some(n) if n == bytes.len() => Some(u64::from_le_bytes(bytes)),
            _ => None,
        }
    }
}

/// 1フレームずつ進むアンワインダ
pub trait FrameUnwinder: Send + Sync {
    /// 次のフレームへ進む
    ///
    /// 進めなかった場合（スタックの終端、または壊れたフレーム）は `false` を返します。
    fn step(
        &self,
        frame: &mut UnwindFrame,
        context: &mut ThreadContext,
        callbacks: &dyn UnwindCallbacks,
    ) -> bool;
}

/// 対象プロセスのメモリとシンボル解決に委譲するコールバック
pub struct TargetCallbacks<'a> {
    memory: &'a dyn TargetMemory,
    symbols: &'a dyn SymbolSource,
}

impl<'a> TargetCallbacks<'a> {
    pub fn new(memory: &'a dyn TargetMemory, symbols: &'a dyn SymbolSource) -> Self {
        Self { memory, symbols }
    }
}

impl UnwindCallbacks for TargetCallbacks<'_> {
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Option<usize> {
        self.memory.read(address, buf).ok()
    }

    fn module_base(&self, address: u64) -> Option<u64> {
        self.symbols.module_base_of(address)
    }

    fn translate_address(&self, address: u64) -> u64 {
        error!("translate_address called for 0x{:x}; unexpected unwinder configuration", address);
        debug_assert!(false, "translate_address must never be called");
        0
    }
}

/// フレームポインタの連鎖を辿るx86-64のアンワインダ
///
/// 各フレームの `[fp]` に呼び出し元のフレームポインタ、
/// `[fp + 8]` に戻りアドレスが保存されていることを前提とします。
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePointerUnwinder;

impl FramePointerUnwinder {
    pub fn new() -> Self {
        Self
    }

    /// 開始スタックポインタより下にあるフレームを読み飛ばす
    fn seek_to_stack(frame: &mut UnwindFrame, callbacks: &dyn UnwindCallbacks) -> bool {
        for _ in 0..MAX_SEEK_FRAMES {
            if frame.frame == 0 || frame.frame >= frame.stack {
                return true;
            }
            let Some(return_address) =
                Self::return_slot(frame.frame).and_then(|slot| callbacks.read_word(slot))
            else {
                return false;
            };
            let Some(caller) = callbacks.read_word(frame.frame) else {
                return false;
            };
            if caller != 0 && caller <= frame.frame {
                return false;
            }
            frame.pc = return_address;
            frame.frame = caller;
        }
        false
    }

    /// 戻りアドレスが保存されているスロット（アドレス空間の末尾を越える場合は `None`）
    fn return_slot(frame_base: u64) -> Option<u64> {
        frame_base.checked_add(WORD_SIZE)
    }

    fn return_address_of(frame_base: u64, callbacks: &dyn UnwindCallbacks) -> u64 {
        if frame_base == 0 {
            return 0;
        }
        Self::return_slot(frame_base)
            .and_then(|slot| callbacks.read_word(slot))
            .unwrap_or(0)
    }
}

impl FrameUnwinder for FramePointerUnwinder {
    fn step(
        &self,
        frame: &mut UnwindFrame,
        context: &mut ThreadContext,
        callbacks: &dyn UnwindCallbacks,
    ) -> bool {
        if frame.depth == 0 {
            // 最初のステップはシードされたフレーム自身を報告する
            if !Self::seek_to_stack(frame, callbacks) {
                return false;
            }
        } else {
            let pc = frame.return_address;
            let caller = if frame.frame == 0 {
                0
            } else {
                match callbacks.read_word(frame.frame) {
                    Some(caller) => caller,
                    None => return false,
                }
            };
            // スタックは上位アドレスに向かって伸びていなければならない
            if caller != 0 && caller <= frame.frame {
                trace!(frame = frame.frame, caller, "frame chain is not growing");
                return false;
            }

            frame.stack = frame.frame.saturating_add(2 * WORD_SIZE);
            frame.pc = pc;
            frame.frame = caller;
        }

        frame.return_address = Self::return_address_of(frame.frame, callbacks);
        frame.module_base = if frame.pc != 0 {
            callbacks.module_base(frame.pc)
        } else {
            None
        };
        frame.depth += 1;

        context.instruction_pointer = frame.pc;
        context.frame_pointer = frame.frame;
        context.stack_pointer = frame.stack;

        trace!(
            depth = frame.depth,
            pc = frame.pc,
            frame = frame.frame,
            return_address = frame.return_address,
            "unwound frame"
        );
        true
    }
}
