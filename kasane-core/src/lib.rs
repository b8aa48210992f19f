//! Kasane スタック解析のコア機能
//!
//! このクレートは、デバッガのスタックペイン向けの解析機能を提供します。
//! スレッドのコールスタックの構築、スタックスロットに格納された値への
//! コメント付け（戻りアドレス、文字列、ラベル、SEHチェーン）、
//! およびそれらの結果のキャッシュを行います。
//!
//! プロセスメモリの読み書きやシンボル解決などの外部機能は
//! [`target`] モジュールのトレイトとして受け取ります。

pub mod cache;
pub mod callstack;
pub mod comment;
pub mod config;
pub mod disasm;
pub mod errors;
pub mod seh;
pub mod session;
pub mod slot;
pub mod symname;
pub mod target;
pub mod unwind;

pub use cache::SnapshotMap;
pub use callstack::{CallStack, CallStackCache, CallStackEntry, CallStackWalker};
pub use comment::{ColorTag, StackComment, MAX_COMMENT_SIZE};
pub use config::StackConfig;
pub use disasm::{BranchTarget, CapstoneDecoder, DecodedInstruction, InstructionDecoder};
pub use errors::StackError;
pub use seh::SehChainCache;
pub use session::{Collaborators, StackSession};
pub use slot::SlotResolver;
pub use symname::{format_pointer, format_symbol_address, UNKNOWN_SYMBOL};
pub use target::{
    AddressInfo, HandlerChain, MemoryRegion, StringProbe, SymbolSource, TargetMemory,
    ThreadContext, ThreadControl,
};
pub use unwind::{
    FramePointerUnwinder, FrameUnwinder, TargetCallbacks, UnwindCallbacks, UnwindFrame,
};

/// マシンワードのサイズ（バイト数）
pub const WORD_SIZE: u64 = 8;

/// コア機能の結果型
pub type Result<T> = anyhow::Result<T>;
