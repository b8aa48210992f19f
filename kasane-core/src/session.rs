//! デバッグセッション
//!
//! 2つのキャッシュと外部機能へのハンドルを1つのセッションにまとめます。
//! セッションはアタッチ時に作成し、デタッチや再起動のときに [`StackSession::reset`] します。
//! 複数のスレッドから同時に呼び出されることを想定しています。

use crate::callstack::{CallStack, CallStackCache, CallStackWalker};
use crate::comment::StackComment;
use crate::config::StackConfig;
use crate::disasm::InstructionDecoder;
use crate::seh::SehChainCache;
use crate::slot::SlotResolver;
use crate::symname::format_symbol_address;
use crate::target::{HandlerChain, StringProbe, SymbolSource, TargetMemory, ThreadControl};
use crate::unwind::FrameUnwinder;
use std::sync::Arc;
use tracing::{debug, warn};

/// セッションが利用する外部機能
#[derive(Clone)]
pub struct Collaborators {
    pub memory: Arc<dyn TargetMemory>,
    pub symbols: Arc<dyn SymbolSource>,
    pub strings: Arc<dyn StringProbe>,
    pub handlers: Arc<dyn HandlerChain>,
    pub thread: Arc<dyn ThreadControl>,
    pub decoder: Arc<dyn InstructionDecoder>,
    pub unwinder: Arc<dyn FrameUnwinder>,
}

/// スタック解析のセッション
pub struct StackSession {
    collaborators: Collaborators,
    config: StackConfig,
    seh: SehChainCache,
    callstacks: CallStackCache,
}

impl StackSession {
    /// 新しいセッションを作成する
    pub fn new(collaborators: Collaborators, config: StackConfig) -> Self {
        let callstacks = CallStackCache::new(config.callstack_cache_capacity);
        Self {
            collaborators,
            config,
            seh: SehChainCache::new(),
            callstacks,
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// スタックスロットのコメントを取得する
    pub fn resolve_comment(&self, address: u64) -> Option<StackComment> {
        let c = &self.collaborators;
        SlotResolver {
            memory: c.memory.as_ref(),
            symbols: c.symbols.as_ref(),
            strings: c.strings.as_ref(),
            decoder: c.decoder.as_ref(),
            seh: &self.seh,
            config: &self.config,
        }
        .resolve(address)
    }

    /// コールスタックを取得する
    ///
    /// `use_cache` が真ならキャッシュのみを参照し、見つからなければ空を返します。
    /// 偽なら必ずウォークし直し、その結果でキャッシュを更新します。
    pub fn get_call_stack(&self, stack_pointer: u64, use_cache: bool) -> CallStack {
        if use_cache {
            return match self.callstacks.get(stack_pointer) {
                Some(stack) => {
                    debug!(stack_pointer, "call stack cache hit");
                    stack
                }
                None => {
                    debug!(stack_pointer, "call stack cache miss");
                    CallStack::default()
                }
            };
        }

        let c = &self.collaborators;
        let walker = CallStackWalker {
            thread: c.thread.as_ref(),
            memory: c.memory.as_ref(),
            symbols: c.symbols.as_ref(),
            unwinder: c.unwinder.as_ref(),
            config: &self.config,
        };

        match walker.walk(stack_pointer) {
            Ok(stack) => {
                self.callstacks.store(stack_pointer, stack.clone());
                stack
            }
            Err(e) => {
                // スレッド制御の失敗は今回のウォークだけを打ち切る
                warn!("call stack walk aborted: {}", e);
                CallStack::default()
            }
        }
    }

    /// ウォークし直してキャッシュだけを更新する
    pub fn refresh_call_stack(&self, stack_pointer: u64) {
        let _ = self.get_call_stack(stack_pointer, false);
    }

    /// SEHチェーンキャッシュを再構築する
    pub fn refresh_seh_chain(&self) {
        self.seh.refresh(self.collaborators.handlers.as_ref());
    }

    /// デバッガの停止イベントで呼び出す
    pub fn on_debug_stop(&self, stack_pointer: u64) {
        self.refresh_seh_chain();
        self.refresh_call_stack(stack_pointer);
    }

    /// アドレスの表示名を取得する
    pub fn format_symbol(&self, address: u64) -> String {
        format_symbol_address(self.collaborators.symbols.as_ref(), address)
    }

    /// 両方のキャッシュを空にする
    pub fn reset(&self) {
        self.seh.clear();
        self.callstacks.clear();
        debug!("stack session caches reset");
    }

    /// キャッシュされているコールスタックの数
    pub fn cached_call_stacks(&self) -> usize {
        self.callstacks.len()
    }

    /// キャッシュされているSEHレコードの数
    pub fn cached_seh_records(&self) -> usize {
        self.seh.len()
    }
}
