//! コールスタックの構築とキャッシュ

use crate::cache::SnapshotMap;
use crate::comment::truncate_to_capacity;
use crate::config::StackConfig;
use crate::errors::StackError;
use crate::symname::format_symbol_address;
use crate::target::{SymbolSource, TargetMemory, ThreadContext, ThreadControl};
use crate::unwind::{FrameUnwinder, TargetCallbacks, UnwindFrame};
use crate::WORD_SIZE;
use tracing::debug;

/// コールスタックの1エントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStackEntry {
    /// 保存された戻りアドレスのスタック上の位置（フレームベース + 1ワード）
    pub address: u64,
    /// フレームのプログラムカウンタ
    pub from: u64,
    /// フレームの戻りアドレス
    pub to: u64,
    pub comment: String,
}

/// コールスタック（内側のフレームが先頭）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    entries: Vec<CallStackEntry>,
}

impl CallStack {
    pub fn new(entries: Vec<CallStackEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CallStackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// エントリの総数
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CallStackEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a CallStack {
    type Item = &'a CallStackEntry;
    type IntoIter = std::slice::Iter<'a, CallStackEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// コールスタックを構築するウォーカー
pub struct CallStackWalker<'a> {
    pub thread: &'a dyn ThreadControl,
    pub memory: &'a dyn TargetMemory,
    pub symbols: &'a dyn SymbolSource,
    pub unwinder: &'a dyn FrameUnwinder,
    pub config: &'a StackConfig,
}

impl<'a> CallStackWalker<'a> {
    /// `stack_pointer` を起点にコールスタックを構築する
    ///
    /// エラーになるのはスレッド制御に失敗した場合のみです。
    /// アンワインダの失敗はそこまでのフレームを返して終了します。
    pub fn walk(&self, stack_pointer: u64) -> Result<CallStack, StackError> {
        let mut context = self.capture_context()?;
        let mut frame = UnwindFrame::seed(&context, stack_pointer);
        let callbacks = TargetCallbacks::new(self.memory, self.symbols);

        let mut entries = Vec::with_capacity(self.config.max_frames);
        for _ in 0..self.config.max_frames {
            if !self.unwinder.step(&mut frame, &mut context, &callbacks) {
                // 終端に達したのか壊れたフレームなのかは区別しない
                break;
            }
            if frame.pc == 0 {
                // スタックの底に達した
                break;
            }
            entries.push(self.entry_from_frame(&frame));
        }

        debug!(
            stack_pointer,
            frames = entries.len(),
            "call stack walked"
        );
        Ok(CallStack::new(entries))
    }

    /// スレッドを一時停止してレジスタを取得し、すぐに再開する
    fn capture_context(&self) -> Result<ThreadContext, StackError> {
        self.thread
            .suspend()
            .map_err(|e| StackError::Suspend(e.to_string()))?;

        let context = self.thread.context();
        // コンテキスト取得に失敗してもスレッドは必ず再開する
        let resumed = self.thread.resume();

        let context = context.map_err(|e| StackError::Context(e.to_string()))?;
        resumed.map_err(|e| StackError::Resume(e.to_string()))?;
        Ok(context)
    }

    fn entry_from_frame(&self, frame: &UnwindFrame) -> CallStackEntry {
        let address = frame.frame.wrapping_add(WORD_SIZE);
        let from = frame.pc;
        let to = frame.return_address;
        let comment = format!(
            "return to {} from {}",
            format_symbol_address(self.symbols, to),
            format_symbol_address(self.symbols, from)
        );

        CallStackEntry {
            address,
            from,
            to,
            comment: truncate_to_capacity(comment, self.config.comment_capacity),
        }
    }
}

/// コールスタックキャッシュ
///
/// キーはウォークの起点となったスタックポインタです。
/// キー数が上限に達した状態で新しいキーを格納すると、全体を消去してから格納します。
pub struct CallStackCache {
    stacks: SnapshotMap<u64, CallStack>,
    capacity: usize,
}

impl CallStackCache {
    /// キー数の上限を指定してキャッシュを作成する
    pub fn new(capacity: usize) -> Self {
        Self {
            stacks: SnapshotMap::new(),
            capacity,
        }
    }

    /// キャッシュされたコールスタックを取得する
    pub fn get(&self, stack_pointer: u64) -> Option<CallStack> {
        self.stacks.get(&stack_pointer)
    }

    /// コールスタックを格納する
    pub fn store(&self, stack_pointer: u64, stack: CallStack) {
        if self.stacks.insert_bounded(stack_pointer, stack, self.capacity) {
            debug!("call stack cache flushed (capacity {})", self.capacity);
        }
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn clear(&self) {
        self.stacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_of(n: u64) -> CallStack {
        CallStack::new(vec![CallStackEntry {
            address: n,
            from: n,
            to: n,
            comment: String::new(),
        }])
    }

    #[test]
    fn test_cache_miss_is_none() {
        let cache = CallStackCache::new(20);
        assert!(cache.get(0x1000).is_none());
    }

    #[test]
    fn test_twenty_first_key_flushes_cache() {
        let cache = CallStackCache::new(20);
        for key in 0..20 {
            cache.store(key, stack_of(key));
        }
        assert_eq!(cache.len(), 20);

        cache.store(100, stack_of(100));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(100), Some(stack_of(100)));
    }
}
