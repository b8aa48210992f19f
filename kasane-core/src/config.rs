//! スタック解析の設定

use crate::comment::MAX_COMMENT_SIZE;

/// コールスタックの最大フレーム数
pub const DEFAULT_MAX_FRAMES: usize = 50;

/// コールスタックキャッシュに保持するキーの最大数
pub const DEFAULT_CALLSTACK_CACHE_CAPACITY: usize = 20;

/// 戻りアドレス判定のために読み取るバイト数
pub const DEFAULT_DISASM_WINDOW: u64 = 64;

/// スタック解析の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// 1回のウォークで生成するフレームの上限
    pub max_frames: usize,
    /// コールスタックキャッシュのキー数の上限（超える場合は全消去）
    pub callstack_cache_capacity: usize,
    /// 逆アセンブルのウィンドウサイズ
    pub disasm_window: u64,
    /// コメントの容量（終端文字を含む）
    pub comment_capacity: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            callstack_cache_capacity: DEFAULT_CALLSTACK_CACHE_CAPACITY,
            disasm_window: DEFAULT_DISASM_WINDOW,
            comment_capacity: MAX_COMMENT_SIZE,
        }
    }
}
