//! コア内部で分類されるエラー
//!
//! これらのエラーは公開APIの境界を越えません。
//! 呼び出し側には「コメントなし」や「空のコールスタック」として見えます。

use thiserror::Error;

/// スタック解析のエラー
#[derive(Debug, Error)]
pub enum StackError {
    /// スレッドの一時停止に失敗した
    #[error("failed to suspend thread: {0}")]
    Suspend(String),

    /// レジスタコンテキストの取得に失敗した
    #[error("failed to capture thread context: {0}")]
    Context(String),

    /// スレッドの再開に失敗した
    #[error("failed to resume thread: {0}")]
    Resume(String),
}
