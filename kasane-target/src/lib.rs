//! Kasane ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のプロセスにアクセスするための低レベル機能を提供します。
//! ptraceと/procを使ったメモリアクセス、スレッドの停止と再開、レジスタの取得、
//! 文字列の検出、ハンドラチェーンの列挙などを行い、
//! kasane-coreのトレイトとして公開します。

pub mod handlers;
pub mod maps;
pub mod memory;
pub mod process;
pub mod registers;
pub mod strings;
pub mod thread;

pub use handlers::LinkedRecordChain;
pub use maps::MemoryMapping;
pub use memory::Memory;
pub use process::{Process, StopReason};
pub use registers::Registers;
pub use strings::TextScanner;
pub use thread::{ThreadHandle, ThreadId};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
