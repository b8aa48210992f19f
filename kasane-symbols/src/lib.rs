//! Kasane シンボル解決
//!
//! このクレートは、デバッグ対象にロードされたモジュールとELFシンボルテーブルから
//! アドレスのモジュール名とラベルを解決する機能を提供します。

pub mod loader;
pub mod modules;
pub mod symbols;

pub use loader::ElfImage;
pub use modules::{Module, ModuleMap};
pub use symbols::{Symbol, SymbolTable};

/// シンボル解決の結果型
pub type Result<T> = anyhow::Result<T>;
