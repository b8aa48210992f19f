//! ELFの読み込み機能

use crate::symbols::{Symbol, SymbolTable};
use crate::Result;
use object::{Object, ObjectKind, ObjectSymbol, SymbolKind};
use std::fs;
use std::path::Path;

/// 読み込んだELFイメージから取り出した情報
pub struct ElfImage {
    /// シンボルテーブル（リンク時のアドレス）
    pub symbols: SymbolTable,
    /// PIE（Position Independent Executable）または共有ライブラリかどうか
    pub is_dynamic: bool,
}

impl ElfImage {
    /// ELFファイルを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // ファイルを読み込む
        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        Self::parse(&file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))
    }

    /// メモリ上のELFデータを解析する
    pub fn parse(data: &[u8]) -> Result<Self> {
        let object_file = object::File::parse(data)?;

        // .symtabと.dynsymの両方から関数とデータのシンボルを集める
        let symbols = object_file
            .symbols()
            .chain(object_file.dynamic_symbols())
            .filter(|s| matches!(s.kind(), SymbolKind::Text | SymbolKind::Data))
            .filter(|s| s.address() != 0)
            .filter_map(|s| {
                let name = s.name().ok()?;
                (!name.is_empty()).then(|| Symbol::new(name.to_string(), s.address(), s.size()))
            })
            .collect();

        // ET_DYN (Dynamic/Shared Object) = PIE実行ファイルまたは共有ライブラリ
        // ET_EXEC (Executable) = 非PIE実行ファイル
        let is_dynamic = matches!(object_file.kind(), ObjectKind::Dynamic);

        Ok(Self {
            symbols: SymbolTable::new(symbols),
            is_dynamic,
        })
    }
}
