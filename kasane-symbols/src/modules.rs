//! ロード済みモジュールの管理

use crate::loader::ElfImage;
use crate::symbols::SymbolTable;
use crate::Result;
use kasane_core::{AddressInfo, SymbolSource};
use kasane_target::maps::read_mappings;
use kasane_target::MemoryMapping;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// ロード済みのシンボル情報（テーブルとロードバイアス）
struct LoadedSymbols {
    table: SymbolTable,
    bias: u64,
}

/// デバッグ対象にロードされたモジュール
pub struct Module {
    /// ファイル名
    pub name: String,
    /// ファイルのパス
    pub path: String,
    /// 最も低いマッピングの開始アドレス
    pub base: u64,
    /// 最も高いマッピングの終了アドレス
    pub end: u64,
    /// ファイルオフセット0に対応するアドレス
    load_address: u64,
    symbols: OnceLock<Option<LoadedSymbols>>,
}

impl Module {
    fn new(path: &str, base: u64, end: u64, load_address: u64) -> Self {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            name,
            path: path.to_string(),
            base,
            end,
            load_address,
            symbols: OnceLock::new(),
        }
    }

    /// シンボルテーブルを指定してモジュールを作成する
    pub fn with_symbols(name: &str, base: u64, end: u64, table: SymbolTable, bias: u64) -> Self {
        Self {
            name: name.to_string(),
            path: name.to_string(),
            base,
            end,
            load_address: base,
            symbols: OnceLock::from(Some(LoadedSymbols { table, bias })),
        }
    }

    /// アドレスがモジュール内にあるかどうか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end
    }

    /// シンボルテーブルを必要になったときに読み込む
    fn symbols(&self) -> Option<&LoadedSymbols> {
        self.symbols
            .get_or_init(|| match ElfImage::load(&self.path) {
                Ok(image) => {
                    // PIEや共有ライブラリのシンボルはロードアドレスからのオフセット
                    let bias = if image.is_dynamic { self.load_address } else { 0 };
                    debug!(
                        "loaded {} symbols from {} (bias 0x{:x})",
                        image.symbols.len(),
                        self.path,
                        bias
                    );
                    Some(LoadedSymbols {
                        table: image.symbols,
                        bias,
                    })
                }
                Err(e) => {
                    debug!("no symbols for {}: {}", self.path, e);
                    None
                }
            })
            .as_ref()
    }

    /// アドレスのラベルを取得する
    pub fn label_at(&self, addr: u64) -> Option<String> {
        let loaded = self.symbols()?;
        loaded.table.label_at(addr.checked_sub(loaded.bias)?)
    }
}

/// モジュールの一覧
#[derive(Default)]
pub struct ModuleMap {
    modules: Vec<Module>,
}

impl ModuleMap {
    /// モジュールの一覧から作成する
    pub fn new(mut modules: Vec<Module>) -> Self {
        modules.sort_by_key(|m| m.base);
        Self { modules }
    }

    /// /proc/pid/maps からモジュールの一覧を作成する
    pub fn from_pid(pid: i32) -> Result<Self> {
        let mappings = read_mappings(pid)?;
        Ok(Self::from_mappings(&mappings))
    }

    /// メモリマッピングをファイルごとにまとめてモジュールにする
    pub fn from_mappings(mappings: &[MemoryMapping]) -> Self {
        let mut modules: Vec<Module> = Vec::new();

        for mapping in mappings.iter().filter(|m| m.is_file_backed()) {
            let Some(path) = mapping.path.as_deref() else {
                continue;
            };
            match modules.iter_mut().find(|m| m.path == path) {
                Some(module) => {
                    module.base = module.base.min(mapping.start);
                    module.end = module.end.max(mapping.end);
                }
                None => modules.push(Module::new(
                    path,
                    mapping.start,
                    mapping.end,
                    mapping.start.saturating_sub(mapping.offset),
                )),
            }
        }

        Self::new(modules)
    }

    /// アドレスを含むモジュールを検索する
    pub fn module_of(&self, addr: u64) -> Option<&Module> {
        let idx = self.modules.partition_point(|m| m.base <= addr);
        let module = self.modules.get(idx.checked_sub(1)?)?;
        module.contains(addr).then_some(module)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }
}

impl SymbolSource for ModuleMap {
    fn resolve(&self, address: u64) -> AddressInfo {
        match self.module_of(address) {
            Some(module) => AddressInfo {
                module: Some(module.name.clone()),
                label: module.label_at(address),
            },
            None => AddressInfo::default(),
        }
    }

    fn module_name_of(&self, address: u64) -> Option<String> {
        self.module_of(address).map(|m| m.name.clone())
    }

    fn module_base_of(&self, address: u64) -> Option<u64> {
        self.module_of(address).map(|m| m.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Symbol;
    use kasane_target::maps::parse_maps_line;

    #[test]
    fn test_from_mappings_groups_by_file() {
        let lines = [
            "555555554000-555555555000 r--p 00000000 08:01 10 /usr/bin/app",
            "555555555000-555555556000 r-xp 00001000 08:01 10 /usr/bin/app",
            "7ffff7dd0000-7ffff7df0000 r-xp 00000000 08:01 20 /lib/libc.so.6",
            "7ffffffde000-7ffffffff000 rw-p 00000000 00:00 0 [stack]",
        ];
        let mappings: Vec<_> = lines.iter().filter_map(|l| parse_maps_line(l)).collect();
        let map = ModuleMap::from_mappings(&mappings);

        assert_eq!(map.modules().len(), 2);
        assert_eq!(map.module_name_of(0x555555555123).as_deref(), Some("app"));
        assert_eq!(map.module_base_of(0x555555555123), Some(0x555555554000));
        assert_eq!(map.module_name_of(0x7ffff7dd0010).as_deref(), Some("libc.so.6"));
        assert_eq!(map.module_name_of(0x7ffffffde100), None);
    }

    #[test]
    fn test_resolve_with_symbols() {
        let table = SymbolTable::new(vec![Symbol::new("main".to_string(), 0x1100, 0x20)]);
        let map = ModuleMap::new(vec![Module::with_symbols(
            "app",
            0x400000,
            0x402000,
            table,
            0x400000,
        )]);

        let info = map.resolve(0x401108);
        assert_eq!(info.module.as_deref(), Some("app"));
        assert_eq!(info.label.as_deref(), Some("main+0x8"));

        let unlabeled = map.resolve(0x401800);
        assert_eq!(unlabeled.module.as_deref(), Some("app"));
        assert_eq!(unlabeled.label, None);

        assert_eq!(map.resolve(0x10), AddressInfo::default());
    }
}
