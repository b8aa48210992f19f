//! シンボルテーブル

/// シンボル情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得（デマングル可能ならデマングル後、できなければマングル名）
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }

    /// アドレスがシンボルの範囲内にあるかどうか
    pub fn contains(&self, addr: u64) -> bool {
        addr == self.address || (addr > self.address && addr - self.address < self.size)
    }
}

/// シンボル名をデマングルする
fn demangle_symbol(name: &str) -> String {
    // Rustのシンボルをデマングル（ハッシュ部分は省く）
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }
    name.to_string()
}

/// アドレス順に並んだシンボルテーブル
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols_by_address: Vec<Symbol>,
}

impl SymbolTable {
    /// シンボルの一覧からテーブルを作成する
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        // アドレスでソートし、同じアドレスはサイズ付きのものを優先して1つにする
        symbols.sort_by(|a, b| a.address.cmp(&b.address).then(b.size.cmp(&a.size)));
        symbols.dedup_by_key(|s| s.address);
        Self {
            symbols_by_address: symbols,
        }
    }

    pub fn len(&self) -> usize {
        self.symbols_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_address.is_empty()
    }

    /// アドレスを含むシンボルを検索する
    ///
    /// サイズが0のシンボルは開始アドレスちょうどの場合のみ一致します。
    pub fn symbol_at(&self, addr: u64) -> Option<&Symbol> {
        // バイナリサーチで最も近いシンボルを見つける
        let idx = match self
            .symbols_by_address
            .binary_search_by_key(&addr, |s| s.address)
        {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let sym = &self.symbols_by_address[idx];
        sym.contains(addr).then_some(sym)
    }

    /// アドレスのラベルを取得する
    ///
    /// シンボルの先頭なら `name`、途中なら `name+0xoff` を返します。
    pub fn label_at(&self, addr: u64) -> Option<String> {
        let sym = self.symbol_at(addr)?;
        let offset = addr - sym.address;
        if offset == 0 {
            Some(sym.display_name().to_string())
        } else {
            Some(format!("{}+0x{:x}", sym.display_name(), offset))
        }
    }
}
