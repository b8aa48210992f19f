//! アドレスの表示名

use crate::target::SymbolSource;

/// アドレスが0のときの表示
pub const UNKNOWN_SYMBOL: &str = "???";

/// アドレスをポインタリテラルとして整形する
pub fn format_pointer(address: u64) -> String {
    format!("0x{:016x}", address)
}

/// アドレスを短い表示名に変換する
///
/// * `module.label` - モジュールとラベルが分かる場合
/// * `module.0x...` - モジュールのみ分かる場合
/// * `label` / `0x...` - モジュールが分からない場合
/// * `???` - アドレスが0の場合
pub fn format_symbol_address(symbols: &dyn SymbolSource, address: u64) -> String {
    if address == 0 {
        return UNKNOWN_SYMBOL.to_string();
    }

    let info = symbols.resolve(address);
    let mut name = String::new();

    if let Some(module) = info.module.filter(|m| !m.is_empty()) {
        name.push_str(&module);
        name.push('.');
    }

    match info.label.filter(|l| !l.is_empty()) {
        Some(label) => name.push_str(&label),
        None => name.push_str(&format_pointer(address)),
    }

    name
}
