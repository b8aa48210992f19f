//! コマンド引数のアドレス表記

use anyhow::{bail, Result};

/// アドレス表記をu64に変換する
///
/// デバッガの表示に合わせて16進数を既定とします。
///
/// * `0x7ffd1234` / `7ffd1234` - 16進数
/// * ``00007ffd`12345678`` / `7ffd_1234` - 桁区切り付きの16進数
/// * `0n4096` - 10進数
pub fn parse_address(text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, radix) = match text.get(..2) {
        Some("0x") | Some("0X") => (&text[2..], 16),
        Some("0n") | Some("0N") => (&text[2..], 10),
        _ => (text, 16),
    };

    let digits: String = digits.chars().filter(|&c| c != '`' && c != '_').collect();
    if digits.is_empty() {
        bail!("Missing digits in address '{}'", text);
    }

    u64::from_str_radix(&digits, radix)
        .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", text, e))
}
