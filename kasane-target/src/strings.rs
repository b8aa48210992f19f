//! 文字列の検出

use kasane_core::{StringProbe, TargetMemory};
use std::sync::Arc;

/// 文字列とみなす最小の文字数
pub const MIN_STRING_LEN: usize = 4;

/// 文字列検出のために読み取る最大バイト数
///
/// コメントの容量より大きくしておき、長い文字列はコメント側で切り詰めます。
pub const MAX_STRING_LEN: usize = 1024;

/// NUL終端の表示可能な文字列を検出する
///
/// ASCIIとUTF-16LEの文字列を認識します。
pub struct TextScanner {
    memory: Arc<dyn TargetMemory>,
}

impl TextScanner {
    pub fn new(memory: Arc<dyn TargetMemory>) -> Self {
        Self { memory }
    }
}

impl StringProbe for TextScanner {
    fn string_at(&self, address: u64) -> Option<String> {
        let mut buf = [0u8; MAX_STRING_LEN];
        let n = self.memory.read(address, &mut buf).ok()?;
        decode_text(&buf[..n])
    }
}

fn is_printable(c: u32) -> bool {
    matches!(c, 0x20..=0x7e | 0x09 | 0x0a | 0x0d)
}

/// 文字列の終端位置
///
/// NULがなくても、読み取りバッファが一杯なら全体を文字列の先頭部分とみなします。
fn text_end<T: Copy + Default + PartialEq>(units: &[T], capacity: usize) -> Option<usize> {
    match units.iter().position(|&u| u == T::default()) {
        Some(nul) => Some(nul),
        None if units.len() >= capacity => Some(units.len()),
        None => None,
    }
}

/// バイト列の先頭にあるNUL終端文字列を取り出す
///
/// `bytes` が [`MAX_STRING_LEN`] バイトに達していれば終端のない文字列も受け付けます。
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    decode_ascii(bytes).or_else(|| decode_utf16le(bytes))
}

fn decode_ascii(bytes: &[u8]) -> Option<String> {
    let end = text_end(bytes, MAX_STRING_LEN)?;
    let text = &bytes[..end];
    if text.len() < MIN_STRING_LEN || !text.iter().all(|&b| is_printable(b as u32)) {
        return None;
    }
    Some(text.iter().map(|&b| b as char).collect())
}

fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let end = text_end(&units, MAX_STRING_LEN / 2)?;
    let text = &units[..end];
    if text.len() < MIN_STRING_LEN || !text.iter().all(|&u| is_printable(u as u32)) {
        return None;
    }
    String::from_utf16(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasane_core::MemoryRegion;

    /// アドレス0x1000から始まる連続したメモリ
    struct Bytes(Vec<u8>);

    impl TargetMemory for Bytes {
        fn read(&self, address: u64, buf: &mut [u8]) -> kasane_core::Result<usize> {
            let offset = address
                .checked_sub(0x1000)
                .filter(|&o| (o as usize) < self.0.len())
                .ok_or_else(|| anyhow::anyhow!("unmapped"))? as usize;
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }

        fn is_readable(&self, _address: u64) -> bool {
            true
        }

        fn find_region(&self, _address: u64) -> Option<MemoryRegion> {
            None
        }
    }

    #[test]
    fn test_ascii_string() {
        assert_eq!(decode_text(b"hello\0junk").as_deref(), Some("hello"));
    }

    #[test]
    fn test_utf16_string() {
        let bytes: Vec<u8> = "wide!\0"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_text(&bytes).as_deref(), Some("wide!"));
    }

    #[test]
    fn test_rejects_short_and_binary_data() {
        assert_eq!(decode_text(b"abc\0"), None);
        assert_eq!(decode_text(&[0x48, 0x89, 0xe5, 0x90, 0x00]), None);
        // 終端がない
        assert_eq!(decode_text(b"no terminator"), None);
    }

    #[test]
    fn test_long_string() {
        let mut bytes = vec![b'x'; 300];
        bytes.push(0);
        assert_eq!(decode_text(&bytes), Some("x".repeat(300)));
    }

    #[test]
    fn test_scanner_reports_string_longer_than_comment() {
        let mut bytes = vec![b'z'; 600];
        bytes.push(0);
        let scanner = TextScanner::new(Arc::new(Bytes(bytes)));
        assert_eq!(scanner.string_at(0x1000), Some("z".repeat(600)));
        assert_eq!(scanner.string_at(0x1000 + 598), None);
        assert_eq!(scanner.string_at(0x2000), None);
    }

    #[test]
    fn test_unterminated_string_filling_the_buffer() {
        let bytes = vec![b'y'; MAX_STRING_LEN];
        assert_eq!(decode_text(&bytes), Some("y".repeat(MAX_STRING_LEN)));

        // バッファが一杯でも表示できない文字が混ざっていれば文字列ではない
        let mut binary = bytes.clone();
        binary[10] = 0xff;
        assert_eq!(decode_text(&binary), None);
    }
}
