//! /proc/pid/maps の解析

use crate::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// ファイル内のオフセット
    pub offset: u64,
    /// マップされたファイルのパス（匿名マッピングや [stack] などは括弧付きの名前）
    pub path: Option<String>,
}

impl MemoryMapping {
    /// アドレスがマッピング内にあるかどうか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// 実ファイルにバックされたマッピングかどうか
    pub fn is_file_backed(&self) -> bool {
        self.path.as_deref().is_some_and(|p| p.starts_with('/'))
    }
}

/// maps の1行を解析する
///
/// フォーマット: "address perms offset dev inode pathname"
/// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
pub fn parse_maps_line(line: &str) -> Option<MemoryMapping> {
    let mut parts = line.split_whitespace();
    let range = parts.next()?;
    let perms = parts.next()?;
    let offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    // パスには空白が含まれることがある
    let path = parts.collect::<Vec<_>>().join(" ");

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(offset, 16).ok()?;

    let perms = perms.as_bytes();
    Some(MemoryMapping {
        start,
        end,
        readable: perms.first() == Some(&b'r'),
        writable: perms.get(1) == Some(&b'w'),
        executable: perms.get(2) == Some(&b'x'),
        offset,
        path: (!path.is_empty()).then_some(path),
    })
}

/// プロセスのメモリマッピングを読み取る
pub fn read_mappings(pid: i32) -> Result<Vec<MemoryMapping>> {
    let maps_path = format!("/proc/{}/maps", pid);
    let file = File::open(&maps_path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
    let reader = BufReader::new(file);

    let mut mappings = Vec::new();
    for line in reader.lines() {
        if let Some(mapping) = parse_maps_line(&line?) {
            mappings.push(mapping);
        }
    }
    Ok(mappings)
}
