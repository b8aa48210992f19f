//! 例外ハンドラチェーンの列挙

use crate::Result;
use kasane_core::{HandlerChain, TargetMemory};
use std::collections::HashSet;
use std::sync::Arc;

/// 列挙するレコードの上限
pub const MAX_RECORDS: usize = 1000;

/// チェーンの終端を示す値
const END_OF_CHAIN: u64 = u64::MAX;

/// メモリ上でリンクされた登録レコードのチェーン
///
/// 各レコードは `{ next, handler }` の形で、先頭ワードが次のレコードを指します。
/// `head_slot` にはチェーン先頭のレコードへのポインタを格納したアドレスを指定します。
pub struct LinkedRecordChain {
    memory: Arc<dyn TargetMemory>,
    head_slot: Option<u64>,
}

impl LinkedRecordChain {
    pub fn new(memory: Arc<dyn TargetMemory>, head_slot: Option<u64>) -> Self {
        Self { memory, head_slot }
    }
}

impl HandlerChain for LinkedRecordChain {
    fn enumerate(&self) -> Result<Vec<u64>> {
        let Some(head_slot) = self.head_slot else {
            return Ok(Vec::new());
        };

        let mut record = self
            .memory
            .read_word(head_slot)
            .ok_or_else(|| anyhow::anyhow!("Failed to read chain head at 0x{:x}", head_slot))?;

        let mut records = Vec::new();
        let mut seen = HashSet::new();

        while record != 0 && record != END_OF_CHAIN && records.len() < MAX_RECORDS {
            // 循環したチェーンは打ち切る
            if !seen.insert(record) {
                break;
            }
            records.push(record);
            match self.memory.read_word(record) {
                Some(next) => record = next,
                None => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasane_core::MemoryRegion;
    use std::collections::HashMap;

    struct Words(HashMap<u64, u64>);

    impl TargetMemory for Words {
        fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
            let word = self
                .0
                .get(&address)
                .ok_or_else(|| anyhow::anyhow!("unmapped"))?;
            let n = buf.len().min(8);
            buf[..n].copy_from_slice(&word.to_le_bytes()[..n]);
            Ok(n)
        }

        fn is_readable(&self, address: u64) -> bool {
            self.0.contains_key(&address)
        }

        fn find_region(&self, _address: u64) -> Option<MemoryRegion> {
            None
        }
    }

    fn chain(words: &[(u64, u64)], head: Option<u64>) -> LinkedRecordChain {
        let memory = Arc::new(Words(words.iter().copied().collect()));
        LinkedRecordChain::new(memory, head)
    }

    #[test]
    fn test_walks_until_terminator() {
        let c = chain(
            &[(0x10, 0x100), (0x100, 0x200), (0x200, 0x300), (0x300, u64::MAX)],
            Some(0x10),
        );
        assert_eq!(c.enumerate().unwrap(), vec![0x100, 0x200, 0x300]);
    }

    #[test]
    fn test_stops_on_cycle() {
        let c = chain(&[(0x10, 0x100), (0x100, 0x200), (0x200, 0x100)], Some(0x10));
        assert_eq!(c.enumerate().unwrap(), vec![0x100, 0x200]);
    }

    #[test]
    fn test_no_head_is_empty() {
        assert!(chain(&[], None).enumerate().unwrap().is_empty());
        assert!(chain(&[], Some(0x10)).enumerate().is_err());
    }
}
