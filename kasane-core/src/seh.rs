//! SEHチェーンキャッシュ
//!
//! ハンドラレコードのアドレスから、チェーン内の位置を示すコメントへの対応を保持します。
//! チェーンの列挙は比較的重いため、デバッガの停止イベントごとに明示的に再構築します。

use crate::cache::SnapshotMap;
use crate::comment::{ColorTag, StackComment};
use crate::target::HandlerChain;
use std::collections::HashMap;
use tracing::debug;

/// SEHチェーンキャッシュ
#[derive(Default)]
pub struct SehChainCache {
    records: SnapshotMap<u64, StackComment>,
}

impl SehChainCache {
    /// 空のキャッシュを作成する
    pub fn new() -> Self {
        Self {
            records: SnapshotMap::new(),
        }
    }

    /// チェーンを列挙し直してキャッシュ全体を差し替える
    ///
    /// 列挙に失敗した場合や空のチェーンの場合、キャッシュは空になります。
    /// 戻り値はキャッシュされたレコード数です。
    pub fn refresh(&self, chain: &dyn HandlerChain) -> usize {
        let records = match chain.enumerate() {
            Ok(records) => records,
            Err(e) => {
                debug!("SEH chain enumeration failed: {}", e);
                Vec::new()
            }
        };

        let map = build_seh_map(&records);
        let count = map.len();
        self.records.replace_all(map);

        debug!("SEH chain cache refreshed: {} records", count);
        count
    }

    /// レコードのアドレスからコメントを検索する
    pub fn lookup(&self, address: u64) -> Option<StackComment> {
        self.records.get(&address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

/// レコードのアドレス列からコメントのマップを構築する
///
/// 最後のレコード以外は次のレコードへの参照（1始まり）、
/// 最後のレコードはチェーンの終端を示します。
pub fn build_seh_map(records: &[u64]) -> HashMap<u64, StackComment> {
    let count = records.len();
    let mut map = HashMap::with_capacity(count);

    for (i, &address) in records.iter().enumerate() {
        let text = if i + 1 != count {
            format!("Pointer to SEH_Record[{}]", i + 1)
        } else {
            "End of SEH Chain".to_string()
        };
        map.entry(address)
            .or_insert_with(|| StackComment::new(text, ColorTag::SehChain));
    }

    map
}
