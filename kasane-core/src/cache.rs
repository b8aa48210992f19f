//! 共有読み取り・排他書き込みのキーバリューストア

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// スナップショットマップ
///
/// 読み取りは共有ロック、書き込みは排他ロックで行います。
/// 書き込み側は構造全体の差し替えを基本とし、ロックの保持時間を短く保ちます。
/// ロックがポイズンされても内部のマップをそのまま使い続けます。
pub struct SnapshotMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> SnapshotMap<K, V> {
    /// 空のマップを作成する
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 値のコピーを取得する
    pub fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// マップ全体を差し替える
    ///
    /// 読み取り側が構築途中のマップを見ることはありません。
    pub fn replace_all(&self, map: HashMap<K, V>) {
        let old = {
            let mut guard = self.write();
            std::mem::replace(&mut *guard, map)
        };
        // 古いマップの解放はロックの外で行う
        drop(old);
    }

    /// 上限付きで値を挿入する
    ///
    /// 新しいキーの挿入で `capacity` を超える場合、先にマップ全体を消去します。
    /// 消去が発生した場合は `true` を返します。
    pub fn insert_bounded(&self, key: K, value: V, capacity: usize) -> bool {
        let mut guard = self.write();
        let flushed = !guard.contains_key(&key) && guard.len() >= capacity;
        if flushed {
            guard.clear();
        }
        guard.insert(key, value);
        flushed
    }

    /// すべてのエントリを削除する
    pub fn clear(&self) {
        self.replace_all(HashMap::new());
    }
}

impl<K: Eq + Hash, V: Clone> Default for SnapshotMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
