//! デバッグ対象へのアクセスを抽象化するトレイト
//!
//! プロセスメモリ、シンボル解決、文字列検出、スレッド制御などは
//! このクレートの外側で実装されます。コアはこれらのトレイト越しに
//! 結果を組み合わせて解釈するだけです。

use crate::{Result, WORD_SIZE};

/// メモリ領域（ベースアドレスとサイズ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
}

impl MemoryRegion {
    /// 領域の終端アドレス（この値は含まない）
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// アドレスが領域内にあるかどうか
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// デバッグ対象のメモリ
pub trait TargetMemory: Send + Sync {
    /// `address` から `buf` へ読み取り、実際に転送できたバイト数を返す
    ///
    /// 部分的な読み取りはエラーではありません。
    /// 1バイトも読めなかった場合のみエラーを返します。
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize>;

    /// アドレスが読み取り可能なポインタかどうか
    fn is_readable(&self, address: u64) -> bool;

    /// アドレスを含むメモリ領域を検索する
    fn find_region(&self, address: u64) -> Option<MemoryRegion>;

    /// 1ワードを読み取る（リトルエンディアン）
    fn read_word(&self, address: u64) -> Option<u64> {
        let mut bytes = [0u8; WORD_SIZE as usize];
        match self.read(address, &mut bytes) {
            Ok(n) if n == bytes.len() => Some(u64::from_le_bytes(bytes)),
            _ => None,
        }
    }
}

/// アドレスに対するモジュール名とラベル
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressInfo {
    pub module: Option<String>,
    pub label: Option<String>,
}

/// シンボル・ラベル・モジュールの解決
pub trait SymbolSource: Send + Sync {
    /// アドレスのモジュール名とラベルを解決する
    fn resolve(&self, address: u64) -> AddressInfo;

    /// アドレスを含むモジュールの名前
    fn module_name_of(&self, address: u64) -> Option<String>;

    /// アドレスを含むモジュールのベースアドレス
    fn module_base_of(&self, address: u64) -> Option<u64>;
}

/// アドレスにある文字列の検出
pub trait StringProbe: Send + Sync {
    /// 表示可能な文字列があればそれを返す
    fn string_at(&self, address: u64) -> Option<String>;
}

/// 例外ハンドラチェーンの列挙
pub trait HandlerChain: Send + Sync {
    /// ハンドラレコードのアドレスを内側から順に返す
    fn enumerate(&self) -> Result<Vec<u64>>;
}

/// ウォークの起点となるレジスタ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadContext {
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    pub frame_pointer: u64,
}

/// 対象スレッドの制御
pub trait ThreadControl: Send + Sync {
    /// スレッドを一時停止する
    fn suspend(&self) -> Result<()>;

    /// スレッドを再開する
    fn resume(&self) -> Result<()>;

    /// レジスタコンテキストを取得する
    fn context(&self) -> Result<ThreadContext>;
}
