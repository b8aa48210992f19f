//! テスト用の外部機能の偽実装

#![allow(dead_code)]

use kasane_core::{
    AddressInfo, CapstoneDecoder, Collaborators, FramePointerUnwinder, FrameUnwinder,
    HandlerChain, MemoryRegion, Result, StackConfig, StackSession, StringProbe, SymbolSource,
    TargetMemory, ThreadContext, ThreadControl, UnwindCallbacks, UnwindFrame,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 領域の集合で表したメモリ
#[derive(Default)]
pub struct FakeMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0で埋めた領域を追加する
    pub fn map(&mut self, base: u64, size: usize) {
        self.regions.push((base, vec![0u8; size]));
    }

    /// マップ済みの領域にバイト列を書き込む
    pub fn write(&mut self, address: u64, data: &[u8]) {
        let (base, bytes) = self
            .regions
            .iter_mut()
            .find(|(base, bytes)| address >= *base && address < *base + bytes.len() as u64)
            .expect("address is not mapped");
        let offset = (address - *base) as usize;
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn write_word(&mut self, address: u64, value: u64) {
        self.write(address, &value.to_le_bytes());
    }

    fn region_of(&self, address: u64) -> Option<&(u64, Vec<u8>)> {
        self.regions
            .iter()
            .find(|(base, bytes)| address >= *base && address < *base + bytes.len() as u64)
    }
}

impl TargetMemory for FakeMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        let (base, bytes) = self
            .region_of(address)
            .ok_or_else(|| anyhow::anyhow!("unmapped address 0x{:x}", address))?;
        let offset = (address - base) as usize;
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn is_readable(&self, address: u64) -> bool {
        self.region_of(address).is_some()
    }

    fn find_region(&self, address: u64) -> Option<MemoryRegion> {
        self.region_of(address).map(|(base, bytes)| MemoryRegion {
            base: *base,
            size: bytes.len() as u64,
        })
    }
}

/// モジュール範囲とラベルの表
#[derive(Default)]
pub struct FakeSymbols {
    modules: Vec<(u64, u64, String)>,
    labels: HashMap<u64, String>,
}

impl FakeSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, base: u64, size: u64, name: &str) -> Self {
        self.modules.push((base, size, name.to_string()));
        self
    }

    pub fn label(mut self, address: u64, name: &str) -> Self {
        self.labels.insert(address, name.to_string());
        self
    }

    fn module_of(&self, address: u64) -> Option<&(u64, u64, String)> {
        self.modules
            .iter()
            .find(|(base, size, _)| address >= *base && address < base + size)
    }
}

impl SymbolSource for FakeSymbols {
    fn resolve(&self, address: u64) -> AddressInfo {
        AddressInfo {
            module: self.module_name_of(address),
            label: self.labels.get(&address).cloned(),
        }
    }

    fn module_name_of(&self, address: u64) -> Option<String> {
        self.module_of(address).map(|(_, _, name)| name.clone())
    }

    fn module_base_of(&self, address: u64) -> Option<u64> {
        self.module_of(address).map(|(base, _, _)| *base)
    }
}

/// NUL終端のASCII文字列を検出する
pub struct FakeStrings {
    memory: Arc<FakeMemory>,
}

impl StringProbe for FakeStrings {
    fn string_at(&self, address: u64) -> Option<String> {
        let mut buf = vec![0u8; 4096];
        let n = self.memory.read(address, &mut buf).ok()?;
        let nul = buf[..n].iter().position(|&b| b == 0)?;
        let text = &buf[..nul];
        if text.len() < 4 || !text.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return None;
        }
        Some(String::from_utf8_lossy(text).into_owned())
    }
}

/// 差し替え可能なハンドラチェーン
#[derive(Default)]
pub struct FakeChain {
    records: Mutex<Option<Vec<u64>>>,
}

impl FakeChain {
    pub fn set(&self, records: Option<Vec<u64>>) {
        *self.records.lock().unwrap() = records;
    }
}

impl HandlerChain for FakeChain {
    fn enumerate(&self) -> Result<Vec<u64>> {
        self.records
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("handler chain unavailable"))
    }
}

/// 呼び出し回数を数えるスレッド
#[derive(Default)]
pub struct FakeThread {
    pub context: ThreadContext,
    pub fail_suspend: bool,
    pub fail_context: bool,
    pub suspends: AtomicUsize,
    pub resumes: AtomicUsize,
}

impl FakeThread {
    pub fn with_context(context: ThreadContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl ThreadControl for FakeThread {
    fn suspend(&self) -> Result<()> {
        if self.fail_suspend {
            return Err(anyhow::anyhow!("suspend failed"));
        }
        self.suspends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn context(&self) -> Result<ThreadContext> {
        if self.fail_context {
            return Err(anyhow::anyhow!("context unavailable"));
        }
        Ok(self.context)
    }
}

/// 同じpcを報告し続けるアンワインダ
pub struct RepeatingUnwinder {
    pub pc: u64,
}

impl FrameUnwinder for RepeatingUnwinder {
    fn step(
        &self,
        frame: &mut UnwindFrame,
        _context: &mut ThreadContext,
        _callbacks: &dyn UnwindCallbacks,
    ) -> bool {
        frame.pc = self.pc;
        frame.return_address = self.pc;
        frame.depth += 1;
        true
    }
}

/// 組み立て済みのテスト環境
pub struct Fixture {
    pub memory: Arc<FakeMemory>,
    pub chain: Arc<FakeChain>,
    pub thread: Arc<FakeThread>,
    pub session: StackSession,
}

pub fn fixture(
    memory: FakeMemory,
    symbols: FakeSymbols,
    thread: FakeThread,
    unwinder: Option<Arc<dyn FrameUnwinder>>,
) -> Fixture {
    let memory = Arc::new(memory);
    let chain = Arc::new(FakeChain::default());
    let thread = Arc::new(thread);
    let collaborators = Collaborators {
        memory: memory.clone(),
        symbols: Arc::new(symbols),
        strings: Arc::new(FakeStrings {
            memory: memory.clone(),
        }),
        handlers: chain.clone(),
        thread: thread.clone(),
        decoder: Arc::new(CapstoneDecoder::new()),
        unwinder: unwinder.unwrap_or_else(|| Arc::new(FramePointerUnwinder::new())),
    };
    Fixture {
        memory,
        chain,
        thread,
        session: StackSession::new(collaborators, StackConfig::default()),
    }
}
