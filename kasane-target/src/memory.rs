//! メモリアクセス機能

use crate::maps::{read_mappings, MemoryMapping};
use crate::Result;
use kasane_core::{MemoryRegion, TargetMemory};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// メモリアクセス
///
/// メモリマッピングは最初に必要になったときに読み取り、
/// [`Memory::refresh_mappings`] を呼ぶまで使い回します。
pub struct Memory {
    pid: Pid,
    mappings: RwLock<Option<Vec<MemoryMapping>>>,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
            mappings: RwLock::new(None),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// `size` バイトすべてを読めなかった場合はエラーになります。
    pub fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let n = self.read_partial(addr, &mut buffer)?;
        if n != size {
            return Err(anyhow::anyhow!(
                "Short read at 0x{:x}: {} of {} bytes",
                addr,
                n,
                size
            ));
        }
        Ok(buffer)
    }

    /// メモリからデータを読み取り、実際に読めたバイト数を返す
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// 1バイトも読めなかった場合はPTRACE_PEEKDATAにフォールバックします。
    pub fn read_partial(&self, addr: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self.read_via_proc_mem(addr, buf) {
            Ok(n) if n > 0 => Ok(n),
            Ok(_) => self.read_via_ptrace(addr, buf),
            Err(e) => {
                debug!("read via /proc/{}/mem failed at 0x{:x}: {}", self.pid, addr, e);
                self.read_via_ptrace(addr, buf)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: u64, buf: &mut [u8]) -> Result<usize> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        // 指定されたアドレスにシーク
        file.seek(SeekFrom::Start(addr))?;

        // 読めるところまで読み取る
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if total == 0 => return Err(e.into()),
                Err(_) => break,
            }
        }
        Ok(total)
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    /// 読めなくなったワードの手前までを返します。
    fn read_via_ptrace(&self, addr: u64, buf: &mut [u8]) -> Result<usize> {
        use nix::sys::ptrace;

        let word_size = std::mem::size_of::<usize>();
        let mut total = 0;

        // word単位で読み取り
        while total < buf.len() {
            let word_addr = addr.wrapping_add(total as u64) as *mut std::ffi::c_void;
            let word = match ptrace::read(self.pid, word_addr) {
                Ok(word) => word,
                Err(e) if total == 0 => {
                    return Err(anyhow::anyhow!(
                        "Failed to read via ptrace at 0x{:x}: {}",
                        addr,
                        e
                    ))
                }
                Err(_) => break,
            };

            // wordをバイト列に変換
            let bytes = word.to_ne_bytes();
            let copy_size = (buf.len() - total).min(word_size);
            buf[total..total + copy_size].copy_from_slice(&bytes[..copy_size]);
            total += copy_size;
        }

        Ok(total)
    }

    /// u64値を読み取る（リトルエンディアン）
    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Failed to convert bytes to u64 array"))?;
        Ok(u64::from_le_bytes(array))
    }

    /// メモリマッピングを読み直す
    pub fn refresh_mappings(&self) -> Result<()> {
        let mappings = read_mappings(self.pid.as_raw())?;
        *self.mappings.write().unwrap_or_else(PoisonError::into_inner) = Some(mappings);
        Ok(())
    }

    /// メモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        if let Some(mappings) = self
            .mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(mappings.clone());
        }
        self.refresh_mappings()?;
        Ok(self
            .mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default())
    }

    /// アドレスを含むマッピングを取得する
    pub fn mapping_of(&self, addr: u64) -> Option<MemoryMapping> {
        self.get_mappings()
            .ok()?
            .into_iter()
            .find(|m| m.contains(addr))
    }
}

impl TargetMemory for Memory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        self.read_partial(address, buf)
    }

    fn is_readable(&self, address: u64) -> bool {
        self.mapping_of(address).is_some_and(|m| m.readable)
    }

    fn find_region(&self, address: u64) -> Option<MemoryRegion> {
        self.mapping_of(address).map(|m| MemoryRegion {
            base: m.start,
            size: m.end - m.start,
        })
    }
}
