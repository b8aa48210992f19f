//! レジスタアクセス機能

use crate::Result;
use kasane_core::ThreadContext;
use nix::unistd::Pid;

/// レジスタ情報
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    ///
    /// `tid` にはスレッドIDを指定します。ptraceはスレッド単位で動作します。
    pub fn new(tid: i32) -> Self {
        Self {
            pid: Pid::from_raw(tid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<nix::libc::user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// ウォークに必要なレジスタだけを取り出す
    pub fn context(&self) -> Result<ThreadContext> {
        let regs = self.read()?;
        Ok(ThreadContext {
            instruction_pointer: regs.rip,
            stack_pointer: regs.rsp,
            frame_pointer: regs.rbp,
        })
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        let regs = self.read()?;
        Ok(regs.rip)
    }

    /// スタックポインタ（RSP）を取得する
    pub fn get_sp(&self) -> Result<u64> {
        let regs = self.read()?;
        Ok(regs.rsp)
    }
}
