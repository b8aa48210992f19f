//! スレッド管理機能

use crate::registers::Registers;
use crate::Result;
use kasane_core::{ThreadContext, ThreadControl};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// スレッドID
pub type ThreadId = i32;

/// ptraceでトレース中のスレッド
///
/// すでにトレース停止状態のスレッドに対しては、停止・再開の操作は何もしません。
/// 実行中のスレッドはSIGSTOPで停止させ、このハンドルが停止させた場合に限り再開します。
pub struct ThreadHandle {
    pid: i32,
    tid: ThreadId,
    registers: Registers,
    suspended_by_us: AtomicBool,
}

impl ThreadHandle {
    /// スレッドハンドルを作成する
    pub fn new(pid: i32, tid: ThreadId) -> Self {
        Self {
            pid,
            tid,
            registers: Registers::new(tid),
            suspended_by_us: AtomicBool::new(false),
        }
    }

    /// スレッドIDを取得する
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// /proc/pid/task/tid/stat からスレッドの状態文字を読み取る
    pub fn state(&self) -> Result<char> {
        let stat_path = format!("/proc/{}/task/{}/stat", self.pid, self.tid);
        let stat = std::fs::read_to_string(&stat_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", stat_path, e))?;
        parse_stat_state(&stat)
            .ok_or_else(|| anyhow::anyhow!("Malformed stat line for thread {}", self.tid))
    }
}

/// stat の行から状態文字を取り出す
///
/// コマンド名に空白や括弧が含まれることがあるため、最後の ')' の後ろを見ます。
fn parse_stat_state(stat: &str) -> Option<char> {
    let close = stat.rfind(')')?;
    stat[close + 1..].trim_start().chars().next()
}

impl ThreadControl for ThreadHandle {
    fn suspend(&self) -> Result<()> {
        let state = self.state()?;
        if matches!(state, 't' | 'T') {
            // すでに停止している
            return Ok(());
        }

        let ret = unsafe {
            nix::libc::syscall(
                nix::libc::SYS_tgkill,
                self.pid,
                self.tid,
                nix::libc::SIGSTOP,
            )
        };
        if ret != 0 {
            return Err(anyhow::anyhow!(
                "tgkill({}, {}) failed: {}",
                self.pid,
                self.tid,
                std::io::Error::last_os_error()
            ));
        }

        match waitpid(Pid::from_raw(self.tid), Some(WaitPidFlag::__WALL))? {
            WaitStatus::Stopped(_, _) => {
                self.suspended_by_us.store(true, Ordering::SeqCst);
                debug!("thread {} suspended", self.tid);
                Ok(())
            }
            status => Err(anyhow::anyhow!(
                "Unexpected wait status while suspending thread {}: {:?}",
                self.tid,
                status
            )),
        }
    }

    fn resume(&self) -> Result<()> {
        if self.suspended_by_us.swap(false, Ordering::SeqCst) {
            // 停止させたSIGSTOPは配送せずに再開する
            nix::sys::ptrace::cont(Pid::from_raw(self.tid), None)?;
            debug!("thread {} resumed", self.tid);
        }
        Ok(())
    }

    fn context(&self) -> Result<ThreadContext> {
        self.registers.context()
    }
}
