//! プロセス制御機能

use crate::thread::ThreadId;
use crate::Result;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// ブレークポイントまたはトラップ（SIGTRAP）
    Trap,
    /// シグナル受信
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// その他の停止
    Other,
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: Pid,
    /// アタッチしたスレッド（メインスレッドを含む）
    threads: Vec<Pid>,
}

impl Process {
    /// 既存のプロセスにアタッチし、停止するまで待機する
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid)?;
        wait_for_stop(pid)?;
        Ok(Self {
            pid,
            threads: vec![pid],
        })
    }

    /// 同じプロセスの別スレッドにアタッチする
    pub fn attach_thread(&mut self, tid: ThreadId) -> Result<()> {
        let tid = Pid::from_raw(tid);
        if self.threads.contains(&tid) {
            return Ok(());
        }
        ptrace::attach(tid)?;
        wait_for_stop(tid)?;
        self.threads.push(tid);
        Ok(())
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスを実行継続して停止イベントを待機する
    pub fn continue_and_wait(&self) -> Result<StopReason> {
        for &tid in &self.threads {
            ptrace::cont(tid, None)?;
        }

        // 停止イベントを待機
        let status = waitpid(self.pid, Some(WaitPidFlag::__WALL))?;

        let reason = match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => StopReason::Trap,
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Signal(signal),
            _ => StopReason::Other,
        };

        // 他のスレッドも停止させる
        if !matches!(reason, StopReason::Exited(_)) {
            for &tid in self.threads.iter().filter(|&&tid| tid != self.pid) {
                nix::sys::signal::kill(tid, Signal::SIGSTOP)?;
                wait_for_stop(tid)?;
            }
        }

        Ok(reason)
    }
}

/// スレッドが停止するまで待機する
fn wait_for_stop(tid: Pid) -> Result<()> {
    match waitpid(tid, Some(WaitPidFlag::__WALL))? {
        WaitStatus::Stopped(_, _) => Ok(()),
        status => Err(anyhow::anyhow!(
            "Unexpected wait status for {}: {:?}",
            tid,
            status
        )),
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        for &tid in &self.threads {
            let _ = ptrace::detach(tid, None);
        }
    }
}
