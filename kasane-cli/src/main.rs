//! Kasane CLI - コマンドラインインターフェース
//!
//! 停止中のプロセスのスタックを注釈付きで表示するREPL

mod command;
mod parse;

use anyhow::Result;
use clap::{Parser, Subcommand};
use command::Command;
use kasane_core::config::{DEFAULT_CALLSTACK_CACHE_CAPACITY, DEFAULT_MAX_FRAMES};
use kasane_core::{
    CapstoneDecoder, Collaborators, FramePointerUnwinder, HandlerChain, StackConfig,
    StackSession, WORD_SIZE,
};
use kasane_symbols::ModuleMap;
use kasane_target::{LinkedRecordChain, Memory, Process, StopReason, TextScanner, ThreadHandle};
use parse::parse_address;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Kasane - Stack Annotation Debugger
#[derive(Parser)]
#[command(name = "kasane")]
#[command(version = "0.1.0")]
#[command(about = "Call stack and stack slot annotation for stopped processes", long_about = None)]
struct Cli {
    /// Log level for kasane crates (overridden by RUST_LOG)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Attach to an existing process
    Attach {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,

        /// Thread to inspect (defaults to the main thread)
        #[arg(short, long)]
        tid: Option<i32>,

        /// Address of the slot holding the first exception registration record
        #[arg(long, value_parser = parse_address)]
        seh_head: Option<u64>,

        /// Maximum number of frames per call stack walk
        #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
        max_frames: usize,

        /// Number of cached call stacks before the cache is flushed
        #[arg(long, default_value_t = DEFAULT_CALLSTACK_CACHE_CAPACITY)]
        cache_capacity: usize,
    },
}

/// アタッチ中のデバッグ対象
struct Target {
    process: Process,
    memory: Arc<Memory>,
    thread: Arc<ThreadHandle>,
    handlers: Arc<LinkedRecordChain>,
    session: StackSession,
}

impl Target {
    /// プロセスにアタッチしてセッションを作成する
    fn attach(
        pid: i32,
        tid: Option<i32>,
        seh_head: Option<u64>,
        config: StackConfig,
    ) -> Result<Self> {
        let mut process = Process::attach(pid)?;
        let tid = tid.unwrap_or(pid);
        process.attach_thread(tid)?;

        let memory = Arc::new(Memory::new(pid));
        let thread = Arc::new(ThreadHandle::new(pid, tid));
        let handlers = Arc::new(LinkedRecordChain::new(memory.clone(), seh_head));
        let session = new_session(&memory, &thread, &handlers, pid, config)?;

        let target = Self {
            process,
            memory,
            thread,
            handlers,
            session,
        };
        target.on_stop()?;
        Ok(target)
    }

    /// 停止イベントごとにマッピングとモジュールを読み直し、キャッシュを作り直す
    fn reload(&mut self) -> Result<()> {
        self.memory.refresh_mappings()?;
        self.session = new_session(
            &self.memory,
            &self.thread,
            &self.handlers,
            self.process.pid(),
            self.session.config().clone(),
        )?;
        self.on_stop()
    }

    fn on_stop(&self) -> Result<()> {
        let sp = self.stack_pointer()?;
        self.session.on_debug_stop(sp);
        Ok(())
    }

    fn stack_pointer(&self) -> Result<u64> {
        self.thread.registers().get_sp()
    }
}

fn new_session(
    memory: &Arc<Memory>,
    thread: &Arc<ThreadHandle>,
    handlers: &Arc<LinkedRecordChain>,
    pid: i32,
    config: StackConfig,
) -> Result<StackSession> {
    let modules = ModuleMap::from_pid(pid)?;
    info!("{} modules mapped in process {}", modules.modules().len(), pid);

    let collaborators = Collaborators {
        memory: memory.clone(),
        symbols: Arc::new(modules),
        strings: Arc::new(TextScanner::new(memory.clone())),
        handlers: handlers.clone(),
        thread: thread.clone(),
        decoder: Arc::new(CapstoneDecoder::new()),
        unwinder: Arc::new(FramePointerUnwinder::new()),
    };
    Ok(StackSession::new(collaborators, config))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            ["kasane_cli", "kasane_core", "kasane_target", "kasane_symbols"]
                .iter()
                .map(|target| format!("{}={}", target, level))
                .collect::<Vec<_>>()
                .join(","),
        )
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    println!("Kasane - Stack Annotation Debugger");
    println!("Version 0.1.0");
    println!();

    let mut target = match cli.command {
        DebugCommand::Attach {
            pid,
            tid,
            seh_head,
            max_frames,
            cache_capacity,
        } => {
            let config = StackConfig {
                max_frames,
                callstack_cache_capacity: cache_capacity,
                ..StackConfig::default()
            };
            println!("Attaching to process: {}", pid);
            let target = Target::attach(pid, tid, seh_head, config)?;
            println!("Attached to thread {}", target.thread.tid());
            println!();
            target
        }
    };

    run_repl(&mut target)
}

/// REPLループを実行する
fn run_repl(target: &mut Target) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(kasane) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match handle_command(target, line) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// コマンドを処理する。終了する場合は `true` を返す
fn handle_command(target: &mut Target, line: &str) -> Result<bool> {
    let Some(command) = Command::parse(line) else {
        println!("Unknown command: {}", line);
        println!("Type 'help' for available commands.");
        return Ok(false);
    };

    match command {
        Command::Stack(count) => handle_stack(target, count)?,
        Command::CallStack { fresh } => handle_callstack(target, fresh)?,
        Command::Seh => handle_seh(target)?,
        Command::Comment(addr) => {
            let addr = parse_address(&addr)?;
            match target.session.resolve_comment(addr) {
                Some(comment) => println!("0x{:016x}  {}", addr, comment),
                None => println!("0x{:016x}  (no comment)", addr),
            }
        }
        Command::Symbol(addr) => {
            let addr = parse_address(&addr)?;
            println!("{}", target.session.format_symbol(addr));
        }
        Command::Continue => return handle_continue(target),
        Command::Reset => {
            target.session.reset();
            println!("Caches cleared");
        }
        Command::Help => print_help(),
        Command::Quit => {
            println!("Goodbye!");
            return Ok(true);
        }
    }

    Ok(false)
}

/// Stackコマンドを処理する
fn handle_stack(target: &Target, count: usize) -> Result<()> {
    let sp = target.stack_pointer()?;

    for i in 0..count as u64 {
        let addr = sp + i * WORD_SIZE;
        let value = match target.memory.read_u64(addr) {
            Ok(value) => format!("{:016x}", value),
            Err(_) => "????????????????".to_string(),
        };
        match target.session.resolve_comment(addr) {
            Some(comment) => {
                let tag = comment.color().token().unwrap_or("");
                println!("{:016x}  {}  {} {}", addr, value, comment, tag);
            }
            None => println!("{:016x}  {}", addr, value),
        }
    }
    Ok(())
}

/// CallStackコマンドを処理する
fn handle_callstack(target: &Target, fresh: bool) -> Result<()> {
    let sp = target.stack_pointer()?;
    let stack = target.session.get_call_stack(sp, !fresh);

    if stack.is_empty() {
        if fresh {
            println!("No frames resolved");
        } else {
            println!("No cached call stack for sp 0x{:x}; use 'callstack fresh'", sp);
        }
        return Ok(());
    }

    println!("Call stack ({} frames):", stack.total());
    for (i, entry) in stack.iter().enumerate() {
        println!(
            "  #{:<2} {:016x}  {:016x}  {:016x}  {}",
            i, entry.address, entry.to, entry.from, entry.comment
        );
    }
    Ok(())
}

/// Sehコマンドを処理する
fn handle_seh(target: &Target) -> Result<()> {
    target.session.refresh_seh_chain();

    let records = target.handlers.enumerate().unwrap_or_default();
    if records.is_empty() {
        println!("No SEH records");
        return Ok(());
    }

    println!("SEH chain ({} records):", records.len());
    for record in records {
        let comment = target
            .session
            .resolve_comment(record)
            .map(|c| c.to_string())
            .unwrap_or_default();
        println!("  {:016x}  {}", record, comment);
    }
    Ok(())
}

/// Continueコマンドを処理する
fn handle_continue(target: &mut Target) -> Result<bool> {
    println!("Continuing execution...");

    let stop_reason = target.process.continue_and_wait()?;
    println!();

    match stop_reason {
        StopReason::Trap => println!("Trace trap"),
        StopReason::Signal(signal) => println!("Received signal: {:?}", signal),
        StopReason::Exited(code) => {
            println!("Process exited with code {}", code);
            return Ok(true);
        }
        StopReason::Other => println!("Process stopped (unknown reason)"),
    }

    let pc = target.thread.registers().get_pc()?;
    println!("Stopped at {}", target.session.format_symbol(pc));
    target.reload()?;
    Ok(false)
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help              - Show this help message");
    println!("  quit/exit/q       - Exit the debugger");
    println!();
    println!("Stack commands:");
    println!("  stack [n]         - Show n stack slots from rsp with comments");
    println!("  callstack (cs)    - Show the cached call stack");
    println!("  callstack fresh   - Walk the call stack again (csf)");
    println!("  seh               - Rebuild and show the SEH chain");
    println!("  comment <addr>    - Show the comment for a stack slot");
    println!("  sym <addr>        - Show the symbol name of an address");
    println!("  reset             - Drop cached call stacks and SEH records");
    println!("  continue (c)      - Continue execution until the next stop");
    println!();
    println!("Addresses are hexadecimal by default (0x1000, 1000, 7ffd`12345678);");
    println!("use the 0n prefix for decimal (0n4096).");
    println!();
    println!("Examples:");
    println!("  stack 32");
    println!("  comment 0x7ffd12345678");
    println!("  sym 0x555555555140");
}
