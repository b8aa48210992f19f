//! REPLコマンド

/// スタックダンプで表示するスロット数の既定値
pub const DEFAULT_STACK_SLOTS: usize = 16;

/// REPLコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// スタックスロットをコメント付きで表示
    Stack(usize),
    /// コールスタック表示（`fresh` が真ならウォークし直す）
    CallStack { fresh: bool },
    /// SEHチェーンを再構築して表示
    Seh,
    /// 指定スロットのコメント表示
    Comment(String),
    /// アドレスの表示名
    Symbol(String),
    /// 実行継続
    Continue,
    /// キャッシュの破棄
    Reset,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let (&name, args) = parts.split_first()?;

        match name {
            "stack" | "st" => match args.first() {
                Some(count) => count.parse().ok().map(Command::Stack),
                None => Some(Command::Stack(DEFAULT_STACK_SLOTS)),
            },
            "callstack" | "cs" => match args.first() {
                Some(&"fresh") | Some(&"f") => Some(Command::CallStack { fresh: true }),
                Some(_) => None,
                None => Some(Command::CallStack { fresh: false }),
            },
            "csf" => Some(Command::CallStack { fresh: true }),
            "seh" => Some(Command::Seh),
            "comment" => args.first().map(|a| Command::Comment(a.to_string())),
            "sym" => args.first().map(|a| Command::Symbol(a.to_string())),
            "continue" | "c" => Some(Command::Continue),
            "reset" => Some(Command::Reset),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}
