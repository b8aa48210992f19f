//! スタックコメント

use std::fmt;

/// コメントの最大サイズ（終端文字を含む）
pub const MAX_COMMENT_SIZE: usize = 512;

/// 描画レイヤーが強調表示のスタイルを選ぶためのタグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ColorTag {
    /// 既定のスタイル
    #[default]
    Default,
    /// SEHチェーンのリンク
    SehChain,
    /// 戻りアドレス
    ReturnAddress,
}

impl ColorTag {
    /// 描画レイヤーに渡すトークン（既定のスタイルではなし）
    pub fn token(&self) -> Option<&'static str> {
        match self {
            ColorTag::Default => None,
            ColorTag::SehChain => Some("!sehclr"),
            ColorTag::ReturnAddress => Some("!rtnclr"),
        }
    }
}

/// スタックスロットのコメント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackComment {
    comment: String,
    color: ColorTag,
}

impl StackComment {
    /// 既定の容量でコメントを作成する
    pub fn new(comment: impl Into<String>, color: ColorTag) -> Self {
        Self::with_capacity(comment, color, MAX_COMMENT_SIZE)
    }

    /// 容量を指定してコメントを作成する
    ///
    /// 容量を超える部分は切り捨てられます。
    pub fn with_capacity(comment: impl Into<String>, color: ColorTag, capacity: usize) -> Self {
        Self {
            comment: truncate_to_capacity(comment.into(), capacity),
            color,
        }
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn color(&self) -> ColorTag {
        self.color
    }
}

impl fmt::Display for StackComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.comment)
    }
}

/// 文字列を終端文字込みで `capacity` バイトに収まるよう切り詰める
///
/// NUL文字が含まれる場合はそこで終わりとみなします。
/// 切り詰めはUTF-8の文字境界で行います。
pub fn truncate_to_capacity(mut text: String, capacity: usize) -> String {
    if let Some(nul) = text.find('\0') {
        text.truncate(nul);
    }

    let limit = capacity.saturating_sub(1);
    if text.len() > limit {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
