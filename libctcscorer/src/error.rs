use std::io;

/// スコアラパッケージの読み書きで発生するエラー。
///
/// `load` 時に検出されるものは呼び出し側で初期化を中断させる。
/// 途中まで読み込んだ状態は使えない。
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("cannot read scorer file: {path}")]
    Unreadable {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot recognize language model header in scorer file: {path}")]
    UnrecognizedFormat { path: String },
    #[error("reached end of scorer file before loading dictionary trie (file size {file_size}, lm ends at {lm_end})")]
    MissingDictionary { file_size: u64, lm_end: u64 },
    #[error("can't parse scorer file, invalid header (magic {found:#010x}). Try updating your scorer file.")]
    InvalidMagic { found: i32 },
    #[error("scorer file version mismatch ({found} instead of expected {expected}). Update your scorer file.")]
    VersionTooOld { found: i32, expected: i32 },
    #[error("scorer file version mismatch ({found} instead of expected {expected}). Downgrade your scorer file or update your version of libctcscorer.")]
    VersionTooNew { found: i32, expected: i32 },
    #[error("no dictionary to save, call fill_dictionary first")]
    EmptyDictionary,
    #[error("invalid dictionary automaton: {0}")]
    Automaton(anyhow::Error),
    #[error("invalid language model: {0}")]
    LanguageModel(anyhow::Error),
    #[error("invalid alphabet: {0}")]
    Alphabet(anyhow::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ScorerError {
    /// デコーダの外側 API に返す数値エラーコード。
    pub fn code(&self) -> i32 {
        match self {
            ScorerError::Unreadable { .. } => 0x2004,
            ScorerError::UnrecognizedFormat { .. } => 0x2005,
            ScorerError::MissingDictionary { .. } => 0x2006,
            ScorerError::InvalidMagic { .. } => 0x2007,
            ScorerError::VersionTooOld { .. } | ScorerError::VersionTooNew { .. } => 0x2008,
            _ => 0x2002,
        }
    }
}
