/// n-gram エンジンの語彙 ID。
pub type WordIndex = u32;

/// 語彙に無い単語の ID。`<unk>` は常に 0 番。
pub const UNKNOWN_WORD_INDEX: WordIndex = 0;

pub const START_TOKEN: &str = "<s>";
pub const UNK_TOKEN: &str = "<unk>";
pub const END_TOKEN: &str = "</s>";

/// n-gram エンジンの文脈状態。直前の単語 ID を古い順に保持する。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LmState {
    words: Vec<WordIndex>,
}

impl LmState {
    pub fn words(&self) -> &[WordIndex] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn set_words(&mut self, words: &[WordIndex]) {
        self.words.clear();
        self.words.extend_from_slice(words);
    }
}

/**
 * 条件付き確率を返す n-gram エンジン。
 *
 * スコアは log10 確率。スコアラは文脈状態を受け渡しながら `base_score` を呼ぶだけで、
 * バックオフ等の中身には関与しない。
 */
pub trait NgramLM: Send + Sync {
    fn order(&self) -> usize;

    /// 文頭 (`<s>`) の文脈を書き込む。
    fn begin_sentence_write(&self, state: &mut LmState);

    /// 空の文脈を書き込む。
    fn null_context_write(&self, state: &mut LmState);

    /// `in_state` の文脈で `word` の log10 条件付き確率を返し、次の文脈を `out_state` に書く。
    fn base_score(&self, in_state: &LmState, word: WordIndex, out_state: &mut LmState) -> f32;

    /// 語彙に無ければ `UNKNOWN_WORD_INDEX`。
    fn index(&self, word: &str) -> WordIndex;

    fn end_sentence(&self) -> WordIndex;

    /// LM ファイル中でモデル本体が終わるバイト位置。スコアラパッケージはここから始まる。
    fn end_of_search_offset(&self) -> u64;
}
