use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::alphabet::{Alphabet, Label};
use crate::dictionary::{DictionaryAutomaton, DictionaryBuilder, LABEL_OFFSET};
use crate::error::ScorerError;
use crate::lm::base::{LmState, NgramLM, END_TOKEN, START_TOKEN, UNKNOWN_WORD_INDEX, UNK_TOKEN};
use crate::package;
use crate::path_trie::{NodeId, PathTrie};

/// 語彙外の単語を含む n-gram に与えるスコア。
pub const OOV_SCORE: f64 = -1000.0;

/// log10(e)。LM の log10 スコアを自然対数に直すときの除数。
pub const NUM_FLT_LOGE: f64 = 0.4342944819;

/**
 * ビームサーチから呼ばれる言語モデルスコアラ。
 *
 * LM エンジンと辞書は Arc で共有しているので、ビームごとに clone しても
 * 読み取り専用のまま同じものを参照する。
 */
#[derive(Clone)]
pub struct Scorer {
    alpha: f64,
    beta: f64,
    utf8_mode: bool,
    max_order: usize,
    alphabet: Alphabet,
    /// スコア単位 -> FST ラベル (ラベル + 1)
    char_map: FxHashMap<Vec<u8>, Label>,
    space_id: Label,
    language_model: Arc<dyn NgramLM>,
    dictionary: Option<Arc<DictionaryAutomaton>>,
}

impl Scorer {
    pub fn new(language_model: Arc<dyn NgramLM>, alphabet: Alphabet, utf8_mode: bool) -> Scorer {
        let max_order = language_model.order();
        let mut scorer = Scorer {
            alpha: 0.0,
            beta: 0.0,
            utf8_mode,
            max_order,
            space_id: alphabet.space_label(),
            alphabet,
            char_map: FxHashMap::default(),
            language_model,
            dictionary: None,
        };
        scorer.setup_char_map();
        scorer
    }

    /**
     * スコアラパッケージ (LM + 辞書 + ハイパーパラメータ) を読み込む。
     *
     * UTF-8 モードのパッケージは辞書がバイトラベルで作られているので、
     * 渡された alphabet に関係なくバイト alphabet を使う。
     */
    pub fn init<P: AsRef<Path>>(path: P, alphabet: Alphabet) -> Result<Scorer, ScorerError> {
        let package = package::read_package(path.as_ref())?;
        let alphabet = if package.header.utf8_mode && !alphabet.is_utf8_bytes() {
            info!("Scorer is in UTF-8 mode, using the byte alphabet");
            Alphabet::utf8()
        } else {
            if !package.header.utf8_mode && alphabet.is_utf8_bytes() {
                warn!("Scorer is in word mode but the alphabet is a byte alphabet");
            }
            alphabet
        };

        let mut scorer = Scorer::new(
            Arc::new(package.language_model),
            alphabet,
            package.header.utf8_mode,
        );
        scorer.reset_params(package.header.alpha, package.header.beta);
        scorer.dictionary = Some(Arc::new(package.dictionary));
        Ok(scorer)
    }

    pub fn init_with_alphabet_config<P: AsRef<Path>, Q: AsRef<Path>>(
        path: P,
        alphabet_config_path: Q,
    ) -> Result<Scorer, ScorerError> {
        let alphabet =
            Alphabet::from_config_file(alphabet_config_path).map_err(ScorerError::Alphabet)?;
        Self::init(path, alphabet)
    }

    pub fn set_alphabet(&mut self, alphabet: Alphabet) {
        self.alphabet = alphabet;
        self.setup_char_map();
    }

    fn setup_char_map(&mut self) {
        self.char_map.clear();
        self.space_id = self.alphabet.space_label();

        // FST の初期状態は 0 なので、ラベルは 1 から振る
        for label in 0..self.alphabet.size() as Label {
            self.char_map.insert(
                self.alphabet.string_from_label(label).to_vec(),
                label + LABEL_OFFSET,
            );
        }
    }

    pub fn reset_params(&mut self, alpha: f64, beta: f64) {
        self.alpha = alpha;
        self.beta = beta;
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn is_utf8_mode(&self) -> bool {
        self.utf8_mode
    }

    pub fn set_utf8_mode(&mut self, utf8_mode: bool) {
        self.utf8_mode = utf8_mode;
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn language_model(&self) -> &dyn NgramLM {
        self.language_model.as_ref()
    }

    pub fn dictionary(&self) -> Option<&DictionaryAutomaton> {
        self.dictionary.as_deref()
    }

    /**
     * `prefix` の位置でスコア単位が完結したかどうか。
     *
     * UTF-8 モードではコードポイントが閉じた位置、単語モードではスペースが来た位置。
     *
     * # Panics
     * UTF-8 の先頭バイトとしてありえないバイトに当たった場合。
     */
    pub fn is_scoring_boundary(&self, trie: &PathTrie, prefix: NodeId, new_label: Label) -> bool {
        if !self.utf8_mode {
            return new_label == self.space_id;
        }
        if trie.is_root(prefix) {
            return false;
        }

        let (distance, first_byte) = trie.distance_to_codepoint_boundary(prefix, &self.alphabet);
        let needed_bytes = if (first_byte >> 3) == 0x1E {
            4
        } else if (first_byte >> 4) == 0x0E {
            3
        } else if (first_byte >> 5) == 0x06 {
            2
        } else if (first_byte >> 7) == 0x00 {
            1
        } else {
            panic!("Invalid UTF-8 leading byte {first_byte:#04x}: disallowed by vocabulary/trie");
        };
        distance == needed_bytes
    }

    /// `prefix` から後ろ向きにたどり、直近 max_order 個のスコア単位を古い順に返す。
    pub fn make_ngram(&self, trie: &PathTrie, prefix: NodeId) -> Vec<String> {
        let mut ngram = Vec::with_capacity(self.max_order);
        let mut current = Some(prefix);

        for _ in 0..self.max_order {
            let Some(node) = current else {
                break;
            };
            if trie.is_root(node) {
                break;
            }

            let mut labels: Vec<Label> = Vec::new();
            let stop = if self.utf8_mode {
                trie.get_prev_grapheme(node, &self.alphabet, &mut labels)
            } else {
                trie.get_prev_word(node, self.space_id, &mut labels)
            };
            current = trie.parent(stop);

            ngram.push(self.alphabet.labels_to_string(&labels));
        }
        ngram.reverse();
        ngram
    }

    /**
     * words (古い順) の最後の単語の条件付き対数確率 (自然対数) を返す。
     *
     * bos なら文頭文脈から始め、eos なら最後に `</s>` のスコアを取る。
     * 語彙外の単語が 1 つでもあれば OOV_SCORE を返す。
     */
    pub fn get_log_cond_prob<S: AsRef<str>>(&self, words: &[S], bos: bool, eos: bool) -> f64 {
        let lm = self.language_model.as_ref();
        let mut state_a = LmState::default();
        let mut state_b = LmState::default();
        let mut in_state = &mut state_a;
        let mut out_state = &mut state_b;

        if bos {
            lm.begin_sentence_write(in_state);
        } else {
            lm.null_context_write(in_state);
        }

        let mut cond_prob = 0.0_f64;
        for word in words {
            let word_index = lm.index(word.as_ref());
            if word_index == UNKNOWN_WORD_INDEX {
                return OOV_SCORE;
            }
            cond_prob = lm.base_score(in_state, word_index, out_state) as f64;
            std::mem::swap(&mut in_state, &mut out_state);
        }

        if eos {
            cond_prob = lm.base_score(in_state, lm.end_sentence(), out_state) as f64;
        }

        cond_prob / NUM_FLT_LOGE
    }

    /**
     * 文全体の LM スコアを max_order 幅の窓の和として計算する。
     *
     * max_order = 3 で "there once was an" なら
     *   there            | <s>
     *   there once       | <s>
     *   there once was
     *   once  was  an
     *   was   an   </s>
     * の和。ビームの累積スコアから LM 分を差し引いて信頼度を出すのに使う。
     * 窓ごとのスコアは変換済みだが、合計をもう一度 NUM_FLT_LOGE で割る。
     */
    pub fn get_sent_log_prob<S: AsRef<str>>(&self, words: &[S]) -> f64 {
        let sent_len = words.len();

        let mut score = 0.0;
        let mut win_start = 0;
        for win_end in 1..=sent_len + 1 {
            let win_size = win_end - win_start;
            let bos = win_size < self.max_order;
            let eos = win_end == sent_len + 1;

            // eos の窓は words の末尾を 1 つ越えるので、範囲を 1 つ手前で止める
            let end = if eos { win_end - 1 } else { win_end };
            score += self.get_log_cond_prob(&words[win_start..end], bos, eos);

            // 窓が max_order に達してから開始位置をずらす
            if win_size == self.max_order {
                win_start += 1;
            }
        }

        score / NUM_FLT_LOGE
    }

    /// ラベル列をスコア単位 (コードポイント or 単語) に分割する。
    pub fn split_labels_into_scored_units(&self, labels: &[Label]) -> Vec<String> {
        if labels.is_empty() {
            return Vec::new();
        }

        let s = self.alphabet.labels_to_string(labels);
        if self.utf8_mode {
            s.chars().map(|c| c.to_string()).collect()
        } else {
            s.split(' ')
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect()
        }
    }

    /// 単語を FST ラベル列にする。alphabet に無い単位を含む単語は None。
    fn word_to_fst_labels(&self, word: &str) -> Option<Vec<Label>> {
        if word.is_empty() {
            return None;
        }

        let mut labels = Vec::with_capacity(word.len() + 1);
        if self.utf8_mode {
            for b in word.as_bytes() {
                labels.push(*self.char_map.get(std::slice::from_ref(b))?);
            }
        } else {
            let mut buf = [0_u8; 4];
            for c in word.chars() {
                labels.push(*self.char_map.get(c.encode_utf8(&mut buf).as_bytes())?);
            }
            // 単語モードでは単語の終わりにスペースを置く
            labels.push(self.space_id + LABEL_OFFSET);
        }
        Some(labels)
    }

    /// 語彙から辞書 FST を作り直す。`<s>`, `<unk>`, `</s>` は登録しない。
    pub fn fill_dictionary<S: AsRef<str>>(&mut self, vocabulary: &[S]) -> Result<(), ScorerError> {
        let mut builder = DictionaryBuilder::default();
        let mut skipped = 0_usize;

        for word in vocabulary {
            let word = word.as_ref();
            if word == START_TOKEN || word == UNK_TOKEN || word == END_TOKEN {
                continue;
            }
            match self.word_to_fst_labels(word) {
                Some(labels) => builder.add_word(&labels).map_err(ScorerError::Automaton)?,
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                "Skipped {} words which contain units outside the alphabet",
                skipped
            );
        }

        info!("Building dictionary from {} words", builder.num_words());
        let dictionary = builder.build().map_err(ScorerError::Automaton)?;
        info!("Dictionary has {} states", dictionary.num_states());
        self.dictionary = Some(Arc::new(dictionary));
        Ok(())
    }

    /// ヘッダと辞書を書き出す。append なら既存ファイル (LM) の末尾に追記する。
    pub fn save_dictionary<P: AsRef<Path>>(&self, path: P, append: bool) -> Result<(), ScorerError> {
        package::save_dictionary(self, path.as_ref(), append)
    }
}
