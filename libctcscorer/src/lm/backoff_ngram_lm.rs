use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::lm::base::{
    LmState, NgramLM, WordIndex, END_TOKEN, START_TOKEN, UNKNOWN_WORD_INDEX, UNK_TOKEN,
};

/*
   magic           # 8 bytes: "ctcngram"
   format version  # u32 LE
   payload length  # u64 LE
   payload         # bincode(ModelData)
*/

const MAGIC: &[u8; 8] = b"ctcngram";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8 + 4 + 8;

/// `<unk>` のエントリが無いモデルで未知語に与える log10 確率。
const DEFAULT_UNKNOWN_PROB: f32 = -100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NgramWeights {
    /// log10 P(w | h)
    pub prob: f32,
    /// log10 バックオフ重み
    pub backoff: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelData {
    order: u32,
    vocab: Vec<String>,
    ngrams: FxHashMap<Vec<WordIndex>, NgramWeights>,
}

/**
 * バックオフ n-gram 言語モデルのビルダー。
 * `<unk>` は常に 0 番として登録される。
 */
pub struct BackoffNgramLMBuilder {
    data: ModelData,
    word_index: FxHashMap<String, WordIndex>,
}

impl Default for BackoffNgramLMBuilder {
    fn default() -> Self {
        let mut builder = Self {
            data: ModelData {
                order: 0,
                vocab: Vec::new(),
                ngrams: FxHashMap::default(),
            },
            word_index: FxHashMap::default(),
        };
        builder.intern(UNK_TOKEN);
        builder
    }
}

impl BackoffNgramLMBuilder {
    fn intern(&mut self, word: &str) -> WordIndex {
        if let Some(id) = self.word_index.get(word) {
            return *id;
        }
        let id = self.data.vocab.len() as WordIndex;
        self.data.vocab.push(word.to_string());
        self.word_index.insert(word.to_string(), id);
        id
    }

    /// n-gram を追加する。words は古い順。
    pub fn add(&mut self, words: &[&str], prob: f32, backoff: f32) -> &mut Self {
        assert!(!words.is_empty(), "n-gram shouldn't be empty");

        let key: Vec<WordIndex> = words.iter().map(|w| self.intern(w)).collect();
        self.data.order = self.data.order.max(key.len() as u32);
        self.data.ngrams.insert(key, NgramWeights { prob, backoff });
        self
    }

    pub fn num_ngrams(&self) -> usize {
        self.data.ngrams.len()
    }

    pub fn build(&self) -> Result<BackoffNgramLM> {
        let payload_len = bincode::serialized_size(&self.data)?;
        BackoffNgramLM::from_data(self.data.clone(), HEADER_LEN + payload_len)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(
            "Writing n-gram LM: {} (order={}, ngrams={})",
            path.display(),
            self.data.order,
            self.data.ngrams.len()
        );
        let payload = bincode::serialize(&self.data)?;

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }
}

/**
 * Katz 形式のバックオフ n-gram 言語モデル。
 *
 * p(w|h) = P(h, w)                     (h, w) がモデルにある場合
 *        = backoff(h) + p(w | h[1:])   それ以外
 */
pub struct BackoffNgramLM {
    order: usize,
    vocab: Vec<String>,
    word_index: FxHashMap<String, WordIndex>,
    ngrams: FxHashMap<Vec<WordIndex>, NgramWeights>,
    begin_sentence: WordIndex,
    end_sentence: WordIndex,
    unknown_prob: f32,
    end_of_search_offset: u64,
}

impl BackoffNgramLM {
    fn from_data(data: ModelData, end_of_search_offset: u64) -> Result<BackoffNgramLM> {
        if data.order == 0 {
            bail!("Language model has no n-grams");
        }
        if data.vocab.first().map(String::as_str) != Some(UNK_TOKEN) {
            bail!("{} must be the first word of the vocabulary", UNK_TOKEN);
        }

        let word_index: FxHashMap<String, WordIndex> = data
            .vocab
            .iter()
            .enumerate()
            .map(|(id, word)| (word.clone(), id as WordIndex))
            .collect();
        let Some(begin_sentence) = word_index.get(START_TOKEN).copied() else {
            bail!("Missing {} in language model vocabulary", START_TOKEN);
        };
        let Some(end_sentence) = word_index.get(END_TOKEN).copied() else {
            bail!("Missing {} in language model vocabulary", END_TOKEN);
        };
        let unknown_prob = data
            .ngrams
            .get([UNKNOWN_WORD_INDEX].as_slice())
            .map(|w| w.prob)
            .unwrap_or(DEFAULT_UNKNOWN_PROB);

        Ok(BackoffNgramLM {
            order: data.order as usize,
            vocab: data.vocab,
            word_index,
            ngrams: data.ngrams,
            begin_sentence,
            end_sentence,
            unknown_prob,
            end_of_search_offset,
        })
    }

    /// ファイル先頭がこの形式の LM かどうかを調べる。
    pub fn recognize<P: AsRef<Path>>(path: P) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut magic = [0_u8; 8];
        file.read_exact(&mut magic).is_ok() && &magic == MAGIC
    }

    /// LM を読み込む。ファイルの後ろに付いているスコアラパッケージは読まない。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BackoffNgramLM> {
        let path = path.as_ref();
        info!("Loading n-gram LM: {}", path.display());
        let mut reader = BufReader::new(
            File::open(path).with_context(|| format!("Cannot open {}", path.display()))?,
        );

        let mut magic = [0_u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("Not a n-gram LM file: {}", path.display());
        }
        let mut buf4 = [0_u8; 4];
        reader.read_exact(&mut buf4)?;
        let version = u32::from_le_bytes(buf4);
        if version != FORMAT_VERSION {
            bail!(
                "Unsupported n-gram LM format version {} (expected {})",
                version,
                FORMAT_VERSION
            );
        }
        let mut buf8 = [0_u8; 8];
        reader.read_exact(&mut buf8)?;
        let payload_len = u64::from_le_bytes(buf8);

        let mut payload = Vec::new();
        reader.by_ref().take(payload_len).read_to_end(&mut payload)?;
        if payload.len() as u64 != payload_len {
            bail!(
                "Truncated n-gram LM: expected {} bytes of payload, got {}",
                payload_len,
                payload.len()
            );
        }
        let data: ModelData = bincode::deserialize(&payload)?;
        let lm = Self::from_data(data, HEADER_LEN + payload_len)?;
        debug!(
            "  order={} vocab={} ngrams={} end_of_search={}",
            lm.order,
            lm.vocab.len(),
            lm.ngrams.len(),
            lm.end_of_search_offset
        );
        Ok(lm)
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocab
    }

    pub fn num_ngrams(&self) -> usize {
        self.ngrams.len()
    }

    pub fn weights(&self, words: &[WordIndex]) -> Option<NgramWeights> {
        self.ngrams.get(words).copied()
    }
}

impl NgramLM for BackoffNgramLM {
    fn order(&self) -> usize {
        self.order
    }

    fn begin_sentence_write(&self, state: &mut LmState) {
        state.set_words(&[self.begin_sentence]);
    }

    fn null_context_write(&self, state: &mut LmState) {
        state.set_words(&[]);
    }

    fn base_score(&self, in_state: &LmState, word: WordIndex, out_state: &mut LmState) -> f32 {
        let context = in_state.words();
        let mut key: Vec<WordIndex> = Vec::with_capacity(context.len() + 1);

        // 長い文脈から順に探し、見つからなければ文脈のバックオフ重みを足して短くする
        let mut backoff = 0_f32;
        let mut prob = None;
        for start in 0..=context.len() {
            key.clear();
            key.extend_from_slice(&context[start..]);
            key.push(word);
            if let Some(weights) = self.ngrams.get(&key) {
                prob = Some(weights.prob);
                break;
            }
            if start < context.len() {
                if let Some(weights) = self.ngrams.get(&context[start..]) {
                    backoff += weights.backoff;
                }
            }
        }
        let score = backoff + prob.unwrap_or(self.unknown_prob);

        // 次の文脈は (h, w) の末尾 order-1 語のうち、モデルに存在する最長の接尾辞
        key.clear();
        key.extend_from_slice(context);
        key.push(word);
        let max_len = self.order.saturating_sub(1);
        let mut start = key.len().saturating_sub(max_len);
        while start < key.len() && !self.ngrams.contains_key(&key[start..]) {
            start += 1;
        }
        out_state.set_words(&key[start..]);

        score
    }

    fn index(&self, word: &str) -> WordIndex {
        self.word_index
            .get(word)
            .copied()
            .unwrap_or(UNKNOWN_WORD_INDEX)
    }

    fn end_sentence(&self) -> WordIndex {
        self.end_sentence
    }

    fn end_of_search_offset(&self) -> u64 {
        self.end_of_search_offset
    }
}
