use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use log::{info, warn};
use rustc_hash::FxHashSet;
use tempfile::NamedTempFile;

use libctcscorer::alphabet::Alphabet;
use libctcscorer::lm::backoff_ngram_lm::BackoffNgramLM;
use libctcscorer::lm::base::NgramLM;
use libctcscorer::scorer::Scorer;

pub struct PackageOptions<'a> {
    pub alphabet: &'a str,
    pub lm: &'a str,
    pub vocab: &'a str,
    pub package: &'a str,
    pub default_alpha: f64,
    pub default_beta: f64,
    /// None なら語彙から UTF-8 モードかどうかを判定する
    pub force_utf8: Option<bool>,
}

/// 語彙ファイルを読む。空白区切りで、重複は最初の出現だけ残す。
fn read_vocabulary(path: &str) -> anyhow::Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Cannot open vocabulary: {path}"))?;

    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut words: Vec<String> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        for word in line.split_whitespace() {
            if seen.insert(word.to_string()) {
                words.push(word.to_string());
            }
        }
    }
    Ok(words)
}

/// すべての語彙が 1 コードポイントなら文字ベースの語彙とみなす。
fn vocab_looks_char_based(words: &[String]) -> bool {
    !words.is_empty() && words.iter().all(|w| w.chars().count() == 1)
}

pub fn package(opts: PackageOptions) -> anyhow::Result<()> {
    info!("package: {} + {} => {}", opts.lm, opts.vocab, opts.package);

    let lm = BackoffNgramLM::load(opts.lm)?;
    let lm_size = fs::metadata(opts.lm)?.len();
    if lm_size > lm.end_of_search_offset() {
        bail!(
            "LM file {} already has a dictionary appended ({} bytes after the model). Use the bare LM file.",
            opts.lm,
            lm_size - lm.end_of_search_offset()
        );
    }

    let words = read_vocabulary(opts.vocab)?;
    info!("{} unique words read from vocabulary file", words.len());

    let utf8_mode = match opts.force_utf8 {
        Some(forced) => forced,
        None => {
            let detected = vocab_looks_char_based(&words);
            if detected {
                info!("Looks like a character based (bytes output) model");
            } else {
                info!("Looks like a word based model");
            }
            detected
        }
    };

    let alphabet = if utf8_mode {
        Alphabet::utf8()
    } else {
        Alphabet::from_config_file(opts.alphabet)?
    };
    if !utf8_mode && alphabet.space_label() as usize == alphabet.size() {
        warn!("Alphabet has no space label, word boundaries will never be scored");
    }

    let mut scorer = Scorer::new(Arc::new(lm), alphabet, utf8_mode);
    scorer.reset_params(opts.default_alpha, opts.default_beta);
    scorer.fill_dictionary(&words)?;

    // 出力先と同じディレクトリに作ってから置き換える
    let dst = Path::new(opts.package);
    let dir = match dst.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmpfile = NamedTempFile::new_in(dir)?;
    fs::copy(opts.lm, tmpfile.path())?;
    scorer.save_dictionary(tmpfile.path(), true)?;
    tmpfile.persist(dst)?;

    info!("Package created in {}", opts.package);
    Ok(())
}
