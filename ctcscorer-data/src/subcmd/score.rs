use std::io::{self, BufRead};

use log::info;
use serde::Serialize;

use libctcscorer::config::ScorerConfig;
use libctcscorer::lm::base::UNKNOWN_WORD_INDEX;
use libctcscorer::scorer::Scorer;

#[derive(Debug, Serialize)]
struct JsonOutput {
    sentence: String,
    units: Vec<String>,
    log_prob: f64,
    oov_units: Vec<String>,
}

pub struct ScoreOptions<'a> {
    pub config: Option<&'a str>,
    pub scorer: Option<&'a str>,
    pub alphabet: Option<&'a str>,
    pub json_output: bool,
    pub sentences: Vec<String>,
}

fn load_scorer(opts: &ScoreOptions) -> anyhow::Result<Scorer> {
    if let Some(path) = opts.config {
        return ScorerConfig::load(path)?.build_scorer();
    }
    if let (Some(scorer), Some(alphabet)) = (opts.scorer, opts.alphabet) {
        return Ok(Scorer::init_with_alphabet_config(scorer, alphabet)?);
    }
    ScorerConfig::load_from_default_path()?.build_scorer()
}

/// 文をスコア単位 (UTF-8 モードならコードポイント、そうでなければ単語) に分ける。
fn split_sentence(scorer: &Scorer, sentence: &str) -> Vec<String> {
    if scorer.is_utf8_mode() {
        sentence.chars().map(|c| c.to_string()).collect()
    } else {
        sentence.split_whitespace().map(str::to_string).collect()
    }
}

fn oov_units(scorer: &Scorer, units: &[String]) -> Vec<String> {
    units
        .iter()
        .filter(|unit| scorer.language_model().index(unit.as_str()) == UNKNOWN_WORD_INDEX)
        .cloned()
        .collect()
}

pub fn score(opts: ScoreOptions) -> anyhow::Result<()> {
    let scorer = load_scorer(&opts)?;
    info!(
        "Scorer loaded: order={} utf8_mode={} alpha={} beta={}",
        scorer.max_order(),
        scorer.is_utf8_mode(),
        scorer.alpha(),
        scorer.beta()
    );

    let sentences = if opts.sentences.is_empty() {
        io::stdin().lock().lines().collect::<Result<Vec<_>, _>>()?
    } else {
        opts.sentences
    };

    let mut outputs: Vec<JsonOutput> = Vec::new();
    for sentence in sentences {
        let units = split_sentence(&scorer, &sentence);
        let log_prob = scorer.get_sent_log_prob(&units);
        if opts.json_output {
            let oov_units = oov_units(&scorer, &units);
            outputs.push(JsonOutput {
                sentence,
                units,
                log_prob,
                oov_units,
            });
        } else {
            println!("{:.6}\t{}", log_prob, sentence);
        }
    }

    if opts.json_output {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    }
    Ok(())
}
