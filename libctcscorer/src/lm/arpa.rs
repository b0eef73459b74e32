use std::io::BufRead;

use anyhow::{bail, Context, Result};
use log::info;
use regex::Regex;

use crate::lm::backoff_ngram_lm::BackoffNgramLMBuilder;

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Data,
    Ngrams(usize),
    End,
}

/**
 * ARPA 形式のテキストを読み、バックオフ n-gram LM のビルダーを作る。
 *
 *   \data\
 *   ngram 1=3
 *   \1-grams:
 *   -1.0  <s>  -0.5
 *   ...
 *   \end\
 */
pub fn read_arpa<R: BufRead>(reader: R) -> Result<BackoffNgramLMBuilder> {
    let count_pattern = Regex::new(r"^ngram\s+(\d+)\s*=\s*(\d+)$")?;
    let section_pattern = Regex::new(r"^\\(\d+)-grams:$")?;

    let mut builder = BackoffNgramLMBuilder::default();
    let mut expected_counts: Vec<usize> = Vec::new();
    let mut actual_counts: Vec<usize> = Vec::new();
    let mut section = Section::Preamble;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match section {
            Section::Preamble => {
                if line == "\\data\\" {
                    section = Section::Data;
                }
            }
            Section::End => {
                bail!("Unexpected content after \\end\\ at line {}", lineno + 1);
            }
            Section::Data | Section::Ngrams(_) if line == "\\end\\" => {
                section = Section::End;
            }
            Section::Data | Section::Ngrams(_) if section_pattern.is_match(line) => {
                let caps = section_pattern
                    .captures(line)
                    .with_context(|| format!("Malformed section header: {line}"))?;
                let n: usize = caps[1].parse()?;
                if n == 0 || n > expected_counts.len() {
                    bail!("Unexpected {}-grams section at line {}", n, lineno + 1);
                }
                section = Section::Ngrams(n);
            }
            Section::Data => {
                let Some(caps) = count_pattern.captures(line) else {
                    bail!("Malformed ngram count at line {}: {}", lineno + 1, line);
                };
                let n: usize = caps[1].parse()?;
                let count: usize = caps[2].parse()?;
                if n != expected_counts.len() + 1 {
                    bail!("ngram counts must be listed in order (line {})", lineno + 1);
                }
                expected_counts.push(count);
                actual_counts.push(0);
            }
            Section::Ngrams(n) => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let backoff = if fields.len() == n + 2 {
                    fields[n + 1].parse::<f32>().with_context(|| {
                        format!("Bad backoff weight at line {}: {}", lineno + 1, line)
                    })?
                } else if fields.len() == n + 1 {
                    0.0
                } else {
                    bail!(
                        "Expected {}-gram entry at line {}, got: {}",
                        n,
                        lineno + 1,
                        line
                    );
                };
                let prob = fields[0].parse::<f32>().with_context(|| {
                    format!("Bad probability at line {}: {}", lineno + 1, line)
                })?;
                builder.add(&fields[1..=n], prob, backoff);
                actual_counts[n - 1] += 1;
            }
        }
    }

    if !matches!(section, Section::End) {
        bail!("ARPA file ended without \\end\\ marker");
    }
    for (i, (expected, actual)) in expected_counts.iter().zip(&actual_counts).enumerate() {
        if expected != actual {
            bail!(
                "{}-gram count mismatch: header says {}, found {}",
                i + 1,
                expected,
                actual
            );
        }
    }
    info!(
        "Read ARPA model: order={} counts={:?}",
        expected_counts.len(),
        actual_counts
    );

    Ok(builder)
}
