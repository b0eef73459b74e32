use std::fs::{self, File};
use std::io::BufReader;

use anyhow::Context;
use log::info;

use libctcscorer::lm::arpa::read_arpa;

/// ARPA ファイルからバイナリ LM を作る。
pub fn build_lm(arpa: &str, dst: &str) -> anyhow::Result<()> {
    info!("build-lm: {} => {}", arpa, dst);

    let file = File::open(arpa).with_context(|| format!("Cannot open ARPA file: {arpa}"))?;
    let builder = read_arpa(BufReader::new(file))?;

    let tmpfile = dst.to_string() + ".tmp";
    builder.save(&tmpfile)?;
    fs::rename(&tmpfile, dst)?;

    info!("Wrote {} n-grams to {}", builder.num_ngrams(), dst);
    Ok(())
}
