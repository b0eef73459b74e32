use std::path::Path;

use libctcscorer::lm::base::NgramLM;
use libctcscorer::package::{read_package, FILE_VERSION};

/// スコアラパッケージの中身を表示する。
pub fn inspect(path: &str) -> anyhow::Result<()> {
    let package = read_package(Path::new(path))?;
    let lm = &package.language_model;

    println!("file:             {}", path);
    println!("file size:        {}", package.file_size);
    println!("format version:   {}", FILE_VERSION);
    println!("lm order:         {}", lm.order());
    println!("lm vocabulary:    {}", lm.vocabulary().len());
    println!("lm n-grams:       {}", lm.num_ngrams());
    println!("lm end offset:    {}", lm.end_of_search_offset());
    println!("utf8 mode:        {}", package.header.utf8_mode);
    println!("default alpha:    {}", package.header.alpha);
    println!("default beta:     {}", package.header.beta);
    println!("dictionary states: {}", package.dictionary.num_states());
    Ok(())
}
