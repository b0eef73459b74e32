use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{error, info};

use crate::dictionary::DictionaryAutomaton;
use crate::error::ScorerError;
use crate::lm::backoff_ngram_lm::BackoffNgramLM;
use crate::lm::base::NgramLM;
use crate::scorer::Scorer;

/*
   スコアラパッケージは LM バイナリの直後に以下を追記したもの。

   magic           # i32 LE 0x54524945 ("TRIE")
   version         # i32 LE
   utf8 flag       # 1 byte
   alpha           # f64 LE
   beta            # f64 LE
   dictionary      # rustfst ConstFst
*/

pub const MAGIC: i32 = 0x5452_4945;
pub const FILE_VERSION: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackageHeader {
    pub utf8_mode: bool,
    pub alpha: f64,
    pub beta: f64,
}

/// 読み込んだスコアラパッケージの中身。
pub struct Package {
    pub language_model: BackoffNgramLM,
    pub header: PackageHeader,
    pub dictionary: DictionaryAutomaton,
    pub file_size: u64,
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N], ScorerError> {
    let mut buf = [0_u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_header<R: Read>(reader: &mut R) -> Result<PackageHeader, ScorerError> {
    let magic = i32::from_le_bytes(read_array(reader)?);
    if magic != MAGIC {
        error!("Error: Can't parse scorer file, invalid header. Try updating your scorer file.");
        return Err(ScorerError::InvalidMagic { found: magic });
    }

    let version = i32::from_le_bytes(read_array(reader)?);
    if version < FILE_VERSION {
        error!(
            "Error: Scorer file version mismatch ({} instead of expected {}). Update your scorer file.",
            version, FILE_VERSION
        );
        return Err(ScorerError::VersionTooOld {
            found: version,
            expected: FILE_VERSION,
        });
    }
    if version > FILE_VERSION {
        error!(
            "Error: Scorer file version mismatch ({} instead of expected {}). Downgrade your scorer file or update your version of libctcscorer.",
            version, FILE_VERSION
        );
        return Err(ScorerError::VersionTooNew {
            found: version,
            expected: FILE_VERSION,
        });
    }

    let [flag] = read_array::<_, 1>(reader)?;
    let alpha = f64::from_le_bytes(read_array(reader)?);
    let beta = f64::from_le_bytes(read_array(reader)?);
    Ok(PackageHeader {
        utf8_mode: flag != 0,
        alpha,
        beta,
    })
}

fn write_header<W: Write>(
    writer: &mut W,
    version: i32,
    header: &PackageHeader,
) -> Result<(), ScorerError> {
    writer.write_all(&MAGIC.to_le_bytes())?;
    writer.write_all(&version.to_le_bytes())?;
    writer.write_all(&[u8::from(header.utf8_mode)])?;
    writer.write_all(&header.alpha.to_le_bytes())?;
    writer.write_all(&header.beta.to_le_bytes())?;
    Ok(())
}

/// スコアラパッケージを読み込む。エラーになった場合、途中の状態は捨てる。
pub fn read_package(path: &Path) -> Result<Package, ScorerError> {
    let file = File::open(path).map_err(|source| ScorerError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;

    if !BackoffNgramLM::recognize(path) {
        return Err(ScorerError::UnrecognizedFormat {
            path: path.display().to_string(),
        });
    }
    let language_model = BackoffNgramLM::load(path).map_err(ScorerError::LanguageModel)?;

    let file_size = file.metadata()?.len();
    let lm_end = language_model.end_of_search_offset();
    if file_size <= lm_end {
        error!("Error: Reached end of scorer file before loading dictionary trie.");
        return Err(ScorerError::MissingDictionary { file_size, lm_end });
    }

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(lm_end))?;
    let header = read_header(&mut reader)?;

    let mut bytes = Vec::with_capacity((file_size - lm_end) as usize);
    reader.read_to_end(&mut bytes)?;
    let dictionary = DictionaryAutomaton::read(&bytes).map_err(ScorerError::Automaton)?;

    info!(
        "Loaded scorer package: {} (utf8_mode={} alpha={} beta={} dictionary states={})",
        path.display(),
        header.utf8_mode,
        header.alpha,
        header.beta,
        dictionary.num_states()
    );
    Ok(Package {
        language_model,
        header,
        dictionary,
        file_size,
    })
}

/// ヘッダと辞書を書き出す。append なら既存ファイルの末尾に追記、そうでなければ作り直す。
pub fn save_dictionary(scorer: &Scorer, path: &Path, append: bool) -> Result<(), ScorerError> {
    let Some(dictionary) = scorer.dictionary() else {
        return Err(ScorerError::EmptyDictionary);
    };

    let file = if append {
        OpenOptions::new().append(true).open(path)?
    } else {
        File::create(path)?
    };

    let header = PackageHeader {
        utf8_mode: scorer.is_utf8_mode(),
        alpha: scorer.alpha(),
        beta: scorer.beta(),
    };
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, FILE_VERSION, &header)?;
    dictionary
        .write(&mut writer)
        .map_err(ScorerError::Automaton)?;
    writer.flush()?;

    info!(
        "Saved dictionary to {} (append={} states={})",
        path.display(),
        append,
        dictionary.num_states()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use crate::alphabet::Alphabet;
    use crate::dictionary::{DictionaryBuilder, LABEL_OFFSET};
    use crate::lm::backoff_ngram_lm::BackoffNgramLMBuilder;
    use crate::path_trie::PathTrie;

    use super::*;

    fn toy_builder() -> BackoffNgramLMBuilder {
        let mut builder = BackoffNgramLMBuilder::default();
        builder
            .add(&["<s>"], -99.0, -0.5)
            .add(&["</s>"], -1.0, 0.0)
            .add(&["cat"], -1.2, -0.3)
            .add(&["dog"], -1.5, -0.2)
            .add(&["<s>", "cat"], -0.4, 0.0)
            .add(&["cat", "dog"], -0.6, 0.0);
        builder
    }

    fn alphabet() -> Alphabet {
        Alphabet::from_units([" ", "c", "a", "t", "d", "o", "g"]).unwrap()
    }

    fn lm_only_file() -> anyhow::Result<NamedTempFile> {
        let tmpfile = NamedTempFile::new()?;
        toy_builder().save(tmpfile.path())?;
        Ok(tmpfile)
    }

    /// LM の後ろに任意バージョンのヘッダと辞書を付ける。
    fn package_with_version(version: i32) -> anyhow::Result<NamedTempFile> {
        let tmpfile = lm_only_file()?;
        let mut builder = DictionaryBuilder::default();
        builder.add_word(&[1 + LABEL_OFFSET, 2 + LABEL_OFFSET])?;
        let dictionary = builder.build()?;

        let mut file = OpenOptions::new().append(true).open(tmpfile.path())?;
        let header = PackageHeader {
            utf8_mode: false,
            alpha: 0.9,
            beta: 1.2,
        };
        write_header(&mut file, version, &header)?;
        dictionary.write(&mut file)?;
        Ok(tmpfile)
    }

    #[test]
    fn save_and_load() -> anyhow::Result<()> {
        let tmpfile = lm_only_file()?;
        let alphabet = alphabet();

        let lm = BackoffNgramLM::load(tmpfile.path())?;
        let mut scorer = Scorer::new(Arc::new(lm), alphabet.clone(), false);
        scorer.reset_params(0.931, 1.183);
        scorer.fill_dictionary(&["cat", "dog"])?;
        scorer.save_dictionary(tmpfile.path(), true)?;

        let loaded = Scorer::init(tmpfile.path(), alphabet.clone())?;
        assert_eq!(loaded.alpha(), 0.931);
        assert_eq!(loaded.beta(), 1.183);
        assert!(!loaded.is_utf8_mode());
        assert_eq!(loaded.max_order(), 2);
        assert_eq!(
            loaded.dictionary().unwrap().paths(),
            scorer.dictionary().unwrap().paths()
        );
        assert!(loaded
            .dictionary()
            .unwrap()
            .accepts(&alphabet.encode("cat ")?));
        Ok(())
    }

    fn utf8_scorer(path: &Path) -> anyhow::Result<Scorer> {
        let lm = BackoffNgramLM::load(path)?;
        let mut scorer = Scorer::new(Arc::new(lm), Alphabet::utf8(), true);
        scorer.reset_params(0.25, 2.5);
        scorer.fill_dictionary(&["é", "a", "😀"])?;
        Ok(scorer)
    }

    #[test]
    fn save_and_load_utf8_mode() -> anyhow::Result<()> {
        let lm_file = lm_only_file()?;
        let scorer = utf8_scorer(lm_file.path())?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("utf8.scorer");
        std::fs::copy(lm_file.path(), &path)?;
        scorer.save_dictionary(&path, true)?;

        let package = read_package(&path)?;
        assert_eq!(
            package.header,
            PackageHeader {
                utf8_mode: true,
                alpha: 0.25,
                beta: 2.5,
            }
        );
        assert_eq!(package.dictionary.paths(), scorer.dictionary().unwrap().paths());
        Ok(())
    }

    #[test]
    fn save_overwrites_existing_file() -> anyhow::Result<()> {
        let lm_file = lm_only_file()?;
        let scorer = utf8_scorer(lm_file.path())?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dictionary.bin");
        std::fs::write(&path, vec![0xFF_u8; 4096])?;
        scorer.save_dictionary(&path, false)?;

        // 先頭からヘッダ、続いて辞書だけが書かれている
        let bytes = std::fs::read(&path)?;
        let mut reader = bytes.as_slice();
        let header = read_header(&mut reader)?;
        assert_eq!(
            header,
            PackageHeader {
                utf8_mode: true,
                alpha: 0.25,
                beta: 2.5,
            }
        );
        let dictionary = DictionaryAutomaton::read(reader)?;
        assert_eq!(dictionary.paths(), scorer.dictionary().unwrap().paths());
        Ok(())
    }

    #[test]
    fn utf8_package_uses_byte_alphabet() -> anyhow::Result<()> {
        let lm_file = lm_only_file()?;
        let scorer = utf8_scorer(lm_file.path())?;
        scorer.save_dictionary(lm_file.path(), true)?;

        // 文字単位の alphabet 設定を渡しても UTF-8 モードならバイト alphabet になる
        let mut alphabet_file = NamedTempFile::new()?;
        writeln!(alphabet_file, " ")?;
        writeln!(alphabet_file, "a")?;
        writeln!(alphabet_file, "é")?;
        let loaded = Scorer::init_with_alphabet_config(lm_file.path(), alphabet_file.path())?;
        assert!(loaded.is_utf8_mode());
        assert!(loaded.alphabet().is_utf8_bytes());

        let labels = loaded.alphabet().encode("é")?;
        assert_eq!(labels.len(), 2);
        let mut trie = PathTrie::new();
        let root = trie.root();
        let first = trie.append(root, labels[0]);
        assert!(!loaded.is_scoring_boundary(&trie, first, labels[0]));
        let second = trie.append(first, labels[1]);
        assert!(loaded.is_scoring_boundary(&trie, second, labels[1]));

        let dictionary = loaded.dictionary().unwrap();
        assert!(dictionary.accepts(&labels));
        assert!(dictionary.accepts(&loaded.alphabet().encode("😀")?));
        assert!(!dictionary.accepts(&loaded.alphabet().encode("aé")?));
        Ok(())
    }

    #[test]
    fn save_without_dictionary_fails() -> anyhow::Result<()> {
        let tmpfile = lm_only_file()?;
        let lm = BackoffNgramLM::load(tmpfile.path())?;
        let scorer = Scorer::new(Arc::new(lm), alphabet(), false);
        assert!(matches!(
            scorer.save_dictionary(tmpfile.path(), true),
            Err(ScorerError::EmptyDictionary)
        ));
        Ok(())
    }

    #[test]
    fn header_fields() -> anyhow::Result<()> {
        let tmpfile = package_with_version(FILE_VERSION)?;
        let package = read_package(tmpfile.path())?;
        assert_eq!(
            package.header,
            PackageHeader {
                utf8_mode: false,
                alpha: 0.9,
                beta: 1.2,
            }
        );
        assert_eq!(package.dictionary.paths(), vec![vec![1, 2]]);
        assert!(package.file_size > package.language_model.end_of_search_offset());
        Ok(())
    }

    #[test]
    fn old_version_is_rejected() -> anyhow::Result<()> {
        let tmpfile = package_with_version(5)?;
        let err = read_package(tmpfile.path()).err().unwrap();
        assert!(matches!(
            err,
            ScorerError::VersionTooOld {
                found: 5,
                expected: 6
            }
        ));
        assert_eq!(err.code(), 0x2008);
        Ok(())
    }

    #[test]
    fn new_version_is_rejected() -> anyhow::Result<()> {
        let tmpfile = package_with_version(7)?;
        let err = read_package(tmpfile.path()).err().unwrap();
        assert!(matches!(
            err,
            ScorerError::VersionTooNew {
                found: 7,
                expected: 6
            }
        ));
        Ok(())
    }

    #[test]
    fn bad_magic_is_rejected() -> anyhow::Result<()> {
        let tmpfile = lm_only_file()?;
        let mut file = OpenOptions::new().append(true).open(tmpfile.path())?;
        file.write_all(&0x1234_5678_i32.to_le_bytes())?;
        file.write_all(&[0_u8; 32])?;

        let err = read_package(tmpfile.path()).err().unwrap();
        assert!(matches!(err, ScorerError::InvalidMagic { found: 0x1234_5678 }));
        assert_eq!(err.code(), 0x2007);
        Ok(())
    }

    #[test]
    fn lm_without_dictionary_is_rejected() -> anyhow::Result<()> {
        let tmpfile = lm_only_file()?;
        let err = read_package(tmpfile.path()).err().unwrap();
        assert!(matches!(err, ScorerError::MissingDictionary { .. }));
        assert_eq!(err.code(), 0x2006);
        Ok(())
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = read_package(Path::new("/nonexistent/kenlm.scorer"))
            .err()
            .unwrap();
        assert!(matches!(err, ScorerError::Unreadable { .. }));
        assert_eq!(err.code(), 0x2004);
    }

    #[test]
    fn unknown_lm_format_is_unrecognized() -> anyhow::Result<()> {
        let mut tmpfile = NamedTempFile::new()?;
        tmpfile.write_all(b"\\data\\\nngram 1=3\n")?;
        let err = read_package(tmpfile.path()).err().unwrap();
        assert!(matches!(err, ScorerError::UnrecognizedFormat { .. }));
        assert_eq!(err.code(), 0x2005);
        Ok(())
    }

    #[test]
    fn truncated_header_is_io_error() -> anyhow::Result<()> {
        let tmpfile = lm_only_file()?;
        let mut file = OpenOptions::new().append(true).open(tmpfile.path())?;
        file.write_all(&MAGIC.to_le_bytes())?;
        file.write_all(&FILE_VERSION.to_le_bytes())?;

        let err = read_package(tmpfile.path()).err().unwrap();
        assert!(matches!(err, ScorerError::Io(_)));
        Ok(())
    }
}
