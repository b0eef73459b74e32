use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use rustc_hash::FxHashMap;

/// 音響モデルの出力ラベル。スコア単位 (文字 or バイト) の ID。
pub type Label = u32;

/**
 * ラベルとスコア単位の文字列の双方向マッピング。
 *
 * UTF-8 モードの単位は 1 バイトで、単体では UTF-8 として成立しないので
 * バイト列で保持している。
 */
#[derive(Debug, Clone)]
pub struct Alphabet {
    units: Vec<Vec<u8>>,
    label_map: FxHashMap<Vec<u8>, Label>,
    space_label: Label,
    utf8_bytes: bool,
}

impl Alphabet {
    /// alphabet 設定ファイルを読む。
    ///
    /// 1 行 1 ラベル。`#` で始まる行はコメントで、`\#` は `#` そのものを表す。
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Alphabet> {
        let path = path.as_ref();
        info!("Reading alphabet: {}", path.display());
        let file =
            File::open(path).with_context(|| format!("Cannot open alphabet {}", path.display()))?;

        let mut units: Vec<Vec<u8>> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line == "\\#" {
                units.push(b"#".to_vec());
                continue;
            }
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            units.push(line.into_bytes());
        }
        Self::from_units(units)
    }

    pub fn from_units<I, U>(units: I) -> Result<Alphabet>
    where
        I: IntoIterator<Item = U>,
        U: AsRef<[u8]>,
    {
        let units: Vec<Vec<u8>> = units.into_iter().map(|u| u.as_ref().to_vec()).collect();
        if units.is_empty() {
            bail!("Alphabet has no labels");
        }

        let mut label_map = FxHashMap::default();
        for (label, unit) in units.iter().enumerate() {
            if unit.is_empty() {
                bail!("Empty label in alphabet at position {}", label);
            }
            if label_map.insert(unit.clone(), label as Label).is_some() {
                bail!(
                    "Duplicated label in alphabet: {:?}",
                    String::from_utf8_lossy(unit)
                );
            }
        }
        // スペースを持たない alphabet では、どのラベルとも一致しない ID にしておく
        let space_label = label_map
            .get(b" ".as_slice())
            .copied()
            .unwrap_or(units.len() as Label);

        Ok(Alphabet {
            units,
            label_map,
            space_label,
            utf8_bytes: false,
        })
    }

    /// UTF-8 モード用のバイト alphabet。ラベル i はバイト i+1 を表す。
    pub fn utf8() -> Alphabet {
        let units: Vec<Vec<u8>> = (1..=u8::MAX).map(|b| vec![b]).collect();
        let label_map = units
            .iter()
            .enumerate()
            .map(|(label, unit)| (unit.clone(), label as Label))
            .collect();
        Alphabet {
            units,
            label_map,
            space_label: (b' ' - 1) as Label,
            utf8_bytes: true,
        }
    }

    pub fn size(&self) -> usize {
        self.units.len()
    }

    pub fn space_label(&self) -> Label {
        self.space_label
    }

    pub fn is_utf8_bytes(&self) -> bool {
        self.utf8_bytes
    }

    pub fn string_from_label(&self, label: Label) -> &[u8] {
        &self.units[label as usize]
    }

    pub fn label_from_string(&self, unit: &[u8]) -> Option<Label> {
        self.label_map.get(unit).copied()
    }

    pub fn labels_to_string(&self, labels: &[Label]) -> String {
        let mut buf: Vec<u8> = Vec::with_capacity(labels.len());
        for label in labels {
            buf.extend_from_slice(self.string_from_label(*label));
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// テキストをラベル列に変換する。
    /// バイト alphabet ならバイト単位、それ以外はコードポイント単位。
    pub fn encode(&self, text: &str) -> Result<Vec<Label>> {
        let mut labels = Vec::with_capacity(text.len());
        if self.utf8_bytes {
            for b in text.bytes() {
                let Some(label) = self.label_from_string(&[b]) else {
                    bail!("Byte {:#04x} is not encodable in UTF-8 alphabet", b);
                };
                labels.push(label);
            }
        } else {
            let mut buf = [0_u8; 4];
            for c in text.chars() {
                let Some(label) = self.label_from_string(c.encode_utf8(&mut buf).as_bytes())
                else {
                    bail!("Character {:?} of {:?} is not in alphabet", c, text);
                };
                labels.push(label);
            }
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn parse_config_file() -> anyhow::Result<()> {
        let mut tmpfile = NamedTempFile::new()?;
        write!(tmpfile, "# comment line\n \na\nb\n\\#\n\nc\n")?;

        let alphabet = Alphabet::from_config_file(tmpfile.path())?;
        assert_eq!(alphabet.size(), 5);
        assert_eq!(alphabet.space_label(), 0);
        assert_eq!(alphabet.string_from_label(1), b"a");
        assert_eq!(alphabet.string_from_label(3), b"#");
        assert_eq!(alphabet.label_from_string(b"c"), Some(4));
        Ok(())
    }

    #[test]
    fn encode_and_decode_words() -> anyhow::Result<()> {
        let alphabet = Alphabet::from_units([" ", "c", "a", "t", "ä"])?;
        let labels = alphabet.encode("cat ä")?;
        assert_eq!(labels, vec![1, 2, 3, 0, 4]);
        assert_eq!(alphabet.labels_to_string(&labels), "cat ä");
        assert!(alphabet.encode("dog").is_err());
        Ok(())
    }

    #[test]
    fn missing_space_label_never_matches() -> anyhow::Result<()> {
        let alphabet = Alphabet::from_units(["a", "b"])?;
        assert_eq!(alphabet.space_label(), 2);
        Ok(())
    }

    #[test]
    fn duplicated_label_is_rejected() {
        assert!(Alphabet::from_units(["a", "a"]).is_err());
    }

    #[test]
    fn empty_label_is_rejected() {
        assert!(Alphabet::from_units([" ", "", "a"]).is_err());
    }

    #[test]
    fn utf8_alphabet_maps_bytes() -> anyhow::Result<()> {
        let alphabet = Alphabet::utf8();
        assert_eq!(alphabet.size(), 255);
        assert_eq!(alphabet.space_label(), 31);
        assert_eq!(alphabet.string_from_label(31), b" ");

        let labels = alphabet.encode("né")?;
        assert_eq!(labels, vec![b'n' as Label - 1, 0xC3 - 1, 0xA9 - 1]);
        assert_eq!(alphabet.labels_to_string(&labels), "né");
        Ok(())
    }
}
