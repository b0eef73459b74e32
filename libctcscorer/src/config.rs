use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::scorer::Scorer;

/*
   scorer: /usr/share/ctcscorer/kenlm.scorer
   alphabet: /usr/share/ctcscorer/alphabet.txt
   alpha: 0.93
   beta: 1.18
*/

/// スコアラの設定ファイル。alpha/beta を書けばパッケージの既定値を上書きする。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub scorer: String,
    pub alphabet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
}

impl ScorerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot open config file: {}", path.display()))?;
        let config: ScorerConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Cannot parse config file: {}", path.display()))?;
        info!("Loaded config file: {}, {:?}", path.display(), config);
        Ok(config)
    }

    pub fn default_path() -> Result<Option<PathBuf>> {
        let basedir = xdg::BaseDirectories::with_prefix("ctcscorer")?;
        Ok(basedir.find_config_file("config.yml"))
    }

    /// $XDG_CONFIG_HOME/ctcscorer/config.yml を読む。
    pub fn load_from_default_path() -> Result<Self> {
        let Some(path) = Self::default_path()? else {
            bail!("Missing config file: ctcscorer/config.yml");
        };
        Self::load(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }

    /// スコアラパッケージを読み込み、設定の alpha/beta を反映する。
    pub fn build_scorer(&self) -> Result<Scorer> {
        let mut scorer = Scorer::init_with_alphabet_config(&self.scorer, &self.alphabet)
            .with_context(|| format!("Cannot load scorer: {}", self.scorer))?;

        if self.alpha.is_some() || self.beta.is_some() {
            let alpha = self.alpha.unwrap_or(scorer.alpha());
            let beta = self.beta.unwrap_or(scorer.beta());
            if !alpha.is_finite() || !beta.is_finite() {
                warn!("Ignoring non-finite alpha/beta in config: {alpha} {beta}");
            } else {
                info!("Overriding scorer params: alpha={} beta={}", alpha, beta);
                scorer.reset_params(alpha, beta);
            }
        }
        Ok(scorer)
    }
}
