use std::io::Write;

use anyhow::Result;
use log::{debug, trace};
use rustfst::algorithms::determinize::determinize;
use rustfst::algorithms::minimize;
use rustfst::algorithms::rm_epsilon::rm_epsilon;
use rustfst::prelude::*;

use crate::alphabet::Label;

/// FST の初期状態 0 と衝突しないよう、ラベルは +1 して格納する。
pub const LABEL_OFFSET: Label = 1;

/**
 * 語彙を FST に変換するためのビルダー。
 *
 * 単語ごとに初期状態から新しい経路を追加するだけなので、build 時に
 * イプシロン除去・決定化・最小化をかける。
 */
pub struct DictionaryBuilder {
    fst: VectorFst<TropicalWeight>,
    num_words: usize,
}

impl Default for DictionaryBuilder {
    fn default() -> Self {
        Self {
            fst: VectorFst::new(),
            num_words: 0,
        }
    }
}

impl DictionaryBuilder {
    fn ensure_start(&mut self) -> Result<StateId> {
        if let Some(start) = self.fst.start() {
            return Ok(start);
        }
        let start = self.fst.add_state();
        self.fst.set_start(start)?;
        Ok(start)
    }

    /// 単語を追加する。labels はオフセット済みの FST ラベル。
    pub fn add_word(&mut self, labels: &[Label]) -> Result<()> {
        assert!(!labels.is_empty(), "Dictionary word shouldn't be empty");

        let mut src = self.ensure_start()?;
        for label in labels {
            let dst = self.fst.add_state();
            self.fst
                .add_tr(src, Tr::new(*label, *label, TropicalWeight::one(), dst))?;
            src = dst;
        }
        self.fst.set_final(src, TropicalWeight::one())?;
        self.num_words += 1;
        Ok(())
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn build(mut self) -> Result<DictionaryAutomaton> {
        self.ensure_start()?;
        debug!(
            "Building dictionary: words={} states={}",
            self.num_words,
            self.fst.num_states()
        );

        // 決定化の前にイプシロン遷移を取り除く
        rm_epsilon(&mut self.fst)?;
        // デコード時は 1 ラベルごとに高々 1 状態だけを追う
        let mut deterministic: VectorFst<TropicalWeight> = determinize(&self.fst)?;
        minimize(&mut deterministic)?;
        debug!("  minimized states={}", deterministic.num_states());

        Ok(DictionaryAutomaton {
            fst: ConstFst::from(deterministic),
        })
    }
}

/// 語彙を表す決定性・最小化済みの受理器。デコード中は読み取り専用。
#[derive(Debug)]
pub struct DictionaryAutomaton {
    fst: ConstFst<TropicalWeight>,
}

impl DictionaryAutomaton {
    pub fn start(&self) -> Option<StateId> {
        self.fst.start()
    }

    /// alphabet のラベルで遷移する。遷移が無ければ None。
    pub fn next_state(&self, state: StateId, label: Label) -> Option<StateId> {
        let fst_label = label + LABEL_OFFSET;
        let trs = self.fst.get_trs(state).ok()?;
        let next = trs
            .trs()
            .iter()
            .find(|tr| tr.ilabel == fst_label)
            .map(|tr| tr.nextstate);
        trace!("next_state({}, {}) -> {:?}", state, label, next);
        next
    }

    pub fn is_final(&self, state: StateId) -> bool {
        self.fst.is_final(state).unwrap_or(false)
    }

    /// ラベル列全体が語彙の経路として受理されるか。
    pub fn accepts(&self, labels: &[Label]) -> bool {
        let Some(mut state) = self.start() else {
            return false;
        };
        for label in labels {
            match self.next_state(state, *label) {
                Some(next) => state = next,
                None => return false,
            }
        }
        self.is_final(state)
    }

    pub fn num_states(&self) -> usize {
        self.fst.num_states()
    }

    /// 受理するラベル列をすべて列挙する。辞書は非巡回である前提。
    pub fn paths(&self) -> Vec<Vec<Label>> {
        let mut result = Vec::new();
        let Some(start) = self.start() else {
            return result;
        };
        let mut stack: Vec<(StateId, Vec<Label>)> = vec![(start, Vec::new())];
        while let Some((state, prefix)) = stack.pop() {
            if self.is_final(state) {
                result.push(prefix.clone());
            }
            let Ok(trs) = self.fst.get_trs(state) else {
                continue;
            };
            for tr in trs.trs() {
                let mut next = prefix.clone();
                next.push(tr.ilabel - LABEL_OFFSET);
                stack.push((tr.nextstate, next));
            }
        }
        result.sort();
        result
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        self.fst.store(writer)
    }

    pub fn read(bytes: &[u8]) -> Result<DictionaryAutomaton> {
        let fst = ConstFst::<TropicalWeight>::load(bytes)?;
        Ok(DictionaryAutomaton { fst })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(labels: &[Label]) -> Vec<Label> {
        labels.iter().map(|l| l + LABEL_OFFSET).collect()
    }

    fn build(words: &[&[Label]]) -> anyhow::Result<DictionaryAutomaton> {
        let mut builder = DictionaryBuilder::default();
        for word in words {
            builder.add_word(&offset(word))?;
        }
        builder.build()
    }

    #[test]
    fn accepts_only_inserted_words() -> anyhow::Result<()> {
        let dict = build(&[&[0, 1, 2], &[0, 1, 3], &[4]])?;

        assert!(dict.accepts(&[0, 1, 2]));
        assert!(dict.accepts(&[0, 1, 3]));
        assert!(dict.accepts(&[4]));
        assert!(!dict.accepts(&[0, 1]));
        assert!(!dict.accepts(&[0, 1, 2, 3]));
        assert!(!dict.accepts(&[5]));
        assert!(!dict.accepts(&[]));
        Ok(())
    }

    #[test]
    fn shared_prefixes_are_merged() -> anyhow::Result<()> {
        let dict = build(&[&[0, 1, 2], &[0, 1, 3]])?;
        // start -0-> s1 -1-> s2 -{2,3}-> final
        assert_eq!(dict.num_states(), 4);

        let start = dict.start().unwrap();
        let s1 = dict.next_state(start, 0).unwrap();
        assert!(dict.next_state(start, 1).is_none());
        assert!(!dict.is_final(s1));
        Ok(())
    }

    #[test]
    fn empty_dictionary_accepts_nothing() -> anyhow::Result<()> {
        let dict = DictionaryBuilder::default().build()?;
        assert!(dict.paths().is_empty());
        assert!(!dict.accepts(&[0]));
        Ok(())
    }

    #[test]
    fn write_read() -> anyhow::Result<()> {
        let dict = build(&[&[3, 1], &[3, 2, 2], &[7]])?;
        let mut buf: Vec<u8> = Vec::new();
        dict.write(&mut buf)?;

        let loaded = DictionaryAutomaton::read(&buf)?;
        assert_eq!(loaded.num_states(), dict.num_states());
        assert_eq!(loaded.paths(), dict.paths());
        assert_eq!(
            loaded.paths(),
            vec![vec![3, 1], vec![3, 2, 2], vec![7]]
        );
        Ok(())
    }
}
