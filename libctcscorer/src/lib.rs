pub mod alphabet;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod lm;
pub mod package;
pub mod path_trie;
pub mod scorer;
