pub mod arpa;
pub mod backoff_ngram_lm;
pub mod base;
