pub mod build_lm;
pub mod inspect;
pub mod package;
pub mod score;
