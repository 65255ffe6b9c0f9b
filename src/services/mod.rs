pub mod matching;
pub mod orders;
pub mod settlement;
