pub mod discovery;
pub mod segmenter;
pub mod source;
pub mod supervisor;
