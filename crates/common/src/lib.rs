pub mod clips;
pub mod detections;
pub mod detector;
pub mod error;
pub mod frames;
pub mod process;
pub mod rules;
pub mod store;
pub mod streams;
pub mod validation;
