pub mod decoder;
pub mod draw;
pub mod encoder;
pub mod interpolate;
pub mod resample;
pub mod worker;
