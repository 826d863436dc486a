pub mod climatology;
pub mod jobs;
pub mod power;
pub mod window;
