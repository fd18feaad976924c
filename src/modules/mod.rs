pub mod jobs;
pub mod media;
