pub mod jobs;
pub mod pingback;
