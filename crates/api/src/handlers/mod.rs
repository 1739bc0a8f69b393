pub mod credits;
pub mod jobs;
pub mod webhooks;
