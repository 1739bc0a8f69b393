pub mod credit;
pub mod generation_model;
pub mod job;
pub mod status;
pub mod user;
