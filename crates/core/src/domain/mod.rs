pub mod approval;
pub mod entity;
pub mod workflow;
