pub mod feedback;
pub mod job;
pub mod municipality;
pub mod notification;
pub mod profile;
pub mod report;
pub mod task;
pub mod worker;
