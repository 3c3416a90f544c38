pub mod announcements;
pub mod backup;
pub mod core;
pub mod curriculum;
pub mod grades;
pub mod offerings;
pub mod schedule;
pub mod students;
pub mod terms;
pub mod upload;
