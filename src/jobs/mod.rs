pub mod expiry;
pub mod reminder;

pub use expiry::ExpirySweeper;
pub use reminder::ReminderScheduler;
