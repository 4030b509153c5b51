pub mod expense;
pub mod history;
pub mod notification;
pub mod report;
pub mod user;

pub use expense::*;
pub use history::*;
pub use notification::*;
pub use report::*;
pub use user::*;
