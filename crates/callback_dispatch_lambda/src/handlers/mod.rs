pub mod dispatch;
pub mod greeting;
pub mod response;
