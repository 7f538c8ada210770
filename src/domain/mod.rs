pub mod device_tokens;
pub mod engagement;
pub mod posts;
pub mod users;
