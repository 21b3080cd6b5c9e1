pub mod live;
pub mod messages;
