pub mod api;
pub mod notification;
pub mod request;
pub mod settings;
