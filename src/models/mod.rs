pub mod draft;
pub mod join_request;
pub mod notification;
pub mod package;
pub mod trip;
