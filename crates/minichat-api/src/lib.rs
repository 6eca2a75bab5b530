pub mod app;
pub mod auth;
pub mod error;
pub mod extract;
pub mod groups;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod users;
pub mod ws;
