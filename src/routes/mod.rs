pub mod auth;
pub mod health;
pub mod menus;
pub mod roles;
pub mod users;
