pub mod config;
pub mod form;
pub mod links;
pub mod platform;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod state;
pub mod station;
pub mod store;
