//! Terminal User Interface module

pub mod app;
pub mod channel;
pub mod colors;
pub mod events;
pub mod runner;
pub mod widgets;

pub use app::App;
pub use channel::{ChannelEvents, UiEvent};
