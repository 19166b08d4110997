pub mod api;
pub mod config;
pub mod display;
pub mod engine;
pub mod hub;
pub mod render;
pub mod state;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use display::GlyphSurface;
pub use display::SimulatedSurface;
pub use engine::EngineHandle;
pub use engine::SyncEngine;
pub use hub::WsDialer;
