mod frame;
mod mapper;
mod sprite;

pub use frame::Animation;
pub use frame::Frame;
pub use mapper::map_all;
pub use mapper::map_one;
pub use mapper::FrameRule;
pub use mapper::WatchRule;
pub use sprite::Sprite;
pub use sprite::SpriteError;
