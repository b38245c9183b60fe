pub mod calendar;
pub mod events;
pub mod handlers;
pub mod registry;
pub mod rooms;
pub mod socket;

pub use registry::ConnectionRegistry;
pub use rooms::RoomHub;
