pub mod analysis;
pub mod departure;
pub mod group;
pub mod history;
pub mod payment;
pub mod trip;
