//! Lifecycle operations on plans and events, built on the store traits.

mod event;
mod plan;

pub use event::EventService;
pub use plan::PlanService;
