mod actuator;
mod engine;
mod leg;
mod plan;
mod scheduler;

pub use actuator::{CancelFlag, LegActuator};
pub use engine::GaitEngine;
pub use leg::{Joint, Leg, LegId};
pub use plan::{GaitFormation, GaitPlan, Motion};
pub use scheduler::{LegMove, MotionScheduler};
