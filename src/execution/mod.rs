// Conditional order execution: registry, monitors, chasers and the engine
pub mod candle_buffer;
pub mod context;
pub mod engine;
pub mod entry_chaser;
pub mod events;
pub mod limit_chaser;
pub mod registry;
pub mod scheduler;
pub mod take_profit;
pub mod trigger_monitor;

pub use candle_buffer::{CandleBuffer, CandleKey};
pub use context::EngineContext;
pub use engine::BasketEngine;
pub use entry_chaser::{entry_price, EntryChaser};
pub use events::EventBus;
pub use limit_chaser::{chase_price, LimitChaser};
pub use registry::Registry;
pub use scheduler::{EntitySlots, PeriodicTask, SlotGuard, TaskSet, TickControl};
pub use take_profit::TakeProfitDispatcher;
pub use trigger_monitor::{stop_loss_hit, TriggerMonitor, WatchKey};
