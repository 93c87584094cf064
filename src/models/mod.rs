pub mod event;
pub mod settings;
pub mod snapshot;
pub mod target;

pub use event::{EventLevel, LogEvent};
pub use settings::{EngineConfig, SettingsPatch};
pub use snapshot::{EngineSnapshot, LoopState};
pub use target::{MonitoredTarget, TargetStatus};
