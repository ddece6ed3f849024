pub mod config;
pub mod config_loader;
pub mod credentials;
pub mod error;
pub mod model;

pub use config::{
    AppConfig, BufferTier, DatabaseConfig, ExchangeConfig, ExecutionConfig, MonitorConfig,
    PaperConfig, SchedulerConfig, StopBuffer, TelegramConfig,
};
pub use config_loader::ConfigLoader;
pub use credentials::Credentials;
pub use error::ConfigError;
pub use model::{
    parse_trigger_time, BracketPercents, Direction, ExecutionRecord, ExecutionStatus, LegRecord,
    Moneyness, OptionKind, RunStatus, Schedule, StrategyPreset, StrategyShape, StrikeDistance,
};
