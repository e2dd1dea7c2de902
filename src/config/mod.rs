mod settings;

pub use settings::{
    ConversationConfig, FallbackConfig, LoggingConfig, PrimaryConfig, Settings, StorageConfig,
};
