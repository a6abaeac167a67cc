pub use self::parser::{
    AuthConfig, CommandsConfig, Config, DatabaseConfig, DbType, DeliveryConfig, DeliveryMode,
    LogFormat, LoggingConfig, RoutingConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
