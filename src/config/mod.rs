//! Configuration: data model ([`schema`]) plus YAML+env loading with hot reload ([`loader`]).

pub mod loader;
pub mod schema;

pub use loader::{ConfigChange, ConfigStore, DEFAULT_ENV_PREFIX};
pub use schema::{
    AppConfig, Codec, DeviceConfig, DeviceConfigOverride, DevicesConfig, MediaRouterConfig,
    MonitorConfig, StreamConfig, TranscoderConfig,
};
