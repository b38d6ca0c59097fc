pub mod core;
pub mod credential;
pub mod driver;
pub mod embedded;
pub mod postgres;
pub mod sqlite;

pub use self::core::{connect, connect_from_env, sanitize_db_url, shutdown, Ready};
pub use driver::{select_driver, Connected, Connector, Driver};
pub use embedded::{EmbeddedEngine, EngineSettings, EngineState};
