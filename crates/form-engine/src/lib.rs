#![allow(missing_docs)]

pub mod config;
pub mod session;
pub mod telemetry;

pub use config::{
    EngineConfig, FormBundle, LoggingConfig, SuggestionsConfig, load_engine_config,
    load_form_bundle, parse_engine_config,
};
pub use session::{FormSession, SessionError, SourceMap};

pub use form_spec;
pub use form_suggest;
