use crate::{
    config::ConfigError,
    exposition::DecodeError,
    promql::ParseError,
};
use std::io;

/// Any failure of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Syntax(#[from] ParseError),
    #[error("failed to decode metrics: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to write output: {0}")]
    Write(#[from] io::Error),
}
