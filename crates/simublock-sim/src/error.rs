use simublock_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid simulation config")]
    Config(#[from] ConfigError),
    #[error("node {node} task failed")]
    NodeTask {
        node: usize,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("proof-of-work search panicked")]
    Mining(#[from] tokio::task::JoinError),
}
