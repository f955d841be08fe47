use std::path::PathBuf;

use crate::sys::engine::EngineError;
use crate::sys::scheduler::Disconnected;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not prepare working directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("the affine thread is not running")]
    AffineThreadGone,
    #[error("bridged call issued from the affine thread would deadlock")]
    CalledFromAffineThread,
    #[error("view has been destroyed")]
    ViewDestroyed,
    #[error("no script operation named {0:?}")]
    UnknownScriptOp(String),
    #[error("bad arguments to {op}: {reason}")]
    ScriptArgs { op: &'static str, reason: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<Disconnected> for Error {
    fn from(_: Disconnected) -> Self { Error::AffineThreadGone }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
