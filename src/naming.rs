//! A thin naming facade mapping the usual "resolve a name to an address" contract
//! onto a [Horde], for integration with components that expect name-based delivery.
//!
//! Names are keyed by `(horde, name)`: the same name can exist independently in two
//! unrelated hordes running in the same process.

use std::fmt::Debug;

use thiserror::Error;

use crate::{process::ProcessRef, Horde, HordeError};

#[derive(Debug, Error)]
pub enum NamingError<M: Debug> {
    /// The name resolved to nothing. Carries the lookup key and the undelivered
    /// message so the caller can inspect or reroute it.
    #[error("no process is registered under the name {name:?}")]
    AddressNotFound { name: String, message: M },

    #[error(transparent)]
    Coordinator(#[from] HordeError),
}

/// Registers `name` for a process. Fails only on infrastructure failure, never on a
/// name collision: uniqueness is not enforced anywhere in the horde.
pub async fn register_name<M: Send + 'static>(
    horde: &Horde<M>,
    name: impl Into<String>,
    process: ProcessRef<M>,
) -> Result<ProcessRef<M>, HordeError> {
    horde.register(name, process).await
}

/// Resolves `name`, or `None` when nothing is registered under it.
pub async fn where_is<M: Send + 'static>(
    horde: &Horde<M>,
    name: impl Into<String>,
) -> Result<Option<ProcessRef<M>>, HordeError> {
    horde.lookup(name).await
}

pub async fn unregister_name<M: Send + 'static>(
    horde: &Horde<M>,
    name: impl Into<String>,
) -> Result<(), HordeError> {
    horde.unregister(name).await
}

/// Resolves `name` and delivers `message` to the process registered under it.
pub async fn send<M: Send + Debug + 'static>(
    horde: &Horde<M>,
    name: impl Into<String>,
    message: M,
) -> Result<(), NamingError<M>> {
    let name = name.into();
    match horde.lookup(name.clone()).await? {
        Some(process) => {
            process.deliver(message);
            Ok(())
        }
        None => Err(NamingError::AddressNotFound { name, message }),
    }
}
