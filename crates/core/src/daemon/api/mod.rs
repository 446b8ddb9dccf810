//! JSON-RPC method registration, one file per service.

pub mod agent;
pub mod daemon;
pub mod logs;
pub mod projects;
pub mod tasks;
pub mod workspaces;

use jsonrpsee::types::ErrorObjectOwned;

pub(crate) const ERR_INTERNAL: i32 = -32000;
pub(crate) const ERR_NOT_FOUND: i32 = -32001;
pub(crate) const ERR_AGENT: i32 = -32010;

pub(crate) fn internal_err(err: impl ToString) -> ErrorObjectOwned {
  ErrorObjectOwned::owned(ERR_INTERNAL, err.to_string(), None::<()>)
}

pub(crate) fn not_found_err(err: impl ToString) -> ErrorObjectOwned {
  ErrorObjectOwned::owned(ERR_NOT_FOUND, err.to_string(), None::<()>)
}

pub(crate) fn agent_err(err: impl ToString) -> ErrorObjectOwned {
  ErrorObjectOwned::owned(ERR_AGENT, err.to_string(), None::<()>)
}
