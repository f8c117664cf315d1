//! Link pumps. Each runs until its cancellation token fires or the link
//! fails.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
