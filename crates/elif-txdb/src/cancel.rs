//! Bridging caller cancellation into the ambient transaction
//!
//! Every logical connection owns a root [`CancellationToken`]. Cancelling it
//! ends the ambient transaction for every lease of that identifier: in-flight
//! operations return [`TxDbError::Canceled`] and later ones [`TxDbError::TxDone`].

use std::future::Future;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{TxDbError, TxDbResult};

/// Run `op` while watching the caller's token.
///
/// The watcher waits for whichever comes first of operation completion,
/// cancellation of the transaction root, or cancellation of `ctx`. Only in the
/// last case is the root cancelled, so a caller that gives up on an operation
/// still in flight poisons the shared transaction for all of its co-tenants.
/// The watcher is joined before this function returns.
pub(crate) async fn watch<F, T>(ctx: &CancellationToken, root: &CancellationToken, op: F) -> TxDbResult<T>
where
    F: Future<Output = TxDbResult<T>>,
{
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let watcher = async move {
        tokio::select! {
            biased;
            _ = done_rx => {}
            _ = root.cancelled() => {}
            _ = ctx.cancelled() => {
                debug!("Caller cancelled before the operation finished, cancelling transaction");
                root.cancel();
            }
        }
    };

    let operation = async move {
        let result = tokio::select! {
            biased;
            result = op => result,
            _ = root.cancelled() => Err(TxDbError::Canceled),
        };
        let _ = done_tx.send(());
        result
    };

    let ((), result) = tokio::join!(watcher, operation);
    result
}
