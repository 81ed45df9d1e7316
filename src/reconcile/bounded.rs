//! Bounded, cancellable fan-out for independent store reads

use std::future::Future;

use tokio::sync::{watch, Semaphore};

use crate::error::StoreError;

/// Run-level cancellation signal; `true` means stop
pub type CancelToken = watch::Receiver<bool>;

/// Resolves once the token flips to `true`. Never resolves if the sender is
/// dropped without cancelling.
pub async fn cancelled(cancel: &mut CancelToken) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Map `inputs` through `task` with at most `limit` calls in flight.
///
/// Results come back in input order. The first error, or cancellation,
/// drops every call still pending.
pub async fn bounded_map<I, T, F, Fut>(
    inputs: Vec<I>,
    limit: usize,
    cancel: &CancelToken,
    task: F,
) -> Result<Vec<T>, StoreError>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;

    let calls = inputs.into_iter().map(|input| {
        let mut cancel = cancel.clone();
        let call = task(input);
        async move {
            if *cancel.borrow() {
                return Err(StoreError::Cancelled);
            }
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| StoreError::Cancelled)?;
            tokio::select! {
                result = call => result,
                _ = cancelled(&mut cancel) => Err(StoreError::Cancelled),
            }
        }
    });

    futures::future::try_join_all(calls).await
}
