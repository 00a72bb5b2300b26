//! Subscriptions to committed catalog updates.
//!
//! Components register a named subscription and receive every batch the
//! catalog commits, in commit order. Delivery is acknowledged: the commit
//! path waits until each subscriber has dropped its message, so a
//! subscriber observes an update before any state built on top of the
//! catalog can depend on it.

use std::sync::Arc;

use anyhow::Context;
use futures::future::try_join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::catalog::{Catalog, CatalogSequenceNumber};
use crate::log::{CatalogBatch, CatalogOp, OrderedCatalogBatch};

#[derive(Debug, thiserror::Error)]
#[error("error in catalog update subscribers: {0:?}")]
pub struct SubscriptionError(#[from] anyhow::Error);

const CATALOG_SUBSCRIPTION_BUFFER_SIZE: usize = 10_000;

type CatalogUpdateSender = mpsc::Sender<CatalogUpdateMessage>;
pub type CatalogUpdateReceiver = mpsc::Receiver<CatalogUpdateMessage>;

/// One committed batch, as seen by subscribers.
#[derive(Debug)]
pub struct CatalogUpdate {
    batch: OrderedCatalogBatch,
}

impl CatalogUpdate {
    pub(crate) fn new(batch: OrderedCatalogBatch) -> Self {
        Self { batch }
    }

    pub fn sequence_number(&self) -> CatalogSequenceNumber {
        self.batch.sequence_number()
    }

    pub fn batch(&self) -> &CatalogBatch {
        self.batch.batch()
    }

    pub fn ops(&self) -> impl Iterator<Item = &CatalogOp> {
        self.batch.batch().ops.iter()
    }
}

/// A [`CatalogUpdate`] in flight to one subscriber.
///
/// The acknowledgement is sent from the `Drop` implementation, so a
/// subscriber acks by simply letting the message go out of scope once it
/// has handled it.
pub struct CatalogUpdateMessage {
    update: Arc<CatalogUpdate>,
    tx: Option<oneshot::Sender<()>>,
}

impl CatalogUpdateMessage {
    fn new(update: Arc<CatalogUpdate>, tx: oneshot::Sender<()>) -> Self {
        Self {
            update,
            tx: Some(tx),
        }
    }

    pub fn update(&self) -> &Arc<CatalogUpdate> {
        &self.update
    }

    pub fn ops(&self) -> impl Iterator<Item = &CatalogOp> {
        self.update.ops()
    }
}

impl Drop for CatalogUpdateMessage {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx
                .send(())
                .inspect_err(|error| warn!(?error, "unable to send ACK for catalog update"));
        }
    }
}

impl std::fmt::Debug for CatalogUpdateMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogUpdateMessage")
            .field("update", &self.update)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CatalogSubscriptions {
    subscriptions: hashbrown::HashMap<Arc<str>, CatalogUpdateSender>,
}

impl CatalogSubscriptions {
    /// Registers a named subscription.
    ///
    /// # Panics
    ///
    /// If `subscription_name` has already been used on this catalog.
    pub(crate) fn subscribe(&mut self, subscription_name: &'static str) -> CatalogUpdateReceiver {
        let (tx, rx) = mpsc::channel(CATALOG_SUBSCRIPTION_BUFFER_SIZE);
        assert!(
            self.subscriptions
                .insert(Arc::from(subscription_name), tx)
                .is_none(),
            "attempted to subscribe to catalog with same component name more than once, \
            name: {subscription_name}"
        );
        rx
    }

    pub(crate) async fn send_update(
        &self,
        update: Arc<CatalogUpdate>,
    ) -> Result<(), SubscriptionError> {
        let mut responses = vec![];
        for (name, sub) in self
            .subscriptions
            .iter()
            .map(|(n, s)| (Arc::clone(n), s.clone()))
        {
            let update = Arc::clone(&update);
            responses.push(tokio::spawn(async move {
                let (tx, rx) = oneshot::channel();
                sub.send(CatalogUpdateMessage::new(update, tx))
                    .await
                    .with_context(|| format!("failed to send update to {name}"))?;
                rx.await
                    .with_context(|| format!("failed to receive response from {name}"))?;
                Ok(())
            }));
        }

        try_join_all(responses)
            .await
            .context("failed to collect responses from catalog subscribers")?
            .into_iter()
            .collect::<Result<Vec<()>, anyhow::Error>>()?;
        Ok(())
    }

    pub(crate) fn prune_closed(&mut self) {
        self.subscriptions.retain(|_, s| !s.is_closed());
    }
}

impl Catalog {
    /// Subscribes to every update committed after this call, identified by
    /// a component name.
    pub async fn subscribe_to_updates(&self, subscription_name: &'static str) -> CatalogUpdateReceiver {
        self.subscriptions.write().await.subscribe(subscription_name)
    }

    /// Delivers a committed update to every subscriber and waits for their
    /// acknowledgements. A subscriber that went away is pruned rather than
    /// failing the commit.
    pub(crate) async fn broadcast_update(&self, update: Arc<CatalogUpdate>) {
        if let Err(error) = self.subscriptions.read().await.send_update(update).await {
            warn!(%error, "catalog update was not delivered to all subscribers");
            self.subscriptions.write().await.prune_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::Catalog;
    use crate::log::CatalogOp;
    use crate::logical::{ColumnSpec, DataModel, PolyType};
    use tracing::debug;

    #[test_log::test(tokio::test)]
    async fn subscribers_see_every_commit() {
        let catalog = Catalog::new_in_memory("sub-test").await.unwrap();
        let mut sub = catalog.subscribe_to_updates("test_sub").await;
        let handle = tokio::spawn(async move {
            let mut n_updates = 0;
            while let Some(update) = sub.recv().await {
                debug!(?update, "got an update");
                assert!(update.ops().count() > 0);
                n_updates += 1;
            }
            n_updates
        });

        catalog
            .create_namespace("foo", DataModel::Relational, false)
            .await
            .unwrap();
        catalog
            .create_table(
                "foo",
                "bar",
                &[
                    ColumnSpec::new("id", PolyType::BigInt),
                    ColumnSpec::new("name", PolyType::VarChar),
                ],
                &["id"],
            )
            .await
            .unwrap();

        // Close the channel so the consumer task finishes.
        drop(catalog);

        let n_updates = handle.await.unwrap();
        assert_eq!(2, n_updates);
    }

    #[test_log::test(tokio::test)]
    async fn updates_arrive_in_commit_order() {
        let catalog = Catalog::new_in_memory("order-test").await.unwrap();
        let mut sub = catalog.subscribe_to_updates("order_sub").await;
        let handle = tokio::spawn(async move {
            let mut names = vec![];
            while let Some(update) = sub.recv().await {
                for op in update.ops() {
                    if let CatalogOp::CreateNamespace(log) = op {
                        names.push(log.name.to_string());
                    }
                }
            }
            names
        });

        for name in ["a", "b", "c"] {
            catalog
                .create_namespace(name, DataModel::Relational, false)
                .await
                .unwrap();
        }
        drop(catalog);

        assert_eq!(handle.await.unwrap(), vec!["a", "b", "c"]);
    }
}
