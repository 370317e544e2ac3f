use pkg_types::subnamespace::Subnamespace;
use tracing::debug;

use crate::Admission;

impl Admission {
    /// Fill in the resource-pool label before a Subnamespace is stored.
    ///
    /// The resource-pool-only toggle forces it on; otherwise a missing label
    /// inherits the parent's pool flag.
    pub async fn mutate_subnamespace(&self, sns: &mut Subnamespace) -> anyhow::Result<()> {
        if self.config.resource_pool_only {
            sns.set_pool_label(true);
            return Ok(());
        }
        if sns.requested_pool().is_some() {
            return Ok(());
        }
        let inherited = self
            .store
            .get_namespace(&sns.namespace)
            .await?
            .map(|p| p.is_resource_pool())
            .unwrap_or(false);
        debug!(
            "Defaulting resource pool label of {}/{} to {}",
            sns.namespace, sns.name, inherited
        );
        sns.set_pool_label(inherited);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_forest::NamespaceForest;
    use pkg_state::client::StateStore;
    use pkg_types::config::HnsConfig;
    use pkg_types::namespace::Namespace;
    use pkg_types::resources::ResourceList;
    use std::sync::Arc;

    async fn admission(config: HnsConfig) -> Admission {
        let store = StateStore::in_memory().await.unwrap();
        let mut pooled = Namespace::new_root("pooled");
        pooled.set_resource_pool(true);
        store.put_namespace(&pooled).await.unwrap();
        store.put_namespace(&Namespace::new_root("plain")).await.unwrap();
        Admission::new(store, Arc::new(NamespaceForest::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn pool_label_is_inherited_when_absent() {
        let adm = admission(HnsConfig::default()).await;

        let mut under_pool = Subnamespace::new("pooled", "x", ResourceList::new());
        adm.mutate_subnamespace(&mut under_pool).await.unwrap();
        assert_eq!(under_pool.requested_pool(), Some(true));

        let mut under_plain = Subnamespace::new("plain", "y", ResourceList::new());
        adm.mutate_subnamespace(&mut under_plain).await.unwrap();
        assert_eq!(under_plain.requested_pool(), Some(false));

        let mut explicit = Subnamespace::new("plain", "z", ResourceList::new());
        explicit.set_pool_label(true);
        adm.mutate_subnamespace(&mut explicit).await.unwrap();
        assert_eq!(explicit.requested_pool(), Some(true));
    }

    #[tokio::test]
    async fn resource_pool_only_forces_the_label() {
        let adm = admission(HnsConfig {
            resource_pool_only: true,
            ..HnsConfig::default()
        })
        .await;
        let mut sns = Subnamespace::new("plain", "y", ResourceList::new());
        sns.set_pool_label(false);
        adm.mutate_subnamespace(&mut sns).await.unwrap();
        assert_eq!(sns.requested_pool(), Some(true));
    }
}
