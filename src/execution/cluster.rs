use http::Uri;
use snafu::ResultExt;

use crate::error::{ConfigurationError, InvalidReplicaSnafu};

/// Source of the replicas currently backing the target service.
pub trait ClusterProvider: Send + Sync + 'static {
    /// `None` or an empty list means no replica is known.
    fn get_cluster(&self) -> Option<Vec<Uri>>;
}

/// A cluster that never changes.
#[derive(Clone, Debug, Default)]
pub struct FixedClusterProvider {
    replicas: Vec<Uri>,
}

impl FixedClusterProvider {
    pub fn new(replicas: impl IntoIterator<Item = Uri>) -> Self {
        Self {
            replicas: replicas.into_iter().collect(),
        }
    }

    /// Parses absolute replica addresses such as `http://host:8080`.
    pub fn parse<I, S>(addresses: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut replicas = Vec::new();
        for address in addresses {
            let address = address.as_ref();
            let replica: Uri = address
                .parse()
                .context(InvalidReplicaSnafu { address })?;
            if replica.scheme().is_none() || replica.authority().is_none() {
                return Err(ConfigurationError::InvalidOption {
                    option: "replica",
                    reason: format!("'{address}' must be an absolute http(s) address"),
                });
            }
            replicas.push(replica);
        }
        Ok(Self { replicas })
    }

    pub fn replicas(&self) -> &[Uri] {
        &self.replicas
    }
}

impl ClusterProvider for FixedClusterProvider {
    fn get_cluster(&self) -> Option<Vec<Uri>> {
        Some(self.replicas.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_addresses() {
        let provider =
            FixedClusterProvider::parse(["http://a:80", "https://b/prefix"]).unwrap();
        let cluster = provider.get_cluster().unwrap();
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster[1].path(), "/prefix");
    }

    #[test]
    fn rejects_relative_addresses() {
        let error = FixedClusterProvider::parse(["/just/a/path"]).unwrap_err();
        assert!(matches!(
            error,
            ConfigurationError::InvalidOption {
                option: "replica",
                ..
            }
        ));
    }
}
