use std::sync::Arc;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    convex::ConvexBackend,
    fast_api::FastApiBackend,
    http::HttpOptions,
    Backend,
};

fn default_mutation_path() -> String {
    "answer:append".to_string()
}

fn default_endpoint() -> String {
    "append".to_string()
}

/// Which backend family to talk to, chosen once per run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Convex {
        url: String,
        #[serde(default = "default_mutation_path")]
        mutation_path: String,
        #[serde(default)]
        query_path: Option<String>,
    },
    FastApi {
        url: String,
        #[serde(default = "default_endpoint")]
        endpoint: String,
    },
}

impl BackendConfig {
    pub fn convex(url: impl Into<String>) -> Self {
        BackendConfig::Convex {
            url: url.into(),
            mutation_path: default_mutation_path(),
            query_path: None,
        }
    }

    pub fn fast_api(url: impl Into<String>) -> Self {
        BackendConfig::FastApi {
            url: url.into(),
            endpoint: default_endpoint(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            BackendConfig::Convex { url, .. } | BackendConfig::FastApi { url, .. } => url,
        }
    }

    /// Path polled before a run to wait for the backend to come up.
    pub fn health_endpoint(&self) -> &'static str {
        match self {
            BackendConfig::Convex { .. } => "version",
            BackendConfig::FastApi { .. } => "openapi.json",
        }
    }

    pub fn connect(&self, options: &HttpOptions) -> anyhow::Result<Arc<dyn Backend>> {
        let backend: Arc<dyn Backend> = match self {
            BackendConfig::Convex {
                url,
                mutation_path,
                query_path,
            } => Arc::new(ConvexBackend::new(
                url,
                mutation_path.clone(),
                query_path.clone(),
                options,
            )?),
            BackendConfig::FastApi { url, endpoint } => {
                Arc::new(FastApiBackend::new(url, endpoint, options)?)
            },
        };
        tracing::info!("Connected to {} backend at {}", backend.name(), self.url());
        Ok(backend)
    }
}
