use async_trait::async_trait;
use history::{
    MicroOpResult,
    Operation,
};

use crate::{
    convex::TransactionArgs,
    http::{
        classify_status,
        HttpOptions,
        HttpTransport,
    },
    wire::decode_results,
    Backend,
    BackendError,
};

/// A FastAPI service exposing `POST /api/<endpoint>`.
pub struct FastApiBackend {
    http: HttpTransport,
    route: String,
}

impl FastApiBackend {
    pub fn new(url: &str, endpoint: &str, options: &HttpOptions) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpTransport::new(url, options)?,
            route: format!("api/{endpoint}"),
        })
    }
}

#[async_trait]
impl Backend for FastApiBackend {
    fn name(&self) -> &str {
        "fast_api"
    }

    async fn invoke(&self, op: &Operation) -> Result<Vec<MicroOpResult>, BackendError> {
        let ops = op.kind.micro_ops();
        let (status, body) = self
            .http
            .post_json(&self.route, &TransactionArgs { transaction: &ops })
            .await?;
        classify_status(status, &body)?;
        decode_results(&ops, body)
    }
}
