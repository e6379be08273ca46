use async_trait::async_trait;
use history::{
    MicroOp,
    MicroOpResult,
    Operation,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    http::{
        classify_status,
        HttpOptions,
        HttpTransport,
    },
    wire::decode_results,
    Backend,
    BackendError,
};

#[derive(Serialize)]
struct UdfPostRequest<'a> {
    path: &'a str,
    args: TransactionArgs<'a>,
    format: &'static str,
}

#[derive(Serialize)]
pub(crate) struct TransactionArgs<'a> {
    pub transaction: &'a [MicroOp],
}

#[derive(Deserialize, Debug)]
#[serde(tag = "status")]
#[serde(rename_all = "camelCase")]
enum UdfResponse {
    Success {
        value: JsonValue,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error_message: String,
    },
}

/// A Convex deployment. Transactions run as a mutation; read-only operations
/// run as a query when `query_path` is set.
pub struct ConvexBackend {
    http: HttpTransport,
    mutation_path: String,
    query_path: Option<String>,
}

impl ConvexBackend {
    pub fn new(
        url: &str,
        mutation_path: String,
        query_path: Option<String>,
        options: &HttpOptions,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpTransport::new(url, options)?,
            mutation_path,
            query_path,
        })
    }

    fn route<'a>(&'a self, op: &Operation) -> (&'static str, &'a str) {
        match &self.query_path {
            Some(query_path) if op.kind.is_read_only() => ("api/query", query_path.as_str()),
            _ => ("api/mutation", self.mutation_path.as_str()),
        }
    }
}

#[async_trait]
impl Backend for ConvexBackend {
    fn name(&self) -> &str {
        "convex"
    }

    async fn invoke(&self, op: &Operation) -> Result<Vec<MicroOpResult>, BackendError> {
        let ops = op.kind.micro_ops();
        let (endpoint, path) = self.route(op);
        let request = UdfPostRequest {
            path,
            args: TransactionArgs { transaction: &ops },
            format: "json",
        };
        let (status, body) = self.http.post_json(endpoint, &request).await?;
        // Function errors carry a body explaining them; prefer it over the
        // bare status.
        if let Ok(UdfResponse::Error { error_message }) =
            serde_json::from_value::<UdfResponse>(body.clone())
        {
            if !status.is_server_error() {
                return Err(BackendError::Definite(error_message));
            }
        }
        classify_status(status, &body)?;
        match serde_json::from_value::<UdfResponse>(body) {
            Ok(UdfResponse::Success { value }) => decode_results(&ops, value),
            Ok(UdfResponse::Error { error_message }) => Err(BackendError::Definite(error_message)),
            Err(e) => Err(BackendError::Indefinite(format!(
                "malformed Convex response: {e}"
            ))),
        }
    }
}
