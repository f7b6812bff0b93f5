pub mod schema;

pub mod llm {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use thiserror::Error;

    use crate::schema::{Schema, SchemaFailure};

    /// Wire value for the gateway's `responseFormat` field.
    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum ResponseFormat {
        Json,
        Text,
    }

    #[derive(Clone, Debug)]
    pub struct InvokeOpts {
        pub format: ResponseFormat,
        pub schema: Option<Schema>,
        /// Append the schema rendering to the outgoing prompt. Validation
        /// runs whenever a schema is present, advertised or not.
        pub advertise_schema: bool,
    }

    impl InvokeOpts {
        pub fn json() -> Self {
            InvokeOpts {
                format: ResponseFormat::Json,
                schema: None,
                advertise_schema: true,
            }
        }

        pub fn text() -> Self {
            InvokeOpts {
                format: ResponseFormat::Text,
                schema: None,
                advertise_schema: false,
            }
        }

        pub fn with_schema(mut self, schema: Schema) -> Self {
            self.schema = Some(schema);
            self.advertise_schema = true;
            self
        }

        /// Attach a schema for post-hoc validation without steering the model.
        pub fn with_validation_schema(mut self, schema: Schema) -> Self {
            self.schema = Some(schema);
            self.advertise_schema = false;
            self
        }
    }

    impl Default for InvokeOpts {
        fn default() -> Self {
            Self::json()
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum InvokeResult {
        Json(Value),
        Text(String),
    }

    impl InvokeResult {
        pub fn as_json(&self) -> Option<&Value> {
            match self {
                InvokeResult::Json(v) => Some(v),
                InvokeResult::Text(_) => None,
            }
        }

        pub fn as_text(&self) -> Option<&str> {
            match self {
                InvokeResult::Json(_) => None,
                InvokeResult::Text(s) => Some(s),
            }
        }
    }

    #[derive(Error, Debug)]
    pub enum InvokeError {
        #[error("network: {0}")]
        Network(String),
        /// Non-2xx reply. `detail` is the decoded error envelope, or
        /// `{"raw": <body>}` when the body was not JSON.
        #[error("gateway {status}: {message}")]
        Gateway {
            status: u16,
            message: String,
            detail: Value,
        },
        /// JSON mode, but the content was not valid JSON after
        /// fence-stripping. `raw` is the unstripped content string.
        #[error("malformed model output: {message}")]
        MalformedOutput { message: String, raw: String },
        #[error("validation: {0}")]
        Validation(SchemaFailure),
        #[error("other: {0}")]
        Other(String),
    }

    #[allow(async_fn_in_trait)]
    pub trait PromptClient: Send + Sync {
        async fn invoke(
            &self,
            prompt: &str,
            opts: &InvokeOpts,
        ) -> Result<InvokeResult, InvokeError>;
    }
}
