use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use url::Url;

const DEFAULT_REGION: &str = "auto";
const CREDENTIALS_PROVIDER: &str = "gallery-store";

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{operation} failed{}: {message}", key_suffix(.key))]
    Api {
        operation: &'static str,
        key: Option<String>,
        status: Option<u16>,
        message: String,
    },
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_deref()
        .map(|key| format!(" for {key}"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Debug, Clone)]
pub struct BucketCredentials {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Clone)]
pub struct BucketClient {
    s3: Client,
    bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
}

impl BucketClient {
    pub fn new(
        credentials: &BucketCredentials,
        bucket: impl Into<String>,
    ) -> Result<Self, BucketError> {
        let endpoint = Url::parse(&credentials.endpoint)?;
        let provider = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(DEFAULT_REGION))
            .endpoint_url(endpoint.as_str().trim_end_matches('/'))
            .force_path_style(true)
            .credentials_provider(provider)
            // R2 does not accept the default upload checksums.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            // Each request is attempted once.
            .retry_config(RetryConfig::disabled())
            .build();
        Ok(Self {
            s3: Client::from_conf(config),
            bucket: bucket.into(),
        })
    }

    pub async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BucketError> {
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| api_error("put", Some(key), err))?;
        Ok(())
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.s3
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| api_error("delete", Some(key), err))?;
        Ok(())
    }

    pub async fn list_objects_page(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, BucketError> {
        let output = self
            .s3
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|err| api_error("list", None, err))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                })
            })
            .collect();
        let next_continuation_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ObjectPage {
            objects,
            next_continuation_token,
        })
    }
}

fn api_error<E>(
    operation: &'static str,
    key: Option<&str>,
    err: SdkError<E, HttpResponse>,
) -> BucketError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    BucketError::Api {
        operation,
        key: key.map(str::to_string),
        status,
        message: DisplayErrorContext(&err).to_string(),
    }
}

impl BucketError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BucketError::Api { status, .. } => *status,
            BucketError::Url(_) => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        self.status().map(classify_api_status)
    }
}

fn classify_api_status(status: u16) -> ApiErrorClass {
    match status {
        401 | 403 => ApiErrorClass::Auth,
        429 => ApiErrorClass::RateLimit,
        408 | 409 | 425 => ApiErrorClass::Transient,
        500..=599 => ApiErrorClass::Transient,
        _ => ApiErrorClass::Permanent,
    }
}
