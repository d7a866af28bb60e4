//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client,
};
use chrono::DateTime;

use crate::config::S3Config;
use crate::store::StoreError;

use super::types::{ListOptions, ObjectList, ObjectMetadata};

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Result<Self, StoreError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "asset-store",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    DisplayErrorContext(&e)
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Upload an object
    pub async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("put object", key, e))?;

        Ok(())
    }

    /// Get object metadata (HEAD request)
    pub async fn head_object(&self, key: &str) -> Result<ObjectMetadata, StoreError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("head object", key, e))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response.last_modified().and_then(|dt| {
                DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
            }),
        })
    }

    /// Get an object's data
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("get object", key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read object body {}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    /// Check if an object exists
    pub async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.head_object(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete an object; deleting a missing key succeeds
    pub async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("delete object", key, e))?;

        Ok(())
    }

    /// Delete every object under a prefix, returning how many were removed
    pub async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let objects = self.list_all_objects(Some(prefix)).await?;

        for object in &objects {
            self.delete_object(&object.key).await?;
        }

        Ok(objects.len())
    }

    /// List objects in the bucket
    pub async fn list_objects(&self, options: ListOptions) -> Result<ObjectList, StoreError> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);

        if let Some(prefix) = &options.prefix {
            request = request.prefix(prefix);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        let scope = options.prefix.as_deref().unwrap_or("");
        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error("list objects", scope, e))?;

        let objects: Vec<ObjectMetadata> = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0),
                last_modified: obj.last_modified().and_then(|dt| {
                    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
                }),
            })
            .collect();

        Ok(ObjectList {
            objects,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    /// List all objects with a given prefix (handles pagination)
    pub async fn list_all_objects(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMetadata>, StoreError> {
        let mut all_objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(1000);

            if let Some(p) = prefix {
                options = options.with_prefix(p);
            }

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list_objects(options).await?;
            all_objects.extend(result.objects);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
        }

        Ok(all_objects)
    }
}

/// Classify an SDK failure into the store error taxonomy
fn map_sdk_error<E>(action: &str, key: &str, e: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let not_found = e
        .raw_response()
        .is_some_and(|response| response.status().as_u16() == 404)
        || matches!(e.code(), Some("NoSuchKey") | Some("NotFound"));

    if not_found {
        return StoreError::NotFound(key.to_string());
    }

    let message = format!("Failed to {} {}: {}", action, key, DisplayErrorContext(&e));
    match e {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unavailable(message)
        }
        _ => StoreError::Backend(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_options_builder() {
        let options = ListOptions::new()
            .with_prefix("assets/chunks/")
            .with_max_keys(100)
            .with_continuation_token("next");

        assert_eq!(options.prefix, Some("assets/chunks/".to_string()));
        assert_eq!(options.max_keys, Some(100));
        assert_eq!(options.continuation_token, Some("next".to_string()));
    }

    mod sdk_errors {
        use super::*;
        use aws_sdk_s3::error::{ConnectorError, ErrorMetadata};
        use aws_sdk_s3::operation::get_object::GetObjectError;
        use aws_sdk_s3::primitives::SdkBody;
        use aws_sdk_s3::types::error::NoSuchKey;

        type GetError = SdkError<GetObjectError, HttpResponse>;

        fn response(status: u16) -> HttpResponse {
            HttpResponse::new(status.try_into().unwrap(), SdkBody::empty())
        }

        fn no_such_key() -> GetObjectError {
            GetObjectError::NoSuchKey(
                NoSuchKey::builder()
                    .meta(ErrorMetadata::builder().code("NoSuchKey").build())
                    .build(),
            )
        }

        fn map(e: GetError) -> StoreError {
            map_sdk_error("read", "assets/chunks/a/0", e)
        }

        #[test]
        fn test_timeout_is_unavailable() {
            let result = map(GetError::timeout_error("operation timed out"));
            assert!(matches!(result, StoreError::Unavailable(_)));
        }

        #[test]
        fn test_dispatch_failure_is_unavailable() {
            let e = GetError::dispatch_failure(ConnectorError::io("connection refused".into()));
            assert!(matches!(map(e), StoreError::Unavailable(_)));
        }

        #[test]
        fn test_404_status_is_not_found() {
            let e = GetError::service_error(
                GetObjectError::generic(ErrorMetadata::builder().build()),
                response(404),
            );
            assert!(matches!(map(e), StoreError::NotFound(key) if key == "assets/chunks/a/0"));
        }

        #[test]
        fn test_no_such_key_code_is_not_found() {
            let e = GetError::service_error(no_such_key(), response(404));
            assert!(matches!(map(e), StoreError::NotFound(_)));

            // Some S3-compatible servers pair the code with another status
            let e = GetError::service_error(no_such_key(), response(400));
            assert!(matches!(map(e), StoreError::NotFound(_)));
        }

        #[test]
        fn test_other_service_error_is_backend() {
            let e = GetError::service_error(
                GetObjectError::generic(ErrorMetadata::builder().code("InternalError").build()),
                response(500),
            );
            assert!(matches!(map(e), StoreError::Backend(_)));
        }
    }
}
