// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AWS-KMS-compatible client speaking the JSON 1.1 protocol.
//!
//! | Operation      | Used for                                   |
//! |----------------|--------------------------------------------|
//! | `Encrypt`      | Sealing user and operator private keys     |
//! | `Decrypt`      | Recovering a key for a single signing call |
//! | `Sign`         | Remote signer (`ECDSA_SHA_256`, `DIGEST`)  |
//! | `GetPublicKey` | Learning a remote key's public half        |

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

use super::sigv4::{self, Credentials, SigningInput};
use super::{CustodyError, EncryptionContext, KeyCustody, RemoteKeyService};

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const SERVICE: &str = "kms";

/// KMS connection settings.
#[derive(Debug, Clone)]
pub struct KmsConfig {
    pub region: String,
    /// Override endpoint (LocalStack, VPC endpoint). Defaults to the regional endpoint.
    pub endpoint: Option<Url>,
    pub credentials: Credentials,
    /// Symmetric key used for envelope encryption.
    pub encryption_key_id: Option<String>,
    pub request_timeout: Duration,
}

/// KMS client.
#[derive(Debug, Clone)]
pub struct KmsClient {
    http: reqwest::Client,
    endpoint: Url,
    config: KmsConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptRequest<'a> {
    key_id: &'a str,
    plaintext: &'a str,
    encryption_context: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptResponse {
    ciphertext_blob: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptRequest<'a> {
    ciphertext_blob: &'a str,
    encryption_context: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SignRequest<'a> {
    key_id: &'a str,
    message: String,
    message_type: &'static str,
    signing_algorithm: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignResponse {
    signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetPublicKeyRequest<'a> {
    key_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetPublicKeyResponse {
    public_key: String,
}

#[derive(Deserialize)]
struct KmsErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
}

impl KmsClient {
    pub fn new(config: KmsConfig) -> Result<Self, CustodyError> {
        let endpoint = match &config.endpoint {
            Some(url) => url.clone(),
            None => Url::parse(&format!("https://kms.{}.amazonaws.com/", config.region))
                .map_err(|e| CustodyError::Config(format!("invalid KMS region: {e}")))?,
        };
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CustodyError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    fn encryption_key_id(&self) -> Result<&str, CustodyError> {
        self.config
            .encryption_key_id
            .as_deref()
            .ok_or_else(|| CustodyError::Config("no KMS encryption key configured".to_string()))
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: &Req,
    ) -> Result<Resp, CustodyError> {
        let body = Zeroizing::new(
            serde_json::to_vec(request)
                .map_err(|e| CustodyError::Config(format!("request encoding: {e}")))?,
        );
        let target = format!("TrentService.{operation}");

        let signed = sigv4::sign(
            &SigningInput {
                method: "POST",
                url: &self.endpoint,
                headers: &[("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())],
                payload: &body,
            },
            &self.config.credentials,
            &self.config.region,
            SERVICE,
            Utc::now(),
        )?;

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target);
        for (name, value) in signed.pairs() {
            builder = builder.header(name, value);
        }

        let response = builder.body(body.to_vec()).send().await.map_err(|e| {
            warn!(operation, error = %e, "KMS request failed");
            CustodyError::Unavailable(format!("{operation}: transport error"))
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|_| CustodyError::Unavailable(format!("{operation}: truncated response")))?;

        if status.is_success() {
            debug!(operation, "KMS request succeeded");
            return serde_json::from_slice(&bytes).map_err(|_| {
                CustodyError::Unavailable(format!("{operation}: unexpected response shape"))
            });
        }

        let error_type = serde_json::from_slice::<KmsErrorBody>(&bytes)
            .map(|b| b.error_type)
            .unwrap_or_default();
        warn!(operation, status = status.as_u16(), error_type = %error_type, "KMS returned an error");
        Err(classify_error(operation, status.as_u16(), &error_type))
    }
}

/// Map a KMS error response onto the custody taxonomy.
fn classify_error(operation: &str, status: u16, error_type: &str) -> CustodyError {
    let short = error_type.rsplit('#').next().unwrap_or(error_type);
    match short {
        "InvalidCiphertextException" | "IncorrectKeyException" => CustodyError::ContextMismatch,
        "NotFoundException" | "DisabledException" | "KMSInvalidStateException"
        | "InvalidKeyUsageException" => CustodyError::Rejected(format!("{operation}: {short}")),
        s if s.starts_with("AccessDenied") => CustodyError::Rejected(format!("{operation}: {s}")),
        "ThrottlingException" | "DependencyTimeoutException" | "KMSInternalException" => {
            CustodyError::Unavailable(format!("{operation}: {short}"))
        }
        _ if status >= 500 => CustodyError::Unavailable(format!("{operation}: HTTP {status}")),
        _ => CustodyError::Rejected(format!("{operation}: HTTP {status}")),
    }
}

#[async_trait]
impl KeyCustody for KmsClient {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String, CustodyError> {
        let encoded = Zeroizing::new(Base64::encode_string(plaintext));
        let response: EncryptResponse = self
            .call(
                "Encrypt",
                &EncryptRequest {
                    key_id: self.encryption_key_id()?,
                    plaintext: &encoded,
                    encryption_context: context.as_map(),
                },
            )
            .await?;
        Ok(response.ciphertext_blob)
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        let response: DecryptResponse = self
            .call(
                "Decrypt",
                &DecryptRequest {
                    ciphertext_blob: ciphertext,
                    encryption_context: context.as_map(),
                    key_id: self.config.encryption_key_id.as_deref(),
                },
            )
            .await?;
        let encoded = Zeroizing::new(response.plaintext);
        Base64::decode_vec(&encoded)
            .map(Zeroizing::new)
            .map_err(|_| CustodyError::Unavailable("Decrypt: plaintext is not base64".to_string()))
    }
}

#[async_trait]
impl RemoteKeyService for KmsClient {
    async fn sign_digest(&self, key_id: &str, digest: &[u8; 32]) -> Result<Vec<u8>, CustodyError> {
        let response: SignResponse = self
            .call(
                "Sign",
                &SignRequest {
                    key_id,
                    message: Base64::encode_string(digest),
                    message_type: "DIGEST",
                    signing_algorithm: "ECDSA_SHA_256",
                },
            )
            .await?;
        Base64::decode_vec(&response.signature)
            .map_err(|_| CustodyError::Unavailable("Sign: signature is not base64".to_string()))
    }

    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>, CustodyError> {
        let response: GetPublicKeyResponse = self
            .call("GetPublicKey", &GetPublicKeyRequest { key_id })
            .await?;
        Base64::decode_vec(&response.public_key).map_err(|_| {
            CustodyError::Unavailable("GetPublicKey: public key is not base64".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::{json, Value};

    #[test]
    fn error_classification() {
        assert!(matches!(
            classify_error("Decrypt", 400, "com.amazonaws.kms#InvalidCiphertextException"),
            CustodyError::ContextMismatch
        ));
        assert!(matches!(
            classify_error("Encrypt", 400, "AccessDeniedException"),
            CustodyError::Rejected(_)
        ));
        assert!(matches!(
            classify_error("Encrypt", 400, "DisabledException"),
            CustodyError::Rejected(_)
        ));
        assert!(matches!(
            classify_error("Sign", 503, ""),
            CustodyError::Unavailable(_)
        ));
        assert!(matches!(
            classify_error("Sign", 400, "ThrottlingException"),
            CustodyError::Unavailable(_)
        ));
    }

    /// Minimal KMS double: "ciphertext" is base64 JSON of plaintext plus context.
    async fn fake_kms(
        headers: HeaderMap,
        raw: axum::body::Bytes,
    ) -> (axum::http::StatusCode, Json<Value>) {
        use axum::http::StatusCode;

        let body: Value = serde_json::from_slice(&raw).unwrap_or(Value::Null);

        if !headers.contains_key("authorization") || !headers.contains_key("x-amz-date") {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"__type": "MissingAuthenticationTokenException"})),
            );
        }
        let target = headers
            .get("x-amz-target")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match target.as_str() {
            "TrentService.Encrypt" => {
                let sealed = json!({
                    "pt": body["Plaintext"],
                    "ctx": body["EncryptionContext"],
                });
                let blob = Base64::encode_string(sealed.to_string().as_bytes());
                (StatusCode::OK, Json(json!({"CiphertextBlob": blob, "KeyId": body["KeyId"]})))
            }
            "TrentService.Decrypt" => {
                let blob = body["CiphertextBlob"].as_str().unwrap_or_default();
                let sealed: Value = Base64::decode_vec(blob)
                    .ok()
                    .and_then(|b| serde_json::from_slice(&b).ok())
                    .unwrap_or(Value::Null);
                if sealed.is_null() || sealed["ctx"] != body["EncryptionContext"] {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"__type": "com.amazonaws.kms#InvalidCiphertextException"})),
                    );
                }
                (StatusCode::OK, Json(json!({"Plaintext": sealed["pt"]})))
            }
            "TrentService.GetPublicKey" => (
                StatusCode::BAD_REQUEST,
                Json(json!({"__type": "NotFoundException"})),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"__type": "KMSInternalException"})),
            ),
        }
    }

    async fn spawn_fake_kms() -> KmsClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", post(fake_kms)))
                .await
                .unwrap();
        });

        KmsClient::new(KmsConfig {
            region: "us-east-1".to_string(),
            endpoint: Some(Url::parse(&format!("http://{addr}/")).unwrap()),
            credentials: Credentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            encryption_key_id: Some("alias/user-keys".to_string()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn encrypt_decrypt_through_kms_protocol() {
        let kms = spawn_fake_kms().await;
        let ctx = EncryptionContext::user_wallet("alice");

        let blob = kms.encrypt(b"\x01\x02\x03", &ctx).await.unwrap();
        let plaintext = kms.decrypt(&blob, &ctx).await.unwrap();
        assert_eq!(plaintext.as_slice(), &[1, 2, 3]);

        let err = kms
            .decrypt(&blob, &EncryptionContext::user_wallet("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::ContextMismatch));
    }

    #[tokio::test]
    async fn service_errors_are_classified() {
        let kms = spawn_fake_kms().await;
        assert!(matches!(
            kms.public_key("missing").await.unwrap_err(),
            CustodyError::Rejected(_)
        ));
        assert!(matches!(
            kms.sign_digest("key", &[0u8; 32]).await.unwrap_err(),
            CustodyError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let kms = KmsClient::new(KmsConfig {
            region: "us-east-1".to_string(),
            endpoint: Some(Url::parse("http://127.0.0.1:1/").unwrap()),
            credentials: Credentials {
                access_key_id: "a".to_string(),
                secret_access_key: "b".to_string(),
                session_token: None,
            },
            encryption_key_id: Some("k".to_string()),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();

        let err = kms
            .encrypt(b"k", &EncryptionContext::user_wallet("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::Unavailable(_)));
    }
}
