use crate::classify::{classify, describe_failure};
use httpmon_common::types::{CheckResult, Endpoint, HttpMethod, ResultKind};
use httpmon_secret::{DecryptedCredential, SecretStore};
use httpmon_storage::StateStore;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing;

/// Executes HTTP checks. One instance per process; the inner `reqwest`
/// client carries the shared connection pool, so clones are cheap and all
/// concurrent probes reuse it.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    store: Arc<StateStore>,
    secrets: Arc<SecretStore>,
}

impl Prober {
    pub fn new(store: Arc<StateStore>, secrets: Arc<SecretStore>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("httpmon/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            store,
            secrets,
        })
    }

    /// Runs one check. Never fails: every outcome, including an unreadable
    /// credential, comes back as a `CheckResult`.
    pub async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        tracing::debug!(
            endpoint_id = %endpoint.id,
            url = %endpoint.url,
            method = %endpoint.method,
            "Executing check"
        );

        let started = Instant::now();

        let request = match self.build_request(endpoint) {
            Ok(request) => request,
            Err(result) => return *result,
        };

        match request.send().await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let status = response.status().as_u16();
                let kind = classify(
                    endpoint.expected_status,
                    status,
                    latency_ms,
                    endpoint.max_latency_ms,
                    None,
                );
                // Drop the response without reading the body; only status and
                // latency are recorded.
                drop(response);

                if kind == ResultKind::Success {
                    CheckResult::success(&endpoint.id, status, latency_ms)
                } else {
                    let message = describe_failure(kind, status, endpoint.expected_status);
                    CheckResult::failure(&endpoint.id, kind, status, latency_ms, message)
                }
            }
            Err(error) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.transport_failure(endpoint, &error, latency_ms)
            }
        }
    }

    fn build_request(
        &self,
        endpoint: &Endpoint,
    ) -> Result<reqwest::RequestBuilder, Box<CheckResult>> {
        let method = match endpoint.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let mut request = self
            .client
            .request(method, &endpoint.url)
            .timeout(Duration::from_millis(endpoint.timeout_ms as u64));

        // Custom headers are an opaque JSON object. A broken map is logged
        // and ignored; the check proceeds without it.
        if let Some(raw) = endpoint.headers_json.as_deref() {
            if !raw.is_empty() {
                match serde_json::from_str::<HashMap<String, String>>(raw) {
                    Ok(headers) => {
                        for (name, value) in headers {
                            match (
                                HeaderName::from_bytes(name.as_bytes()),
                                HeaderValue::from_str(&value),
                            ) {
                                (Ok(name), Ok(value)) => {
                                    request = request.header(name, value);
                                }
                                _ => {
                                    tracing::warn!(
                                        endpoint_id = %endpoint.id,
                                        header = %name,
                                        "Skipping invalid custom header"
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint_id = %endpoint.id,
                            error = %e,
                            "Failed to parse custom headers, proceeding without them"
                        );
                    }
                }
            }
        }

        // Credential header overwrites any conflicting custom header. The
        // decrypted value lives only inside this call.
        if let Some(credential_id) = &endpoint.credential_id {
            match self.open_credential(credential_id) {
                Ok(credential) => {
                    let (name, value) = credential.header();
                    request = request.header(name, value);
                }
                Err(message) => {
                    tracing::error!(
                        endpoint_id = %endpoint.id,
                        credential_id = %credential_id,
                        error = %message,
                        "Credential could not be opened"
                    );
                    return Err(Box::new(CheckResult::failure(
                        &endpoint.id,
                        ResultKind::UnknownError,
                        0,
                        0,
                        format!("Credential could not be opened: {message}"),
                    )));
                }
            }
        }

        if matches!(
            endpoint.method,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
        ) {
            if let Some(body) = &endpoint.request_body {
                if !body.is_empty() {
                    request = request
                        .header(CONTENT_TYPE, "application/json")
                        .body(body.clone());
                }
            }
        }

        Ok(request)
    }

    fn open_credential(&self, credential_id: &str) -> Result<DecryptedCredential, String> {
        let credential = self
            .store
            .get_credential(credential_id)
            .map_err(|e| e.to_string())?;
        let value = self
            .secrets
            .open(&credential.sealed_value)
            .map_err(|e| e.to_string())?;
        let username = match credential.sealed_username.as_deref() {
            Some(sealed) => Some(self.secrets.open(sealed).map_err(|e| e.to_string())?),
            None => None,
        };
        Ok(DecryptedCredential {
            kind: credential.kind,
            value,
            username,
            header_name: credential.header_name,
        })
    }

    /// Structured discrimination first; the classifier's substring rules
    /// only see errors reqwest cannot type.
    fn transport_failure(
        &self,
        endpoint: &Endpoint,
        error: &reqwest::Error,
        latency_ms: u64,
    ) -> CheckResult {
        tracing::debug!(endpoint_id = %endpoint.id, error = %error, "Check error");

        let text = error_chain_text(error);

        let (kind, message) = if error.is_timeout() {
            (
                ResultKind::Timeout,
                format!("Request timed out after {}ms", endpoint.timeout_ms),
            )
        } else if error.is_connect() {
            // Connect failures include TLS handshake problems; let the text
            // distinguish certificate trouble from a plain refusal.
            let kind = match classify(endpoint.expected_status, 0, latency_ms, None, Some(&text)) {
                ResultKind::SslError => ResultKind::SslError,
                _ => ResultKind::ConnectionError,
            };
            (kind, format!("Connection failed: {text}"))
        } else {
            let kind = classify(endpoint.expected_status, 0, latency_ms, None, Some(&text));
            (kind, format!("Request failed: {text}"))
        };

        CheckResult::failure(&endpoint.id, kind, 0, latency_ms, message)
    }
}

/// Flattens an error and its source chain into one line, so substring
/// classification sees the root cause (reqwest's display is often just
/// "error sending request").
fn error_chain_text(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
