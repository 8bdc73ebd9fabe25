// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP plumbing shared by the appliance drivers.
//!
//! [`ApplianceClient`] sends one request per call (no retries) and classifies
//! every response as success, "already exists", "not found", or failure. The
//! typed helpers ([`ApplianceClient::create`], [`ApplianceClient::delete`],
//! [`ApplianceClient::get`]) decide which of those classes count as success for
//! the operation at hand.

use crate::errors::DriverError;
use crate::metrics;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, error, info};

/// Body fragments appliances use to say an object already exists.
const ALREADY_EXISTS_MARKERS: &[&str] = &["already exists", "duplicate"];

/// Body fragments appliances use to say an object does not exist.
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "was not found",
    "does not exist",
    "no such resource",
];

/// How an appliance authenticates API calls.
#[derive(Clone)]
pub enum ApplianceAuth {
    /// HTTP basic authentication (iControl REST)
    Basic { username: String, password: String },
    /// Static headers sent with every request (NITRO `X-NITRO-USER`/`X-NITRO-PASS`)
    Headers(Vec<(String, String)>),
}

impl Debug for ApplianceAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credentials
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Headers(headers) => f
                .debug_list()
                .entries(headers.iter().map(|(name, _)| name))
                .finish(),
        }
    }
}

/// Classification of an appliance response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    AlreadyExists,
    NotFound,
    Failure,
}

/// A completed appliance response.
#[derive(Debug, Clone)]
pub struct ApplianceResponse {
    pub status: StatusCode,
    pub body: String,
    pub class: ResponseClass,
}

/// Classifies a response by status code, then by well-known body fragments.
#[must_use]
pub fn classify(status: StatusCode, body: &str) -> ResponseClass {
    if status.is_success() {
        return ResponseClass::Success;
    }
    if status == StatusCode::CONFLICT {
        return ResponseClass::AlreadyExists;
    }
    if status == StatusCode::NOT_FOUND {
        return ResponseClass::NotFound;
    }

    let lowered = body.to_ascii_lowercase();
    if ALREADY_EXISTS_MARKERS.iter().any(|m| lowered.contains(m)) {
        ResponseClass::AlreadyExists
    } else if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        ResponseClass::NotFound
    } else {
        ResponseClass::Failure
    }
}

/// HTTP client bound to one appliance management endpoint.
#[derive(Debug, Clone)]
pub struct ApplianceClient {
    http: HttpClient,
    base_url: String,
    auth: ApplianceAuth,
    appliance: &'static str,
}

impl ApplianceClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        appliance: &'static str,
        base_url: &str,
        auth: ApplianceAuth,
        timeout: Duration,
        insecure_tls: bool,
    ) -> Result<Self, DriverError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|e| DriverError::Transport {
                operation: format!("build {appliance} client"),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            appliance,
        })
    }

    #[must_use]
    pub fn appliance(&self) -> &'static str {
        self.appliance
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends one request and classifies the response.
    ///
    /// Only transport failures are returned as errors; HTTP error statuses are
    /// reported through [`ApplianceResponse::class`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Transport`] if no response was received.
    pub async fn request<T: Serialize + Debug>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
        operation: &str,
    ) -> Result<ApplianceResponse, DriverError> {
        let url = self.url(path);
        debug!(
            appliance = self.appliance,
            method = %method,
            url = %url,
            body = ?body,
            "Appliance API request"
        );

        let mut request = self.http.request(method.clone(), &url);
        if let Some(body_data) = body {
            request = request.json(body_data);
        }
        request = match &self.auth {
            ApplianceAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            ApplianceAuth::Headers(headers) => headers
                .iter()
                .fold(request, |req, (name, value)| req.header(name, value)),
        };

        let response = request.send().await.map_err(|e| {
            error!(
                appliance = self.appliance,
                method = %method,
                url = %url,
                error = %e,
                "Appliance API request failed to send"
            );
            DriverError::Transport {
                operation: operation.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let class = classify(status, &text);

        debug!(
            appliance = self.appliance,
            method = %method,
            url = %url,
            status = %status,
            class = ?class,
            response_len = text.len(),
            "Appliance API response"
        );

        Ok(ApplianceResponse {
            status,
            body: text,
            class,
        })
    }

    /// Sends a request that must succeed outright. Returns the response body.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any non-success response.
    pub async fn send<T: Serialize + Debug>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
        op: &'static str,
        target: &str,
    ) -> Result<String, DriverError> {
        let operation = format!("{op} {target}");
        let response = self.record(op, self.request(method, path, body, &operation).await)?;
        match response.class {
            ResponseClass::Success => Ok(response.body),
            _ => Err(self.failure(&operation, &response)),
        }
    }

    /// Sends a create request. "Already exists" counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other non-success response.
    pub async fn create<T: Serialize + Debug>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
        op: &'static str,
        target: &str,
    ) -> Result<(), DriverError> {
        let operation = format!("{op} {target}");
        let response = self.record(op, self.request(method, path, body, &operation).await)?;
        match response.class {
            ResponseClass::Success => {
                info!(appliance = self.appliance, operation = %operation, "Appliance object created");
                Ok(())
            }
            ResponseClass::AlreadyExists => {
                debug!(
                    appliance = self.appliance,
                    operation = %operation,
                    "Appliance object already exists, treating as success"
                );
                Ok(())
            }
            _ => Err(self.failure(&operation, &response)),
        }
    }

    /// Sends a create request; when the object already exists, sends `update`
    /// instead so the declared attributes win.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or when either request fails.
    pub async fn upsert<T: Serialize + Debug, U: Serialize + Debug>(
        &self,
        create: (Method, &str, &T),
        update: (Method, &str, &U),
        op: &'static str,
        target: &str,
    ) -> Result<(), DriverError> {
        let operation = format!("{op} {target}");
        let (method, path, body) = create;
        let response = self.record(op, self.request(method, path, Some(body), &operation).await)?;
        match response.class {
            ResponseClass::Success => Ok(()),
            ResponseClass::AlreadyExists => {
                debug!(
                    appliance = self.appliance,
                    operation = %operation,
                    "Appliance object already exists, updating in place"
                );
                let (method, path, body) = update;
                self.send(method, path, Some(body), op, target).await.map(|_| ())
            }
            _ => Err(self.failure(&operation, &response)),
        }
    }

    /// Sends a delete request. "Not found" counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other non-success response.
    pub async fn delete(
        &self,
        path: &str,
        op: &'static str,
        target: &str,
    ) -> Result<(), DriverError> {
        self.delete_tolerating(path, op, target, &[]).await
    }

    /// Like [`ApplianceClient::delete`], additionally treating failures whose body
    /// contains one of `tolerated` as success.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other non-success response.
    pub async fn delete_tolerating(
        &self,
        path: &str,
        op: &'static str,
        target: &str,
        tolerated: &[&str],
    ) -> Result<(), DriverError> {
        let operation = format!("{op} {target}");
        let response = self.record(
            op,
            self.request(Method::DELETE, path, None::<&()>, &operation)
                .await,
        )?;
        match response.class {
            ResponseClass::Success => {
                info!(appliance = self.appliance, operation = %operation, "Appliance object deleted");
                Ok(())
            }
            ResponseClass::NotFound => {
                info!(
                    appliance = self.appliance,
                    operation = %operation,
                    "Appliance object not found, treating delete as success"
                );
                Ok(())
            }
            _ if tolerated.iter().any(|m| response.body.contains(m)) => {
                debug!(
                    appliance = self.appliance,
                    operation = %operation,
                    reason = %response.body,
                    "Appliance object left in place"
                );
                Ok(())
            }
            _ => Err(self.failure(&operation, &response)),
        }
    }

    /// Fetches and decodes an object. Returns `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, on a failed response, or when the
    /// body cannot be decoded.
    pub async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        op: &'static str,
        target: &str,
    ) -> Result<Option<R>, DriverError> {
        let operation = format!("{op} {target}");
        let response = self.record(
            op,
            self.request(Method::GET, path, None::<&()>, &operation)
                .await,
        )?;
        match response.class {
            ResponseClass::Success => serde_json::from_str(&response.body)
                .map(Some)
                .map_err(|e| DriverError::InvalidResponse {
                    operation,
                    reason: e.to_string(),
                }),
            ResponseClass::NotFound => Ok(None),
            _ => Err(self.failure(&operation, &response)),
        }
    }

    fn failure(&self, operation: &str, response: &ApplianceResponse) -> DriverError {
        error!(
            appliance = self.appliance,
            operation = %operation,
            status = %response.status,
            error = %response.body,
            "Appliance API request failed"
        );
        DriverError::Http {
            operation: operation.to_string(),
            status: response.status.as_u16(),
            body: response.body.clone(),
        }
    }

    fn record(
        &self,
        op: &'static str,
        result: Result<ApplianceResponse, DriverError>,
    ) -> Result<ApplianceResponse, DriverError> {
        let outcome = match &result {
            Ok(response) => match response.class {
                ResponseClass::Success => "success",
                ResponseClass::AlreadyExists => "already_exists",
                ResponseClass::NotFound => "not_found",
                ResponseClass::Failure => "failure",
            },
            Err(e) => e.metric_label(),
        };
        metrics::record_appliance_operation(self.appliance, op, outcome);
        result
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
