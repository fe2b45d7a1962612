//! Zabbix JSON-RPC API client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::RemoteObjectApi;
use crate::errors::RemoteError;
use crate::models::{GroupRef, ImportRuleSet, TemplateMeta};

/// Methods that must be called without a session token.
const UNAUTHENTICATED: &[&str] = &["apiinfo.version", "user.login"];

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct TemplateId {
    templateid: String,
    host: String,
}

/// Asynchronous Zabbix API client holding one authenticated session.
pub struct ZabbixClient {
    http: reqwest::Client,
    url: String,
    auth: Option<String>,
    request_id: AtomicU64,
}

impl ZabbixClient {
    /// Log in as `user` and return a client bound to that session.
    #[instrument(skip(password))]
    pub async fn connect(
        url: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json-rpc"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("tplsync/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let mut client = Self {
            http,
            url: url.to_string(),
            auth: None,
            request_id: AtomicU64::new(1),
        };

        let version: String = client.call("apiinfo.version", json!([])).await?;
        info!(url, user, %version, "logging in to Zabbix API");
        let mut params = json!({ "password": password });
        params[login_user_key(&version)] = json!(user);
        let token: String = client
            .call("user.login", params)
            .await
            .map_err(|e| match e {
                RemoteError::ApiError { message, data, .. } => RemoteError::AuthenticationFailed {
                    user: user.to_string(),
                    detail: format!("{message} {data}").trim().to_string(),
                },
                other => other,
            })?;
        client.auth = Some(token);
        info!(%version, "connected to Zabbix API");
        Ok(client)
    }

    fn request<'a>(&'a self, method: &'a str, params: Value) -> RpcRequest<'a> {
        let auth = if UNAUTHENTICATED.contains(&method) {
            None
        } else {
            self.auth.as_deref()
        };
        RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            auth,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RemoteError> {
        let body = self.request(method, params);
        debug!(method, id = body.id, "sending API request");
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = resp.json().await?;
        decode_response(method, value)
    }

    /// Resolve a group name to its id. Numeric scopes are taken as ids.
    async fn resolve_group_id(&self, scope: &str) -> Result<String, RemoteError> {
        if !scope.is_empty() && scope.chars().all(|c| c.is_ascii_digit()) {
            return Ok(scope.to_string());
        }
        let groups: Vec<GroupRef> = self
            .call(
                "hostgroup.get",
                json!({
                    "filter": { "name": [scope] },
                    "templated_hosts": true,
                    "output": ["groupid", "name"],
                }),
            )
            .await?;
        match groups.as_slice() {
            [group] => {
                debug!(scope, id = %group.id, "resolved group");
                Ok(group.id.clone())
            }
            _ => Err(RemoteError::ScopeNotFound {
                scope: scope.to_string(),
                found: groups.len(),
            }),
        }
    }
}

/// Parameter naming the user in `user.login`. Servers before 5.4 only know
/// `user`; later ones only `username`.
fn login_user_key(version: &str) -> &'static str {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    if (major, minor) >= (5, 4) {
        "username"
    } else {
        "user"
    }
}

/// Unwrap a JSON-RPC response into its `result`.
fn decode_response<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, RemoteError> {
    let parse_error = |detail: String| RemoteError::ParseError {
        method: method.to_string(),
        detail,
    };
    let response: RpcResponse =
        serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))?;
    if let Some(error) = response.error {
        let data = match error.data {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        return Err(RemoteError::ApiError {
            method: method.to_string(),
            code: error.code,
            message: error.message,
            data,
        });
    }
    let result = response
        .result
        .ok_or_else(|| parse_error("response carries neither result nor error".into()))?;
    serde_json::from_value(result).map_err(|e| parse_error(e.to_string()))
}

#[async_trait]
impl RemoteObjectApi for ZabbixClient {
    #[instrument(skip(self))]
    async fn list_objects(&self, scope: &str) -> Result<Vec<TemplateMeta>, RemoteError> {
        let group_id = self.resolve_group_id(scope).await?;
        let templates: Vec<TemplateMeta> = self
            .call(
                "template.get",
                json!({
                    "groupids": group_id,
                    "selectGroups": ["groupid", "name"],
                    "output": ["templateid", "host", "name"],
                }),
            )
            .await?;
        info!(count = templates.len(), "listed templates");
        Ok(templates)
    }

    #[instrument(skip(self))]
    async fn export_object(&self, id: &str) -> Result<String, RemoteError> {
        self.call(
            "configuration.export",
            json!({ "format": "json", "options": { "templates": [id] } }),
        )
        .await
    }

    #[instrument(skip(self, payload, rules))]
    async fn import_object(
        &self,
        payload: &str,
        rules: &ImportRuleSet,
    ) -> Result<(), RemoteError> {
        let _: Value = self
            .call(
                "configuration.import",
                json!({ "format": "json", "rules": rules, "source": payload }),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_objects(&self, names: &[String]) -> Result<Vec<String>, RemoteError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let found: Vec<TemplateId> = self
            .call(
                "template.get",
                json!({ "filter": { "host": names }, "output": ["templateid", "host"] }),
            )
            .await?;
        if found.is_empty() {
            debug!("none of the templates exist remotely");
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = found.iter().map(|t| t.templateid.as_str()).collect();
        let _: Value = self.call("template.delete", json!(ids)).await?;
        info!(count = found.len(), "removed templates");
        Ok(found.into_iter().map(|t| t.host).collect())
    }
}
