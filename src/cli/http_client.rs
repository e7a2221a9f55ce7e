use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::commands::RemoteArgs;
use crate::auth::TENANT_HEADER;

/// Uploads run the whole pipeline server-side before responding.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl ApiClient {
    pub fn new(remote: &RemoteArgs) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: remote.server.trim_end_matches('/').to_string(),
            token: remote.token.clone(),
            tenant: remote.tenant.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let builder = self.client.request(method, &url).bearer_auth(&self.token);
        match &self.tenant {
            Some(tenant) => builder.header(TENANT_HEADER, tenant),
            None => builder,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.request(reqwest::Method::GET, path).send()?;
        Self::handle_response(resp)
    }

    pub fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let resp = self.request(reqwest::Method::POST, path).json(body).send()?;
        Self::handle_response(resp)
    }

    pub fn post_empty<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.request(reqwest::Method::POST, path).send()?;
        Self::handle_response(resp)
    }

    /// Sends a raw body; the server answers `204 No Content`.
    pub fn put_bytes(&self, path: &str, body: Vec<u8>) -> anyhow::Result<()> {
        let resp = self
            .request(reqwest::Method::PUT, path)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(resp))
        }
    }

    pub fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: multipart::Form,
    ) -> anyhow::Result<T> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .multipart(form)
            .send()?;
        Self::handle_response(resp)
    }

    pub fn delete<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.request(reqwest::Method::DELETE, path).send()?;
        Self::handle_response(resp)
    }

    /// Best-effort delete for cleanup paths; errors are returned, bodies ignored.
    pub fn delete_quiet(&self, path: &str) -> anyhow::Result<()> {
        let resp = self.request(reqwest::Method::DELETE, path).send()?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(resp))
        }
    }

    fn handle_response<T: DeserializeOwned>(
        resp: reqwest::blocking::Response,
    ) -> anyhow::Result<T> {
        if resp.status().is_success() {
            let api_resp: ApiResponse<T> = resp.json()?;
            api_resp
                .data
                .ok_or_else(|| anyhow::anyhow!("Server returned an empty response"))
        } else {
            Err(Self::error_from(resp))
        }
    }

    fn error_from(resp: reqwest::blocking::Response) -> anyhow::Error {
        let status = resp.status();
        match resp.json::<ApiResponse<()>>() {
            Ok(api_resp) => anyhow::anyhow!(
                api_resp
                    .error
                    .unwrap_or_else(|| "Server error (no details provided)".into())
            ),
            Err(_) => anyhow::anyhow!("Server returned {status}"),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Multipart form for `POST /projects`.
pub fn upload_form(
    archive: &Path,
    slug: &str,
    display_name: Option<&str>,
    description: Option<&str>,
) -> anyhow::Result<multipart::Form> {
    let mut form = multipart::Form::new()
        .text("slug", slug.to_string())
        .file("file", archive)?;
    if let Some(name) = display_name {
        form = form.text("display_name", name.to_string());
    }
    if let Some(description) = description {
        form = form.text("description", description.to_string());
    }
    Ok(form)
}
