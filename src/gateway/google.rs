//! Google Drive v3 + Google Forms v1 adapter over REST.
//!
//! Both halves share one [`GoogleClient`] (HTTP client, token provider,
//! endpoint bases). Request bodies are built by small pure functions so they
//! can be checked without network access.

use super::auth::TokenProvider;
use super::{
    AssetId, AssetStore, FormDraft, FormId, FormItem, FormPublisher, FormResource, FormState,
    LocationId, RemoteAsset,
};
use crate::error::{AssetError, AuthError, FormError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FORMS_BASE: &str = "https://forms.googleapis.com/v1";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const MULTIPART_BOUNDARY: &str = "contract-forms-boundary";

/// Drive alias for the caller's root folder, where new forms land.
pub const ROOT_LOCATION: &str = "root";

/// Shared HTTP plumbing for the Drive and Forms adapters.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    drive_base: String,
    upload_base: String,
    forms_base: String,
}

impl std::fmt::Debug for GoogleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleClient")
            .field("drive_base", &self.drive_base)
            .field("forms_base", &self.forms_base)
            .field("tokens", &"<dyn TokenProvider>")
            .finish()
    }
}

/// Failure of one REST call, before it is attributed to a capability.
#[derive(Debug)]
enum CallError {
    Http { status: u16, body: String },
    Transport(String),
    Auth(AuthError),
    Decode(String),
}

impl From<CallError> for AssetError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Http { status, body } => AssetError::Http { status, body },
            CallError::Transport(s) => AssetError::Transport(s),
            CallError::Auth(a) => AssetError::Auth(a),
            CallError::Decode(s) => AssetError::InvalidResponse(s),
        }
    }
}

impl From<CallError> for FormError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Http { status, body } => FormError::Http { status, body },
            CallError::Transport(s) => FormError::Transport(s),
            CallError::Auth(a) => FormError::Auth(a),
            CallError::Decode(s) => FormError::InvalidResponse(s),
        }
    }
}

impl GoogleClient {
    /// Build a client with a per-request `timeout`.
    pub fn new(tokens: Arc<dyn TokenProvider>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, tokens))
    }

    pub fn with_http(http: reqwest::Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            tokens,
            drive_base: DRIVE_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            forms_base: FORMS_BASE.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, CallError> {
        let token = self.tokens.access_token().await.map_err(CallError::Auth)?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(CallError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CallError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| CallError::Decode(e.to_string()))
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.drive_base, id)
    }
}

// ── Request bodies ───────────────────────────────────────────────────────

/// `multipart/related` body: JSON metadata part followed by the JPEG bytes.
fn multipart_related(metadata: &Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

fn children_query(location: &LocationId) -> String {
    format!("'{}' in parents and trashed=false", location.as_str().replace('\'', "\\'"))
}

fn public_read_permission() -> Value {
    json!({ "type": "anyone", "role": "reader", "allowFileDiscovery": false })
}

fn description_update(description: &str) -> Value {
    json!({
        "requests": [{
            "updateFormInfo": {
                "info": { "description": description },
                "updateMask": "description"
            }
        }]
    })
}

/// `createItem` request. `location.index` is always present, including 0.
fn create_item_request(item: &FormItem, position: u32) -> Value {
    let item = match item {
        FormItem::Image { title, source_uri } => json!({
            "title": title,
            "imageItem": { "image": { "sourceUri": source_uri } }
        }),
        FormItem::Signature { title, required } => json!({
            "title": title,
            "questionItem": {
                "question": {
                    "required": required,
                    "textQuestion": { "paragraph": false }
                }
            }
        }),
    };
    json!({
        "requests": [{
            "createItem": {
                "item": item,
                "location": { "index": position }
            }
        }]
    })
}

// ── Drive: asset capability ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "webContentLink")]
    web_content_link: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// [`AssetStore`] backed by Google Drive.
#[derive(Debug, Clone)]
pub struct GoogleDrive {
    client: GoogleClient,
}

impl GoogleDrive {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }

    async fn delete_file(&self, id: &str) -> Result<(), CallError> {
        let c = &self.client;
        c.send(c.http.delete(c.file_url(id))).await.map(|_| ())
    }
}

fn not_found_asset(e: CallError, id: &AssetId) -> AssetError {
    match e {
        CallError::Http { status: 404, .. } => AssetError::NotFound(id.clone()),
        other => other.into(),
    }
}

#[async_trait]
impl AssetStore for GoogleDrive {
    async fn upload(&self, path: &Path, location: &LocationId) -> Result<RemoteAsset, AssetError> {
        let content = tokio::fs::read(path).await.map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());
        let metadata = json!({
            "name": name,
            "parents": [location.as_str()],
            "mimeType": "image/jpeg",
        });

        let c = &self.client;
        let request = c
            .http
            .post(format!("{}/files", c.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", "id,name")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(multipart_related(&metadata, &content));
        let file: DriveFile = c.send_json(request).await?;

        debug!(asset_id = %file.id, name = %file.name, "Uploaded image");
        Ok(RemoteAsset {
            id: AssetId::from(file.id),
            name: file.name,
            public_url: None,
        })
    }

    async fn grant_public_read(&self, asset: &AssetId) -> Result<(), AssetError> {
        let c = &self.client;
        let request = c
            .http
            .post(format!("{}/permissions", c.file_url(asset.as_str())))
            .json(&public_read_permission());
        c.send(request).await.map_err(|e| not_found_asset(e, asset))?;
        Ok(())
    }

    async fn resolve_public_url(&self, asset: &AssetId) -> Result<String, AssetError> {
        let c = &self.client;
        let request = c
            .http
            .get(c.file_url(asset.as_str()))
            .query(&[("fields", "id,webContentLink")]);
        let file: DriveFile = c
            .send_json(request)
            .await
            .map_err(|e| not_found_asset(e, asset))?;
        file.web_content_link
            .ok_or_else(|| AssetError::InvalidResponse(format!("no webContentLink for '{asset}'")))
    }

    async fn delete(&self, asset: &AssetId) -> Result<(), AssetError> {
        self.delete_file(asset.as_str())
            .await
            .map_err(|e| not_found_asset(e, asset))
    }

    async fn list_children(&self, location: &LocationId) -> Result<BTreeSet<AssetId>, AssetError> {
        let c = &self.client;
        let q = children_query(location);
        let mut ids = BTreeSet::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = c.http.get(format!("{}/files", c.drive_base)).query(&[
                ("q", q.as_str()),
                ("fields", "nextPageToken,files(id,name)"),
                ("pageSize", "100"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let list: FileList = c.send_json(request).await?;
            ids.extend(list.files.into_iter().map(|f| AssetId::from(f.id)));
            match list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(ids)
    }

    async fn create_location(&self, parent: &LocationId, name: &str) -> Result<LocationId, AssetError> {
        let c = &self.client;
        let request = c
            .http
            .post(format!("{}/files", c.drive_base))
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent.as_str()],
            }));
        let folder: DriveFile = c.send_json(request).await?;
        debug!(location = %folder.id, name, "Created staging folder");
        Ok(LocationId::from(folder.id))
    }

    async fn remove_location(&self, location: &LocationId) -> Result<(), AssetError> {
        self.delete_file(location.as_str()).await.map_err(Into::into)
    }
}

// ── Forms: form capability ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreatedForm {
    #[serde(rename = "formId")]
    form_id: String,
}

/// [`FormPublisher`] backed by the Forms API (create, populate) and Drive
/// (move, delete).
#[derive(Debug, Clone)]
pub struct GoogleForms {
    client: GoogleClient,
}

impl GoogleForms {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }

    async fn batch_update(&self, form: &FormId, body: &Value) -> Result<(), FormError> {
        let c = &self.client;
        let request = c
            .http
            .post(format!("{}/forms/{}:batchUpdate", c.forms_base, form.as_str()))
            .json(body);
        c.send(request).await.map_err(|e| match e {
            CallError::Http { status: 404, .. } => FormError::NotFound(form.clone()),
            other => other.into(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl FormPublisher for GoogleForms {
    async fn create(&self, draft: &FormDraft) -> Result<FormResource, FormError> {
        let c = &self.client;
        let request = c.http.post(format!("{}/forms", c.forms_base)).json(&json!({
            "info": {
                "title": draft.title,
                "documentTitle": draft.document_title,
            }
        }));
        let created: CreatedForm = c.send_json(request).await?;
        let id = FormId::from(created.form_id);

        // forms.create ignores the description; it can only be set by update.
        if let Err(e) = self.batch_update(&id, &description_update(&draft.description)).await {
            warn!(form_id = %id, error = %e, "Description update failed, discarding form");
            if let Err(del) = self.delete(&id).await {
                warn!(form_id = %id, error = %del, "Could not discard form");
            }
            return Err(e);
        }

        debug!(form_id = %id, "Created form");
        Ok(FormResource {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            location: LocationId::from(ROOT_LOCATION),
            items: Vec::new(),
            state: FormState::Draft,
        })
    }

    async fn insert_item(&self, form: &FormId, item: &FormItem, position: u32) -> Result<(), FormError> {
        self.batch_update(form, &create_item_request(item, position)).await?;
        debug!(form_id = %form, position, kind = ?item.kind(), "Inserted item");
        Ok(())
    }

    async fn relocate(&self, form: &FormId, from: &LocationId, to: &LocationId) -> Result<(), FormError> {
        let c = &self.client;
        let not_found = |e: CallError| match e {
            CallError::Http { status: 404, .. } => FormError::NotFound(form.clone()),
            other => other.into(),
        };

        let meta: DriveFile = c
            .send_json(c.http.get(c.file_url(form.as_str())).query(&[("fields", "id,parents")]))
            .await
            .map_err(not_found)?;
        let remove = if meta.parents.is_empty() {
            from.as_str().to_string()
        } else {
            meta.parents.join(",")
        };

        let request = c
            .http
            .patch(c.file_url(form.as_str()))
            .query(&[
                ("addParents", to.as_str()),
                ("removeParents", remove.as_str()),
                ("fields", "id,parents"),
            ])
            .json(&json!({}));
        c.send(request).await.map_err(not_found)?;
        debug!(form_id = %form, to = %to, "Moved form");
        Ok(())
    }

    async fn delete(&self, form: &FormId) -> Result<(), FormError> {
        let c = &self.client;
        c.send(c.http.delete(c.file_url(form.as_str())))
            .await
            .map_err(|e| match e {
                CallError::Http { status: 404, .. } => FormError::NotFound(form.clone()),
                other => other.into(),
            })?;
        Ok(())
    }
}
