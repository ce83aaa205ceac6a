//! Remote Publishing Gateway: the asset and form capabilities the
//! orchestrator drives.
//!
//! The orchestrator only ever talks to [`AssetStore`] and [`FormPublisher`].
//! Concrete providers live in submodules:
//!
//! | Module | Provider |
//! |--------|----------|
//! | [`google`] | Google Drive v3 + Google Forms v1 over REST |
//! | [`memory`] | in-process fake with fault injection |

pub mod auth;
pub mod google;
pub mod memory;

use crate::error::{AssetError, FormError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

remote_id!(
    /// Provider id of an uploaded image.
    AssetId
);
remote_id!(
    /// Provider id of a fillable form.
    FormId
);
remote_id!(
    /// Provider id of a storage location (a folder).
    LocationId
);

/// An uploaded image. `public_url` is filled once read access has been
/// granted and the URL resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub id: AssetId,
    pub name: String,
    pub public_url: Option<String>,
}

/// Content item placed into a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormItem {
    /// Image block showing a published asset.
    Image { title: String, source_uri: String },
    /// Free-text answer used as a typed signature.
    Signature { title: String, required: bool },
}

impl FormItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            FormItem::Image { .. } => ItemKind::Image,
            FormItem::Signature { .. } => ItemKind::Signature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Image,
    Signature,
}

/// An item as it sits inside a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacedItem {
    pub kind: ItemKind,
    pub position: u32,
}

/// Lifecycle of a [`FormResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormState {
    /// Created, no items yet.
    Draft,
    /// Every item inserted.
    Populated,
    /// Relocated to long-term storage.
    Published,
}

/// Fields needed to create a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDraft {
    pub title: String,
    /// Name of the form file in storage.
    pub document_title: String,
    pub description: String,
}

/// A form as returned by [`FormPublisher::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormResource {
    pub id: FormId,
    pub title: String,
    pub description: String,
    /// Where the provider created the form.
    pub location: LocationId,
    pub items: Vec<PlacedItem>,
    pub state: FormState,
}

/// Asset capability: upload, share, resolve, delete, enumerate.
///
/// `upload`, `grant_public_read`, and `resolve_public_url` are always used
/// together by the orchestrator as one "publish" unit. An asset that was
/// uploaded but not granted is still provisional and gets cleaned up.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload a local JPEG into `location`.
    async fn upload(&self, path: &Path, location: &LocationId) -> Result<RemoteAsset, AssetError>;

    /// Make the asset readable by anyone holding the link, without making it
    /// discoverable.
    async fn grant_public_read(&self, asset: &AssetId) -> Result<(), AssetError>;

    async fn resolve_public_url(&self, asset: &AssetId) -> Result<String, AssetError>;

    async fn delete(&self, asset: &AssetId) -> Result<(), AssetError>;

    /// Ids of every asset directly inside `location`.
    async fn list_children(&self, location: &LocationId) -> Result<BTreeSet<AssetId>, AssetError>;

    /// Create a child location named `name` under `parent`.
    async fn create_location(&self, parent: &LocationId, name: &str) -> Result<LocationId, AssetError>;

    /// Remove an (empty) location.
    async fn remove_location(&self, location: &LocationId) -> Result<(), AssetError>;
}

/// Form capability: create, populate, relocate, delete.
#[async_trait]
pub trait FormPublisher: Send + Sync {
    /// Create a `Draft` form with title and description set.
    async fn create(&self, draft: &FormDraft) -> Result<FormResource, FormError>;

    /// Insert `item` at `position`. The index is authoritative.
    async fn insert_item(&self, form: &FormId, item: &FormItem, position: u32) -> Result<(), FormError>;

    /// Move a form from `from` into `to`.
    async fn relocate(&self, form: &FormId, from: &LocationId, to: &LocationId) -> Result<(), FormError>;

    async fn delete(&self, form: &FormId) -> Result<(), FormError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_and_serialize_as_plain_strings() {
        let id = FormId::from("1AbC");
        assert_eq!(id.to_string(), "1AbC");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1AbC\"");
    }

    #[test]
    fn item_kind_follows_variant() {
        let image = FormItem::Image {
            title: "Terms".into(),
            source_uri: "https://x".into(),
        };
        let sig = FormItem::Signature {
            title: "Sign".into(),
            required: true,
        };
        assert_eq!(image.kind(), ItemKind::Image);
        assert_eq!(sig.kind(), ItemKind::Signature);
    }
}
