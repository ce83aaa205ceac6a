//! In-process gateway with fault injection.
//!
//! [`InMemoryGateway`] implements both [`AssetStore`] and [`FormPublisher`]
//! against a shared map, so the orchestrator's retry and rollback behaviour
//! can be exercised without network access. The server's `--dry-run` mode
//! uses it too.
//!
//! Faults are counted: `fail_uploads(2)` makes the next two upload calls
//! fail and later ones succeed. `u32::MAX` means "always".
//!
//! It mimics the remote behaviour the orchestrator depends on:
//! * an image item can only reference an asset that exists and was granted
//!   public read;
//! * an item index may not exceed the current item count;
//! * a new form lands in [`CREATION_LOCATION`];
//! * removing a location removes the assets inside it.

use super::{
    AssetId, AssetStore, FormDraft, FormId, FormItem, FormPublisher, FormResource, FormState,
    LocationId, PlacedItem, RemoteAsset,
};
use crate::error::{AssetError, FormError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where [`FormPublisher::create`] puts new forms.
pub const CREATION_LOCATION: &str = "my-drive";

const URL_SCHEME: &str = "memory://assets/";

#[derive(Debug, Clone)]
struct StoredAsset {
    name: String,
    location: LocationId,
    public: bool,
}

#[derive(Debug, Clone)]
struct StoredForm {
    resource: FormResource,
    contents: Vec<FormItem>,
}

/// Number of calls made to each operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub uploads: u32,
    pub grants: u32,
    pub resolves: u32,
    pub asset_deletes: u32,
    pub lists: u32,
    pub location_creates: u32,
    pub location_removes: u32,
    pub form_creates: u32,
    pub inserts: u32,
    pub relocates: u32,
    pub form_deletes: u32,
}

#[derive(Debug, Default)]
struct Faults {
    uploads: u32,
    lost_uploads: u32,
    grants: u32,
    asset_deletes: u32,
    creates: u32,
    inserts: HashMap<u32, u32>,
    relocates: u32,
    form_deletes: u32,
}

/// Consume one unit of a fault budget. `u32::MAX` never runs out.
fn trip(budget: &mut u32) -> bool {
    match *budget {
        0 => false,
        u32::MAX => true,
        _ => {
            *budget -= 1;
            true
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    assets: BTreeMap<AssetId, StoredAsset>,
    locations: BTreeMap<LocationId, LocationId>,
    forms: BTreeMap<FormId, StoredForm>,
    faults: Faults,
    calls: CallCounts,
}

impl State {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// Fake remote provider. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Fault injection ──────────────────────────────────────────────────

    /// Fail the next `n` uploads before anything is stored.
    pub fn fail_uploads(&self, n: u32) -> &Self {
        self.state().faults.uploads = n;
        self
    }

    /// Store the next `n` uploads but report them as failed, leaving strays
    /// in the target location.
    pub fn lose_upload_responses(&self, n: u32) -> &Self {
        self.state().faults.lost_uploads = n;
        self
    }

    pub fn fail_grants(&self, n: u32) -> &Self {
        self.state().faults.grants = n;
        self
    }

    pub fn fail_asset_deletes(&self, n: u32) -> &Self {
        self.state().faults.asset_deletes = n;
        self
    }

    pub fn fail_creates(&self, n: u32) -> &Self {
        self.state().faults.creates = n;
        self
    }

    /// Fail the next `n` insertions at `position`.
    pub fn fail_inserts_at(&self, position: u32, n: u32) -> &Self {
        self.state().faults.inserts.insert(position, n);
        self
    }

    pub fn fail_relocates(&self, n: u32) -> &Self {
        self.state().faults.relocates = n;
        self
    }

    pub fn fail_form_deletes(&self, n: u32) -> &Self {
        self.state().faults.form_deletes = n;
        self
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    pub fn form(&self, id: &FormId) -> Option<FormResource> {
        self.state().forms.get(id).map(|f| f.resource.clone())
    }

    /// Item contents of a form, in position order.
    pub fn form_items(&self, id: &FormId) -> Option<Vec<FormItem>> {
        self.state().forms.get(id).map(|f| f.contents.clone())
    }

    pub fn forms(&self) -> Vec<FormResource> {
        self.state().forms.values().map(|f| f.resource.clone()).collect()
    }

    pub fn forms_in(&self, location: &LocationId) -> Vec<FormResource> {
        self.state()
            .forms
            .values()
            .filter(|f| &f.resource.location == location)
            .map(|f| f.resource.clone())
            .collect()
    }

    pub fn asset_ids(&self) -> Vec<AssetId> {
        self.state().assets.keys().cloned().collect()
    }

    pub fn assets_in(&self, location: &LocationId) -> Vec<AssetId> {
        self.state()
            .assets
            .iter()
            .filter(|(_, a)| &a.location == location)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Child locations created under `parent` that still exist.
    pub fn locations_under(&self, parent: &LocationId) -> Vec<LocationId> {
        self.state()
            .locations
            .iter()
            .filter(|(_, p)| *p == parent)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn public_url(id: &AssetId) -> String {
        format!("{URL_SCHEME}{id}")
    }
}

#[async_trait]
impl AssetStore for InMemoryGateway {
    async fn upload(&self, path: &Path, location: &LocationId) -> Result<RemoteAsset, AssetError> {
        let mut s = self.state();
        s.calls.uploads += 1;
        if trip(&mut s.faults.uploads) {
            return Err(AssetError::Injected(format!("upload of {}", path.display())));
        }
        if !path.is_file() {
            return Err(AssetError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such image"),
            });
        }

        let id = AssetId::from(s.mint("asset"));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        s.assets.insert(
            id.clone(),
            StoredAsset {
                name: name.clone(),
                location: location.clone(),
                public: false,
            },
        );
        if trip(&mut s.faults.lost_uploads) {
            return Err(AssetError::Injected(format!("response lost for upload {id}")));
        }
        Ok(RemoteAsset {
            id,
            name,
            public_url: None,
        })
    }

    async fn grant_public_read(&self, asset: &AssetId) -> Result<(), AssetError> {
        let mut s = self.state();
        s.calls.grants += 1;
        if trip(&mut s.faults.grants) {
            return Err(AssetError::Injected(format!("grant on {asset}")));
        }
        let stored = s
            .assets
            .get_mut(asset)
            .ok_or_else(|| AssetError::NotFound(asset.clone()))?;
        stored.public = true;
        Ok(())
    }

    async fn resolve_public_url(&self, asset: &AssetId) -> Result<String, AssetError> {
        let mut s = self.state();
        s.calls.resolves += 1;
        match s.assets.get(asset) {
            None => Err(AssetError::NotFound(asset.clone())),
            Some(a) if !a.public => Err(AssetError::Http {
                status: 403,
                body: format!("asset {asset} ({}) is not shared", a.name),
            }),
            Some(_) => Ok(Self::public_url(asset)),
        }
    }

    async fn delete(&self, asset: &AssetId) -> Result<(), AssetError> {
        let mut s = self.state();
        s.calls.asset_deletes += 1;
        if trip(&mut s.faults.asset_deletes) {
            return Err(AssetError::Injected(format!("delete of {asset}")));
        }
        s.assets
            .remove(asset)
            .map(|_| ())
            .ok_or_else(|| AssetError::NotFound(asset.clone()))
    }

    async fn list_children(&self, location: &LocationId) -> Result<BTreeSet<AssetId>, AssetError> {
        let mut s = self.state();
        s.calls.lists += 1;
        Ok(s.assets
            .iter()
            .filter(|(_, a)| &a.location == location)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn create_location(&self, parent: &LocationId, name: &str) -> Result<LocationId, AssetError> {
        let mut s = self.state();
        s.calls.location_creates += 1;
        let id = LocationId::from(format!("{}-{name}", s.mint("loc")));
        s.locations.insert(id.clone(), parent.clone());
        Ok(id)
    }

    async fn remove_location(&self, location: &LocationId) -> Result<(), AssetError> {
        let mut s = self.state();
        s.calls.location_removes += 1;
        if s.locations.remove(location).is_none() {
            return Err(AssetError::NotFound(AssetId::from(location.as_str())));
        }
        s.assets.retain(|_, a| &a.location != location);
        Ok(())
    }
}

#[async_trait]
impl FormPublisher for InMemoryGateway {
    async fn create(&self, draft: &FormDraft) -> Result<FormResource, FormError> {
        let mut s = self.state();
        s.calls.form_creates += 1;
        if trip(&mut s.faults.creates) {
            return Err(FormError::Injected(format!("create of '{}'", draft.document_title)));
        }
        let resource = FormResource {
            id: FormId::from(s.mint("form")),
            title: draft.title.clone(),
            description: draft.description.clone(),
            location: LocationId::from(CREATION_LOCATION),
            items: Vec::new(),
            state: FormState::Draft,
        };
        s.forms.insert(
            resource.id.clone(),
            StoredForm {
                resource: resource.clone(),
                contents: Vec::new(),
            },
        );
        Ok(resource)
    }

    async fn insert_item(&self, form: &FormId, item: &FormItem, position: u32) -> Result<(), FormError> {
        let mut s = self.state();
        s.calls.inserts += 1;
        let injected = s
            .faults
            .inserts
            .get_mut(&position)
            .map(trip)
            .unwrap_or(false);
        if injected {
            return Err(FormError::Injected(format!("insert at {position} into {form}")));
        }

        if let FormItem::Image { source_uri, .. } = item {
            let readable = source_uri
                .strip_prefix(URL_SCHEME)
                .and_then(|id| s.assets.get(&AssetId::from(id)))
                .is_some_and(|a| a.public);
            if !readable {
                return Err(FormError::Http {
                    status: 400,
                    body: format!("image at {source_uri} cannot be fetched"),
                });
            }
        }

        let stored = s
            .forms
            .get_mut(form)
            .ok_or_else(|| FormError::NotFound(form.clone()))?;
        let index = position as usize;
        if index > stored.contents.len() {
            return Err(FormError::Http {
                status: 400,
                body: format!(
                    "index {position} out of range for {} item(s)",
                    stored.contents.len()
                ),
            });
        }
        stored.contents.insert(index, item.clone());
        stored.resource.items = stored
            .contents
            .iter()
            .enumerate()
            .map(|(i, it)| PlacedItem {
                kind: it.kind(),
                position: i as u32,
            })
            .collect();
        stored.resource.state = FormState::Populated;
        Ok(())
    }

    async fn relocate(&self, form: &FormId, from: &LocationId, to: &LocationId) -> Result<(), FormError> {
        let mut s = self.state();
        s.calls.relocates += 1;
        if trip(&mut s.faults.relocates) {
            return Err(FormError::Injected(format!("move of {form}")));
        }
        let stored = s
            .forms
            .get_mut(form)
            .ok_or_else(|| FormError::NotFound(form.clone()))?;
        if &stored.resource.location != from {
            return Err(FormError::Http {
                status: 400,
                body: format!("{form} is not in {from}"),
            });
        }
        stored.resource.location = to.clone();
        stored.resource.state = FormState::Published;
        Ok(())
    }

    async fn delete(&self, form: &FormId) -> Result<(), FormError> {
        let mut s = self.state();
        s.calls.form_deletes += 1;
        if trip(&mut s.faults.form_deletes) {
            return Err(FormError::Injected(format!("delete of {form}")));
        }
        s.forms
            .remove(form)
            .map(|_| ())
            .ok_or_else(|| FormError::NotFound(form.clone()))
    }
}
