//! Scheme store client.
//!
//! Keeps a local cache mirrored from the remote store. The store is the
//! source of truth: every mutation goes out first and the cache only changes
//! once the reply is in, except for rename, which is applied optimistically
//! and rolled back if the store refuses it.
//!
//! Each operation comes in two halves. `request_*` validates against the
//! cache and hands back the store round-trip as a detached future; `finish_*`
//! (or `complete`, for a `SchemeSignal`) applies the reply. The `async`
//! methods chain both halves for callers that can simply wait.

use crate::error::{SchemeError, TransportError};
use crate::host::{SchemeBackend, SchemeDraft, SchemeReply};
use crate::models::{last_path_component, Configuration, EnvironmentTag, RequestAck, Scheme, SchemeId};
use futures::future::BoxFuture;
use std::sync::Arc;

type Pending<T> = BoxFuture<'static, Result<T, TransportError>>;

/// Where a save goes: a new entry, or over an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    New { name: String },
    /// New entry under `suggested_name` for the configuration being saved
    Suggested,
    Overwrite { id: SchemeId },
}

/// An optimistic rename awaiting the store's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTicket {
    pub id: SchemeId,
    pub previous: String,
    pub name: String,
}

/// A finished store round-trip, ready to be applied with `complete`.
#[derive(Debug)]
pub enum SchemeSignal {
    Listed(Result<Vec<Scheme>, TransportError>),
    Saved(Result<SchemeReply, TransportError>),
    Renamed {
        ticket: RenameTicket,
        outcome: Result<SchemeReply, TransportError>,
    },
    Deleted {
        scheme: Scheme,
        outcome: Result<RequestAck, TransportError>,
    },
}

/// What an applied signal did to the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemeChange {
    Refreshed(usize),
    Saved(Scheme),
    Renamed { id: SchemeId, name: String },
    Deleted(Scheme),
}

pub struct SchemeStoreClient {
    backend: Arc<dyn SchemeBackend>,
    cache: Vec<Scheme>,
    current: Option<SchemeId>,
}

impl SchemeStoreClient {
    pub fn new(backend: Arc<dyn SchemeBackend>) -> Self {
        SchemeStoreClient {
            backend,
            cache: Vec::new(),
            current: None,
        }
    }

    pub fn schemes(&self) -> &[Scheme] {
        &self.cache
    }

    pub fn get(&self, id: &SchemeId) -> Option<&Scheme> {
        self.cache.iter().find(|s| &s.id == id)
    }

    /// Scheme most recently loaded into the working configuration.
    pub fn current(&self) -> Option<&Scheme> {
        self.current.as_ref().and_then(|id| self.get(id))
    }

    /// Apply a finished round-trip.
    pub fn complete(&mut self, signal: SchemeSignal) -> Result<SchemeChange, SchemeError> {
        match signal {
            SchemeSignal::Listed(outcome) => self.finish_refresh(outcome).map(SchemeChange::Refreshed),
            SchemeSignal::Saved(outcome) => self.finish_save(outcome).map(SchemeChange::Saved),
            SchemeSignal::Renamed { ticket, outcome } => {
                let (id, name) = (ticket.id.clone(), ticket.name.clone());
                self.finish_rename(ticket, outcome)
                    .map(|()| SchemeChange::Renamed { id, name })
            }
            SchemeSignal::Deleted { scheme, outcome } => self.finish_delete(scheme, outcome).map(SchemeChange::Deleted),
        }
    }

    pub fn request_refresh(&self) -> Pending<Vec<Scheme>> {
        self.backend.list_schemes()
    }

    /// Replace the cache wholesale with the store's list.
    pub fn finish_refresh(&mut self, outcome: Result<Vec<Scheme>, TransportError>) -> Result<usize, SchemeError> {
        let schemes = outcome?;
        log::info!("[Schemes] Loaded {} schemes", schemes.len());
        self.cache = schemes;
        if let Some(id) = self.current.clone() {
            if self.get(&id).is_none() {
                self.current = None;
            }
        }
        Ok(self.cache.len())
    }

    pub async fn refresh(&mut self) -> Result<usize, SchemeError> {
        let outcome = self.request_refresh().await;
        self.finish_refresh(outcome)
    }

    /// Prepare a save of the configuration as a new scheme or over an existing one.
    pub fn request_save(
        &self,
        target: SaveTarget,
        config: &Configuration,
        env: EnvironmentTag,
    ) -> Result<Pending<SchemeReply>, SchemeError> {
        let name = match &target {
            SaveTarget::New { name } => name.trim().to_string(),
            SaveTarget::Suggested => suggested_name(config, chrono::Local::now().date_naive()),
            SaveTarget::Overwrite { id } => self
                .get(id)
                .map(|s| s.name.clone())
                .ok_or_else(|| SchemeError::NotFound(id.to_string()))?,
        };
        if name.is_empty() {
            return Err(SchemeError::EmptyName);
        }

        let draft = SchemeDraft {
            name,
            config: config.clone(),
            env_type: env,
        };
        Ok(self.backend.create_scheme(draft))
    }

    /// The reply decides identity; the cache entry with the same name is replaced.
    pub fn finish_save(&mut self, outcome: Result<SchemeReply, TransportError>) -> Result<Scheme, SchemeError> {
        let scheme =
            accepted(outcome?)?.ok_or_else(|| SchemeError::Rejected("store returned no scheme".to_string()))?;

        match self.cache.iter_mut().find(|s| s.name == scheme.name) {
            Some(existing) => *existing = scheme.clone(),
            None => self.cache.push(scheme.clone()),
        }
        log::info!("[Schemes] Saved scheme '{}' ({})", scheme.name, scheme.id);
        Ok(scheme)
    }

    pub async fn save(
        &mut self,
        target: SaveTarget,
        config: &Configuration,
        env: EnvironmentTag,
    ) -> Result<Scheme, SchemeError> {
        let pending = self.request_save(target, config, env)?;
        let outcome = pending.await;
        self.finish_save(outcome)
    }

    /// Rename in the cache right away and hand back the update to send.
    pub fn request_rename(
        &mut self,
        id: &SchemeId,
        new_name: &str,
    ) -> Result<(RenameTicket, Pending<SchemeReply>), SchemeError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(SchemeError::EmptyName);
        }
        let entry = self
            .cache
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| SchemeError::NotFound(id.to_string()))?;

        let previous = std::mem::replace(&mut entry.name, new_name.to_string());
        let pending = self.backend.update_scheme(entry.clone());
        let ticket = RenameTicket {
            id: id.clone(),
            previous,
            name: new_name.to_string(),
        };
        Ok((ticket, pending))
    }

    /// Keep the optimistic name, or restore the previous one if the store refused.
    pub fn finish_rename(
        &mut self,
        ticket: RenameTicket,
        outcome: Result<SchemeReply, TransportError>,
    ) -> Result<(), SchemeError> {
        let outcome = outcome.map_err(SchemeError::from).and_then(accepted);
        match outcome {
            Ok(stored) => {
                if let Some(stored) = stored {
                    if let Some(entry) = self.cache.iter_mut().find(|s| s.id == ticket.id) {
                        *entry = stored;
                    }
                }
                log::info!("[Schemes] Renamed '{}' -> '{}'", ticket.previous, ticket.name);
                Ok(())
            }
            Err(e) => {
                // A later rename or refresh owns the entry now
                if let Some(entry) = self.cache.iter_mut().find(|s| s.id == ticket.id && s.name == ticket.name) {
                    entry.name = ticket.previous.clone();
                }
                log::warn!("[Schemes] Rename of {} failed, reverted: {}", ticket.id, e);
                Err(e)
            }
        }
    }

    pub async fn rename(&mut self, id: &SchemeId, new_name: &str) -> Result<(), SchemeError> {
        let (ticket, pending) = self.request_rename(id, new_name)?;
        let outcome = pending.await;
        self.finish_rename(ticket, outcome)
    }

    /// Check `confirm` and hand back the delete to send.
    pub fn request_delete<F>(&self, id: &SchemeId, confirm: F) -> Result<(Scheme, Pending<RequestAck>), SchemeError>
    where
        F: FnOnce(&Scheme) -> bool,
    {
        let scheme = self
            .get(id)
            .cloned()
            .ok_or_else(|| SchemeError::NotFound(id.to_string()))?;
        if !confirm(&scheme) {
            return Err(SchemeError::NotConfirmed(scheme.name));
        }
        let pending = self.backend.delete_scheme(id.clone());
        Ok((scheme, pending))
    }

    /// Drop the entry once the store agreed. On failure the cache is untouched.
    pub fn finish_delete(
        &mut self,
        scheme: Scheme,
        outcome: Result<RequestAck, TransportError>,
    ) -> Result<Scheme, SchemeError> {
        let ack = outcome?;
        if !ack.success {
            return Err(SchemeError::Rejected(
                ack.message.unwrap_or_else(|| "delete refused".to_string()),
            ));
        }

        self.cache.retain(|s| s.id != scheme.id);
        if self.current.as_ref() == Some(&scheme.id) {
            self.current = None;
        }
        log::info!("[Schemes] Deleted scheme '{}'", scheme.name);
        Ok(scheme)
    }

    pub async fn delete<F>(&mut self, id: &SchemeId, confirm: F) -> Result<Scheme, SchemeError>
    where
        F: FnOnce(&Scheme) -> bool,
    {
        let (scheme, pending) = self.request_delete(id, confirm)?;
        let outcome = pending.await;
        self.finish_delete(scheme, outcome)
    }

    /// Select a scheme for loading: returns its configuration and environment.
    pub fn load(&mut self, id: &SchemeId) -> Result<(Configuration, EnvironmentTag), SchemeError> {
        let scheme = self.get(id).ok_or_else(|| SchemeError::NotFound(id.to_string()))?;
        let loaded = (scheme.config.clone(), scheme.environment());
        log::info!("[Schemes] Loaded scheme '{}'", scheme.name);
        self.current = Some(id.clone());
        Ok(loaded)
    }
}

fn accepted(reply: SchemeReply) -> Result<Option<Scheme>, SchemeError> {
    if reply.success {
        Ok(reply.scheme)
    } else {
        Err(SchemeError::Rejected(
            reply.message.unwrap_or_else(|| "request refused".to_string()),
        ))
    }
}

/// Default name offered in the save dialog.
pub fn suggested_name(config: &Configuration, today: chrono::NaiveDate) -> String {
    let served = config.served_model_name.trim();
    if !served.is_empty() {
        return served.to_string();
    }
    let model = last_path_component(&config.model_path);
    if !model.is_empty() {
        return model.to_string();
    }
    format!("vllm_config_{}", today.format("%Y%m%d"))
}
