//! Species and move lookups, and the derivation of battle-ready combatants.

use crate::battle::state::{Combatant, StatBlock};
use crate::battle::stats::{move_candidates, select_attacks, species_max_hp, species_types};
use crate::config::SpeciesSourceConfig;
use crate::errors::{ArenaError, ArenaResult, SourceError, SourceResult};
use async_trait::async_trait;
use futures_util::future::join_all;
use schema::{MoveRecord, NamedResource, PokemonType, SpeciesRecord, StatEntry, TypeSlot};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Read-only source of species and move records.
///
/// `Ok(None)` means the source answered and the record does not exist;
/// `Err` means the source could not be reached or returned garbage.
#[async_trait]
pub trait SpeciesSource: Send + Sync {
    async fn fetch_species(&self, species_ref: &str) -> SourceResult<Option<SpeciesRecord>>;

    async fn fetch_move(&self, move_name: &str) -> SourceResult<Option<MoveRecord>>;
}

/// HTTP client for the PokeAPI REST endpoints.
pub struct PokeApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl PokeApiClient {
    /// Creates a new client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &SpeciesSourceConfig) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SourceResult<Option<T>> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Fetching from species source");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Http(format!("{} returned {}", url, status)));
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl SpeciesSource for PokeApiClient {
    async fn fetch_species(&self, species_ref: &str) -> SourceResult<Option<SpeciesRecord>> {
        self.get_json(&format!("pokemon/{}", species_ref)).await
    }

    async fn fetch_move(&self, move_name: &str) -> SourceResult<Option<MoveRecord>> {
        self.get_json(&format!("move/{}", move_name)).await
    }
}

/// Process-wide read-through cache of move records keyed by move name.
///
/// Entries are immutable once inserted; only successful lookups are cached so
/// a transient failure is retried on the next battle.
#[derive(Debug, Default)]
pub struct MoveCache {
    entries: RwLock<HashMap<String, MoveRecord>>,
}

impl MoveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, move_name: &str) -> Option<MoveRecord> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(move_name).cloned())
    }

    pub fn insert(&self, record: MoveRecord) {
        if let Ok(mut entries) = self.entries.write() {
            entries.entry(record.name.clone()).or_insert(record);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn get_or_fetch(
        &self,
        source: &dyn SpeciesSource,
        move_name: &str,
    ) -> SourceResult<Option<MoveRecord>> {
        if let Some(record) = self.get(move_name) {
            return Ok(Some(record));
        }

        let fetched = source.fetch_move(move_name).await?;
        if let Some(record) = &fetched {
            let mut cached = record.clone();
            cached.name = move_name.to_string();
            self.insert(cached);
        }
        Ok(fetched)
    }
}

/// Turns species references into combatants, sharing one move cache.
#[derive(Clone)]
pub struct SpeciesCatalog {
    source: Arc<dyn SpeciesSource>,
    cache: Arc<MoveCache>,
    max_move_candidates: usize,
}

impl SpeciesCatalog {
    pub fn new(
        source: Arc<dyn SpeciesSource>,
        cache: Arc<MoveCache>,
        max_move_candidates: usize,
    ) -> Self {
        Self {
            source,
            cache,
            max_move_candidates,
        }
    }

    pub fn cache(&self) -> &MoveCache {
        &self.cache
    }

    /// Fetches the species and derives stats, types and up to four attacks
    /// for the given owner.
    ///
    /// A missing species is `NotFound` and an unreachable source is
    /// `UpstreamUnavailable`. Move lookups that fail only degrade the attack
    /// list to the fallback set.
    pub async fn derive_combatant(
        &self,
        species_ref: &str,
        user_id: &str,
        display_name: &str,
    ) -> ArenaResult<Combatant> {
        let species_ref = normalize_species_ref(species_ref)?;

        let record = self
            .source
            .fetch_species(&species_ref)
            .await?
            .ok_or_else(|| ArenaError::NotFound(format!("species {}", species_ref)))?;

        let types = species_types(&record);
        let primary = types.first().copied().unwrap_or(PokemonType::Normal);

        let candidates = move_candidates(&record, self.max_move_candidates);
        let lookups = candidates
            .iter()
            .map(|name| self.cache.get_or_fetch(self.source.as_ref(), name));
        let mut details = Vec::with_capacity(candidates.len());
        for (name, result) in candidates.iter().zip(join_all(lookups).await) {
            match result {
                Ok(Some(detail)) => details.push(detail),
                Ok(None) => debug!(move_name = %name, "Move not found, skipping"),
                Err(err) => warn!(
                    species = %record.name,
                    move_name = %name,
                    error = %err,
                    "Move lookup failed, attack list may fall back"
                ),
            }
        }

        let species_name = if record.name.is_empty() {
            species_ref.clone()
        } else {
            record.name.clone()
        };

        Ok(Combatant {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            species_id: record.id,
            species_name,
            current_hp: species_max_hp(&record),
            max_hp: species_max_hp(&record),
            stats: StatBlock::from_record(&record),
            attacks: select_attacks(&details, primary),
            types,
        })
    }
}

/// Species references are pokedex numbers or lower-case names. Inner
/// whitespace becomes `-` ("Mr Mime" is `mr-mime`); anything but ASCII
/// letters, digits and `-` is rejected since the reference ends up in a
/// PokeAPI URL path.
pub fn normalize_species_ref(species_ref: &str) -> ArenaResult<String> {
    let normalized = species_ref
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    if normalized.is_empty() {
        return Err(ArenaError::validation("species is required"));
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ArenaError::validation(format!(
            "species '{}' may only contain letters, digits and '-'",
            species_ref.trim()
        )));
    }
    Ok(normalized)
}

/// In-memory species source for tests and offline demos.
///
/// Species are addressable by name or by id. `set_unavailable` makes every
/// call fail like an unreachable upstream.
#[derive(Default)]
pub struct StaticSpeciesSource {
    species: RwLock<HashMap<String, SpeciesRecord>>,
    moves: RwLock<HashMap<String, MoveRecord>>,
    unavailable: AtomicBool,
    move_fetches: AtomicUsize,
}

impl StaticSpeciesSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_species(self, record: SpeciesRecord) -> Self {
        if let Ok(mut species) = self.species.write() {
            species.insert(record.id.to_string(), record.clone());
            species.insert(record.name.clone(), record);
        }
        self
    }

    pub fn with_move(self, record: MoveRecord) -> Self {
        if let Ok(mut moves) = self.moves.write() {
            moves.insert(record.name.clone(), record);
        }
        self
    }

    /// Adds a species with the given base stats and no learnset, so it fights
    /// with the fallback attacks of its primary type.
    pub fn with_basic_species(
        self,
        id: u32,
        name: &str,
        base_stats: [u16; 4],
        types: &[&str],
    ) -> Self {
        let [hp, attack, defense, speed] = base_stats;
        let stat = |name: &str, base_stat: u16| StatEntry {
            base_stat,
            stat: NamedResource::new(name),
        };
        self.with_species(SpeciesRecord {
            id,
            name: name.to_string(),
            stats: vec![
                stat("hp", hp),
                stat("attack", attack),
                stat("defense", defense),
                stat("speed", speed),
            ],
            types: types
                .iter()
                .enumerate()
                .map(|(index, type_name)| TypeSlot {
                    slot: index as u8 + 1,
                    type_: NamedResource::new(*type_name),
                })
                .collect(),
            moves: Vec::new(),
        })
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `fetch_move` calls that reached this source.
    pub fn move_fetches(&self) -> usize {
        self.move_fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> SourceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl SpeciesSource for StaticSpeciesSource {
    async fn fetch_species(&self, species_ref: &str) -> SourceResult<Option<SpeciesRecord>> {
        self.check_available()?;
        Ok(self
            .species
            .read()
            .ok()
            .and_then(|species| species.get(species_ref).cloned()))
    }

    async fn fetch_move(&self, move_name: &str) -> SourceResult<Option<MoveRecord>> {
        self.move_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .moves
            .read()
            .ok()
            .and_then(|moves| moves.get(move_name).cloned()))
    }
}
