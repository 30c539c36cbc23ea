//! Deterministic pseudonym generation over the crosswalk.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use tracing::{info, warn};

use studyrelay_common::{BrokerConfig, BrokerScheme, IdType};

use crate::crosswalk::{CrosswalkStore, LogAction, LogContext};
use crate::error::{BrokerError, Result};
use crate::sandbox::{self, ScriptContext};
use crate::schemes;

/// How many suffix candidates are tried before giving up. Exhausting this
/// means the dictionary space is effectively full for the input's slot.
const MAX_SUFFIX_ATTEMPTS: u32 = 10_000;

pub struct Broker {
    name: String,
    config: BrokerConfig,
    store: CrosswalkStore,
    /// Bounded in-process lookup cache; the store stays the source of
    /// truth.
    cache: Mutex<HashMap<(IdType, String), String>>,
}

impl Broker {
    pub fn new(name: impl Into<String>, config: BrokerConfig, store: CrosswalkStore) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &CrosswalkStore {
        &self.store
    }

    /// Whether the de-id executor should record hashed UIDs through this
    /// broker.
    pub fn hash_uids(&self) -> bool {
        self.config.hash_uids
    }

    /// Salt handed to the UID hasher so hashed UIDs reproduce across
    /// restarts for this broker.
    pub fn uid_salt(&self) -> String {
        format!("studyrelay:{}", self.name)
    }

    /// Resolve a pseudonym: cache, then store, then a newly generated
    /// mapping. Two independent calls always return the same value.
    pub async fn pseudonym(&self, id_in: &str, id_type: IdType) -> Result<String> {
        let key = (id_type, id_in.to_string());
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }

        if let Some(existing) = self.store.lookup(&self.name, id_in, id_type).await? {
            self.store
                .log(
                    LogAction::Lookup,
                    &self.name,
                    Some(id_in),
                    Some(&existing),
                    Some(id_type),
                    &LogContext {
                        details: Some("cache_hit".into()),
                        ..Default::default()
                    },
                )
                .await;
            self.remember(key, &existing);
            return Ok(existing);
        }

        let id_out = self.create_mapping(id_in, id_type).await?;
        self.remember(key, &id_out);
        Ok(id_out)
    }

    async fn create_mapping(&self, id_in: &str, id_type: IdType) -> Result<String> {
        let (base, note) = self.generate_base(id_in, id_type).await?;

        let mut attempt = 1u32;
        loop {
            if attempt > MAX_SUFFIX_ATTEMPTS {
                return Err(BrokerError::Scheme(format!(
                    "could not find a free pseudonym for broker `{}` after {MAX_SUFFIX_ATTEMPTS} attempts",
                    self.name
                )));
            }
            let candidate = match self.config.scheme {
                // Sequential retries advance the counter, not a suffix.
                BrokerScheme::Sequential => {
                    let count = self.store.mapping_count(&self.name).await?;
                    schemes::sequential(&self.config.prefix, count + (attempt as u64) - 1)
                }
                _ => schemes::with_suffix(&base, attempt),
            };

            if self
                .store
                .reverse(&self.name, &candidate, id_type)
                .await?
                .is_some()
            {
                attempt += 1;
                continue;
            }

            match self.store.store(&self.name, id_in, &candidate, id_type).await {
                Ok(stored) => {
                    self.store
                        .log(
                            LogAction::Create,
                            &self.name,
                            Some(id_in),
                            Some(&stored),
                            Some(id_type),
                            &LogContext {
                                details: Some(match &note {
                                    Some(n) => format!("new_mapping; {n}"),
                                    None => "new_mapping".to_string(),
                                }),
                                ..Default::default()
                            },
                        )
                        .await;
                    info!(
                        broker = %self.name,
                        id_type = id_type.as_str(),
                        pseudonym = %stored,
                        "Created crosswalk mapping"
                    );
                    return Ok(stored);
                }
                // Lost a race for this candidate; try the next one.
                Err(BrokerError::Integrity(_)) => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The scheme's base candidate, plus an audit note when a script
    /// fallback happened.
    async fn generate_base(&self, id_in: &str, id_type: IdType) -> Result<(String, Option<String>)> {
        let base = match self.config.scheme {
            BrokerScheme::AdjectiveAnimal => schemes::adjective_animal(id_in),
            BrokerScheme::ColorAnimal => schemes::color_animal(id_in),
            BrokerScheme::NatoPhonetic => schemes::nato_phonetic(id_in),
            BrokerScheme::Hash => schemes::hash(&self.config.prefix, id_in),
            BrokerScheme::Sequential => String::new(),
            BrokerScheme::Script => {
                let expression = self.config.script.as_deref().unwrap_or_default();
                let ctx = ScriptContext {
                    id_in,
                    id_type: id_type.as_str(),
                    prefix: &self.config.prefix,
                    broker_name: &self.name,
                    mapping_count: self.store.mapping_count(&self.name).await?,
                };
                match sandbox::evaluate(expression, &ctx) {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(
                            broker = %self.name,
                            error = %e,
                            "Pseudonym script failed, falling back to adjective_animal"
                        );
                        return Ok((
                            schemes::adjective_animal(id_in),
                            Some(format!("script_fallback: {e}")),
                        ));
                    }
                }
            }
        };
        Ok((base, None))
    }

    /// Sticky per-patient date shift. Allocated once in
    /// `[min_days, max_days]`; disabled brokers report 0 unless a value
    /// was stored while enabled.
    pub async fn date_shift(&self, patient_id: &str) -> Result<i64> {
        if let Some(existing) = self.store.date_shift(&self.name, patient_id).await? {
            return Ok(existing);
        }
        if !self.config.date_shift.enabled {
            return Ok(0);
        }
        let (min, max) = (
            self.config.date_shift.min_days as i64,
            self.config.date_shift.max_days as i64,
        );
        if min > max {
            return Err(BrokerError::Scheme(format!(
                "date shift range [{min}, {max}] is empty for broker `{}`",
                self.name
            )));
        }
        let shift = rand::thread_rng().gen_range(min..=max);
        self.store.store_date_shift(&self.name, patient_id, shift).await
    }

    /// Record a UID rewrite performed by the de-id executor, for later
    /// reversal.
    pub async fn record_hashed_uid(
        &self,
        original: &str,
        hashed: &str,
        id_type: IdType,
    ) -> Result<()> {
        match self.store.store(&self.name, original, hashed, id_type).await {
            Ok(_) => {
                self.store
                    .log(
                        LogAction::Create,
                        &self.name,
                        Some(original),
                        Some(hashed),
                        Some(id_type),
                        &LogContext {
                            details: Some("uid_map".into()),
                            ..Default::default()
                        },
                    )
                    .await;
                Ok(())
            }
            // The same UID hashed twice is the normal cache-hit shape.
            Err(BrokerError::Integrity(_))
                if self.store.lookup(&self.name, original, id_type).await? == Some(hashed.to_string()) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Reverse lookup with its own audit trail. No delivery path calls
    /// this; it exists for the external admin surface.
    pub async fn reverse(&self, id_out: &str, id_type: IdType) -> Result<Option<String>> {
        let original = self.store.reverse(&self.name, id_out, id_type).await?;
        self.store
            .log(
                LogAction::ReverseLookup,
                &self.name,
                original.as_deref(),
                Some(id_out),
                Some(id_type),
                &LogContext::default(),
            )
            .await;
        Ok(original)
    }

    /// Record that a study's identifiers were resolved for a delivery.
    pub async fn record_route_use(&self, route: &str, destination: &str, study_uid: &str) {
        self.store
            .log(
                LogAction::Route,
                &self.name,
                None,
                None,
                None,
                &LogContext {
                    route: Some(route.to_string()),
                    destination: Some(destination.to_string()),
                    study_uid: Some(study_uid.to_string()),
                    details: None,
                },
            )
            .await;
    }

    fn remember(&self, key: (IdType, String), value: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= self.config.max_cache_size {
                cache.clear();
            }
            cache.insert(key, value.to_string());
        }
    }
}
