//! Skymap crossmatch filtering engine.
//!
//! Continuously filters astronomical alerts by testing whether each alert's
//! sky position falls inside the credible region of one or more active
//! probability skymaps (gravitational-wave and transient localizations).
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`healpix`] | Nested-scheme pixel indexing: position→pixel, disc queries for uncertain positions |
//! | [`skymap`] | [`Skymap`](skymap::Skymap) construction and credible-level tables |
//! | [`store`] | [`SkymapStore`](store::SkymapStore) — snapshot-isolated repository of active maps |
//! | [`crossmatch`] | [`CrossmatchEngine`](crossmatch::CrossmatchEngine) — containment decisions per alert |
//! | [`config`] | [`EngineConfig`](config::EngineConfig) — thresholds and freshness windows |
//!
//! # Quick start
//!
//! ```ignore
//! use skymatch_engine::{CrossmatchEngine, EngineConfig, SkymapStore};
//!
//! let store = Arc::new(SkymapStore::new(&config));
//! store.insert(probabilities, metadata, UtcInstant::now())?;
//!
//! let engine = CrossmatchEngine::new(store.clone(), config);
//! let evaluation = engine.evaluate(&alert, UtcInstant::now());
//! ```

pub mod config;
pub mod crossmatch;
pub mod errors;
pub mod healpix;
pub mod skymap;
pub mod store;

pub use config::EngineConfig;
pub use crossmatch::{Alert, AlertEvaluation, CrossmatchEngine, CrossmatchResult, DecisionOutcome};
pub use errors::{EngineError, EngineResult};
pub use skymap::{Skymap, SkymapMetadata};
pub use store::SkymapStore;
