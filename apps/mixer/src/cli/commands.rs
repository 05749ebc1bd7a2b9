//! # CLI Command Implementations

use super::{LoadTarget, QueryCommand};
use crate::api;
use crate::config::MixerConfig;
use crate::golden;
use crate::orchestrator::{Merged, Orchestrator};
use mixer_core::{
    Direction, MixerError, Origin, RedbRowStore, RowStore, TripleIndex, WarmCache, read_records,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

// =============================================================================
// FILE CHECKS
// =============================================================================

/// Maximum record export size for `load` (1 GiB).
const MAX_LOAD_FILE_SIZE: u64 = 1024 * 1024 * 1024;

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), MixerError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| MixerError::Io(format!("cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(MixerError::InvalidRequest(format!(
            "file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve `..` and symlinks and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, MixerError> {
    let canonical = path.canonicalize().map_err(|e| {
        MixerError::Io(format!("invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(MixerError::Io(format!(
            "path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_serve(
    config: MixerConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), MixerError> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let options = config.options();

    let orchestrator = tokio::task::spawn_blocking(move || Orchestrator::from_config(&config))
        .await
        .map_err(|e| MixerError::Io(format!("startup task failed: {}", e)))??;

    println!("Mixer starting...");
    println!();
    println!("Configuration:");
    println!("  Host:           {}", host);
    println!("  Port:           {}", port);
    println!("  Deadline:       {} ms", options.deadline.as_millis());
    println!("  Fan-out limit:  {}", options.fan_out_limit);
    println!("  Override store: {}", options.use_override_store);
    println!("  Override only:  {}", options.override_only);
    if let Some(warm) = orchestrator.warm_cache() {
        println!(
            "  Warm cache:     {} entities, {} places",
            warm.entity_count(),
            warm.place_count()
        );
    }
    println!();
    println!("Endpoints:");
    println!("  GET  /health");
    println!("  GET  /status");
    println!("  POST /v1/property-values, /v1/triples, /v1/property-labels");
    println!("  POST /v1/places-in, /v1/place-stat-vars");
    println!("  POST /v1/stat-all, /v1/stat-value");
    println!("  POST /v1/recon/resolve-ids");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, orchestrator).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub async fn cmd_status(config: &MixerConfig, json_mode: bool) -> Result<(), MixerError> {
    let orchestrator = Orchestrator::from_config(config)?;
    let report = orchestrator.status().await;

    if json_mode {
        print_json(&serde_json::to_value(&report).unwrap_or_default());
        return Ok(());
    }

    println!("Origins:");
    if report.origins.is_empty() {
        println!("  (none configured)");
    }
    for origin in &report.origins {
        match (&origin.rows, &origin.error) {
            (Some(rows), _) => println!("  {:<9} {} rows", origin.origin.to_string(), rows),
            (None, Some(e)) => println!("  {:<9} unavailable: {}", origin.origin.to_string(), e),
            (None, None) => println!("  {:<9} unknown", origin.origin.to_string()),
        }
    }
    println!("Query engine: {}", if report.query_engine { "configured" } else { "none" });
    if let (Some(entities), Some(places)) = (report.warm_cache_entities, report.warm_cache_places) {
        println!("Warm cache:   {} entities, {} places", entities, places);
    }
    Ok(())
}

// =============================================================================
// LOAD COMMAND
// =============================================================================

/// Last revision of a cache file that already holds rows.
fn existing_revision(path: Option<&Path>, origin: Origin) -> Result<Option<u64>, MixerError> {
    let Some(path) = path.filter(|p| p.is_file()) else {
        return Ok(None);
    };
    let store = RedbRowStore::open(path, origin)?;
    if store.row_count()? == 0 {
        return Ok(None);
    }
    store.last_revision().map(Some)
}

/// Branch only holds deltas newer than the Base snapshot.
fn check_revision_order(
    config: &MixerConfig,
    target: LoadTarget,
    revision: u64,
) -> Result<(), MixerError> {
    match target {
        LoadTarget::Branch => {
            if let Some(base) = existing_revision(config.stores.base_path.as_deref(), Origin::Base)?
                && revision < base
            {
                return Err(MixerError::InvalidRequest(format!(
                    "branch revision {} is older than base revision {}",
                    revision, base
                )));
            }
        }
        LoadTarget::Base => {
            if let Some(branch) =
                existing_revision(config.stores.branch_path.as_deref(), Origin::Branch)?
                && revision > branch
            {
                tracing::warn!(
                    revision,
                    branch_revision = branch,
                    "branch rows predate the new base snapshot; reload the branch"
                );
            }
        }
    }
    Ok(())
}

/// Index a record export and write every row it implies.
///
/// The target table is replaced unless `upsert` is set.
pub fn cmd_load(
    config: &MixerConfig,
    json_mode: bool,
    target: LoadTarget,
    input: &Path,
    revision: u64,
    db: Option<PathBuf>,
    upsert: bool,
) -> Result<(), MixerError> {
    let origin = target.origin();
    let configured = match target {
        LoadTarget::Base => config.stores.base_path.clone(),
        LoadTarget::Branch => config.stores.branch_path.clone(),
    };
    let db_path = db.or(configured).ok_or_else(|| {
        MixerError::Config(format!("no {} path configured; pass --db", origin))
    })?;

    let input = validate_file_path(input)?;
    validate_file_size(&input, MAX_LOAD_FILE_SIZE)?;
    check_revision_order(config, target, revision)?;

    let started = Instant::now();
    let index = TripleIndex::from_records(read_records(&input)?);
    let rows = index.to_encoded_rows()?;
    let store = RedbRowStore::open(&db_path, origin)?;
    let written = if upsert {
        store.write_rows(&rows, revision)?
    } else {
        store.replace_rows(&rows, revision)?
    };

    tracing::info!(
        origin = %origin,
        rows = written,
        revision,
        upsert,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "load complete"
    );

    if json_mode {
        print_json(&serde_json::json!({
            "origin": origin,
            "db": db_path.display().to_string(),
            "triples": index.triple_count(),
            "observations": index.observation_count(),
            "rows": written,
            "revision": revision,
            "mode": if upsert { "upsert" } else { "replace" },
        }));
    } else {
        println!("Loaded {} into {}", input.display(), db_path.display());
        println!("  Triples:      {}", index.triple_count());
        println!("  Observations: {}", index.observation_count());
        println!("  Rows written: {}", written);
        println!("  Revision:     {}", revision);
        println!("  Mode:         {}", if upsert { "upsert" } else { "replace" });
    }
    Ok(())
}

// =============================================================================
// WARM COMMAND
// =============================================================================

pub fn cmd_warm(config: &MixerConfig, json_mode: bool) -> Result<(), MixerError> {
    let path = config
        .stores
        .base_path
        .as_ref()
        .ok_or_else(|| MixerError::Config("no base_path configured".to_string()))?;

    let base = RedbRowStore::open(path, Origin::Base)?;
    let started = Instant::now();
    let warm = WarmCache::build(&base)?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let base_rows = base.row_count()?;

    if json_mode {
        print_json(&serde_json::json!({
            "base_rows": base_rows,
            "entities": warm.entity_count(),
            "places": warm.place_count(),
            "elapsed_ms": elapsed_ms,
        }));
    } else {
        println!("Warm cache built in {} ms", elapsed_ms);
        println!("  Base rows: {}", base_rows);
        println!("  Entities:  {}", warm.entity_count());
        println!("  Places:    {}", warm.place_count());
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Print a merged result with its fingerprint.
fn print_merged<T: Serialize>(merged: &Merged<T>, json_mode: bool) -> Result<(), MixerError> {
    let fingerprint = golden::fingerprint(merged)?;
    let value = serde_json::to_value(merged)
        .map_err(|e| MixerError::MalformedPayload(e.to_string()))?;

    if json_mode {
        print_json(&serde_json::json!({
            "result": value,
            "fingerprint": fingerprint,
        }));
    } else {
        print_json(&value);
        println!("fingerprint: {}", fingerprint);
    }
    Ok(())
}

pub async fn cmd_query(
    config: &MixerConfig,
    json_mode: bool,
    query: QueryCommand,
) -> Result<(), MixerError> {
    let mixer = Orchestrator::from_config(config)?;

    match query {
        QueryCommand::PropertyValues {
            dcids,
            property,
            direction,
            value_type,
            limit,
        } => {
            let direction = Direction::parse(&direction)?;
            let merged = mixer
                .property_values(&dcids, &property, direction, value_type.as_deref(), limit)
                .await?;
            print_merged(&merged, json_mode)
        }
        QueryCommand::Triples { dcids, limit } => {
            print_merged(&mixer.triples(&dcids, limit).await?, json_mode)
        }
        QueryCommand::Labels { dcids } => {
            print_merged(&mixer.property_labels(&dcids).await?, json_mode)
        }
        QueryCommand::PlacesIn { dcids, place_type } => {
            print_merged(&mixer.places_in(&dcids, &place_type).await?, json_mode)
        }
        QueryCommand::StatVars { dcids } => {
            print_merged(&mixer.place_stat_vars(&dcids).await?, json_mode)
        }
        QueryCommand::StatAll {
            places,
            stat_vars,
            measurement_method,
        } => {
            let merged = mixer
                .stat_all(&places, &stat_vars, measurement_method.as_deref())
                .await?;
            print_merged(&merged, json_mode)
        }
        QueryCommand::StatValue {
            place,
            stat_var,
            date,
            measurement_method,
        } => {
            let merged = mixer
                .stat_value(
                    &place,
                    &stat_var,
                    date.as_deref(),
                    measurement_method.as_deref(),
                )
                .await?;
            print_merged(&merged, json_mode)
        }
        QueryCommand::ResolveIds {
            in_property,
            out_property,
            ids,
        } => {
            let merged = mixer.resolve_ids(&in_property, &out_property, &ids).await?;
            print_merged(&merged, json_mode)
        }
    }
}

// =============================================================================
// INIT-CONFIG COMMAND
// =============================================================================

pub fn cmd_init_config() -> Result<(), MixerError> {
    print!("{}", MixerConfig::example_toml());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"
{"kind":"triple","subject":"geoId/06","predicate":"name","value":"California"}
{"kind":"triple","subject":"geoId/06","predicate":"typeOf","object":"State"}
"#;

    #[test]
    fn load_writes_rows_and_warm_reads_them() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("base.jsonl");
        std::fs::write(&input, EXPORT).expect("write export");
        let db = dir.path().join("base.redb");

        let mut config = MixerConfig::default();
        config.stores.base_path = Some(db.clone());

        cmd_load(&config, true, LoadTarget::Base, &input, 7, None, false).expect("load");
        let store = RedbRowStore::open(&db, Origin::Base).expect("reopen");
        assert_eq!(store.last_revision().expect("revision"), 7);
        assert!(store.row_count().expect("count") > 0);
        drop(store);

        cmd_warm(&config, true).expect("warm");
    }

    #[test]
    fn load_without_target_path_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("x.jsonl");
        std::fs::write(&input, EXPORT).expect("write export");

        let result = cmd_load(
            &MixerConfig::default(),
            true,
            LoadTarget::Branch,
            &input,
            1,
            None,
            false,
        );
        assert!(matches!(result, Err(MixerError::Config(_))));
    }

    const NEXT_EXPORT: &str = r#"
{"kind":"triple","subject":"geoId/05","predicate":"name","value":"Arkansas"}
"#;

    #[test]
    fn reload_drops_retracted_rows() {
        let dir = tempfile::tempdir().expect("temp dir");
        let first = dir.path().join("v1.jsonl");
        let second = dir.path().join("v2.jsonl");
        std::fs::write(&first, EXPORT).expect("write export");
        std::fs::write(&second, NEXT_EXPORT).expect("write export");
        let db = dir.path().join("base.redb");

        let mut config = MixerConfig::default();
        config.stores.base_path = Some(db.clone());
        cmd_load(&config, true, LoadTarget::Base, &first, 1, None, false).expect("load v1");
        cmd_load(&config, true, LoadTarget::Base, &second, 2, None, false).expect("load v2");

        let store = RedbRowStore::open(&db, Origin::Base).expect("reopen");
        let gone = mixer_core::codec::encode(
            mixer_core::codec::RowKind::PropertyValues,
            "geoId/06",
            "name",
            Direction::Out,
            "",
        );
        assert!(store.fetch_rows(&[gone]).expect("fetch").is_empty());
        assert_eq!(store.last_revision().expect("revision"), 2);
    }

    #[test]
    fn upsert_load_keeps_earlier_rows() {
        let dir = tempfile::tempdir().expect("temp dir");
        let first = dir.path().join("v1.jsonl");
        let second = dir.path().join("v2.jsonl");
        std::fs::write(&first, EXPORT).expect("write export");
        std::fs::write(&second, NEXT_EXPORT).expect("write export");
        let db = dir.path().join("branch.redb");

        let mut config = MixerConfig::default();
        config.stores.branch_path = Some(db.clone());
        cmd_load(&config, true, LoadTarget::Branch, &first, 1, None, false).expect("load v1");
        cmd_load(&config, true, LoadTarget::Branch, &second, 2, None, true).expect("load v2");

        let store = RedbRowStore::open(&db, Origin::Branch).expect("reopen");
        let kept = mixer_core::codec::encode(
            mixer_core::codec::RowKind::PropertyValues,
            "geoId/06",
            "name",
            Direction::Out,
            "",
        );
        assert_eq!(store.fetch_rows(&[kept]).expect("fetch").len(), 1);
    }

    #[test]
    fn branch_older_than_base_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("x.jsonl");
        std::fs::write(&input, EXPORT).expect("write export");

        let mut config = MixerConfig::default();
        config.stores.base_path = Some(dir.path().join("base.redb"));
        config.stores.branch_path = Some(dir.path().join("branch.redb"));

        cmd_load(&config, true, LoadTarget::Base, &input, 5, None, false).expect("load base");
        let result = cmd_load(&config, true, LoadTarget::Branch, &input, 1, None, false);
        assert!(matches!(result, Err(MixerError::InvalidRequest(_))));
        assert!(!dir.path().join("branch.redb").exists());

        cmd_load(&config, true, LoadTarget::Branch, &input, 5, None, false)
            .expect("same revision");
        cmd_load(&config, true, LoadTarget::Branch, &input, 6, None, false)
            .expect("newer revision");
    }

    #[test]
    fn base_newer_than_branch_is_accepted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("x.jsonl");
        std::fs::write(&input, EXPORT).expect("write export");

        let mut config = MixerConfig::default();
        config.stores.base_path = Some(dir.path().join("base.redb"));
        config.stores.branch_path = Some(dir.path().join("branch.redb"));

        cmd_load(&config, true, LoadTarget::Branch, &input, 3, None, false).expect("load branch");
        cmd_load(&config, true, LoadTarget::Base, &input, 4, None, false).expect("load base");
    }

    #[test]
    fn directories_are_not_inputs() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(validate_file_path(dir.path()).is_err());
        assert!(validate_file_path(&dir.path().join("missing")).is_err());
    }
}
