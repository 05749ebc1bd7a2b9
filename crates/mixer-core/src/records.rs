//! # Record Loader and Triple Index
//!
//! Parses the JSON Lines record export and materializes it into a
//! `TripleIndex`, the in-memory graph that backs the override store, the
//! query engine and the offline snapshot builder.
//!
//! ## Export format
//!
//! One JSON object per line; blank lines and `#` lines are ignored.
//!
//! ```text
//! {"kind":"triple","subject":"geoId/06","predicate":"typeOf","object":"State"}
//! {"kind":"triple","subject":"geoId/06","predicate":"name","value":"California"}
//! {"kind":"observation","statVar":"Count_Person","place":"geoId/02","date":"2020","value":733391}
//! ```
//!
//! Display names come from `name` triples, types from `typeOf` triples.
//! All index structures are `BTreeMap`/`BTreeSet` so every derived row is
//! produced in the same order for the same input.

use crate::codec::{self, Payload, RowKey, RowKind};
use crate::primitives::{MAX_COMPONENT_LENGTH, NAME_PREDICATE, TYPE_PREDICATE};
use crate::types::{Direction, MixerError, Node, Observation, PropertyLabels, Triple};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// RECORDS
// =============================================================================

/// A triple line of the export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TripleRecord {
    pub subject: String,
    pub predicate: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub provenance: Option<String>,
}

/// One line of the record export.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Triple(TripleRecord),
    Observation(Observation),
}

fn check_component(what: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} must not be empty", what));
    }
    if value.len() > MAX_COMPONENT_LENGTH {
        return Err(format!(
            "{} exceeds {} bytes",
            what, MAX_COMPONENT_LENGTH
        ));
    }
    Ok(())
}

impl Record {
    /// Check the structural rules JSON decoding cannot express.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Triple(t) => {
                check_component("subject", &t.subject)?;
                check_component("predicate", &t.predicate)?;
                match (&t.object, &t.value) {
                    (Some(object), None) => check_component("object", object),
                    (None, Some(_)) => Ok(()),
                    _ => Err("triple needs exactly one of 'object' or 'value'".to_string()),
                }
            }
            Self::Observation(o) => {
                check_component("statVar", &o.stat_var)?;
                check_component("place", &o.place)?;
                check_component("date", &o.date)?;
                if !o.value.is_finite() {
                    return Err("observation value must be finite".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Parse a whole export. Fails on the first bad line, naming it.
pub fn parse_records(input: &str) -> Result<Vec<Record>, MixerError> {
    let mut records = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = idx + 1;
        let record: Record = serde_json::from_str(line).map_err(|e| {
            MixerError::MalformedPayload(format!("line {}: {}", line_no, e))
        })?;
        record
            .validate()
            .map_err(|reason| {
                MixerError::MalformedPayload(format!("line {}: {}", line_no, reason))
            })?;
        records.push(record);
    }
    Ok(records)
}

/// Read and parse an export file.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>, MixerError> {
    let path = path.as_ref();
    let input = std::fs::read_to_string(path)
        .map_err(|e| MixerError::Io(format!("{}: {}", path.display(), e)))?;
    parse_records(&input)
}

// =============================================================================
// TRIPLE INDEX
// =============================================================================

/// The object end of a stored triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Object {
    Entity(String),
    Literal(String),
}

/// In-memory knowledge graph built from records.
#[derive(Debug, Clone, Default)]
pub struct TripleIndex {
    /// subject -> predicate -> object -> provenance
    outgoing: BTreeMap<String, BTreeMap<String, BTreeMap<Object, Option<String>>>>,
    /// object dcid -> predicate -> subject -> provenance
    incoming: BTreeMap<String, BTreeMap<String, BTreeMap<String, Option<String>>>>,
    names: BTreeMap<String, String>,
    types: BTreeMap<String, BTreeSet<String>>,
    /// (place, statVar) -> observations keyed by (date, method)
    observations: BTreeMap<(String, String), BTreeMap<(String, String), Observation>>,
    triple_count: usize,
}

impl TripleIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Parse and index an export file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MixerError> {
        Ok(Self::from_records(read_records(path)?))
    }

    /// Add one record. Duplicate triples and observations keep the first copy.
    pub fn insert(&mut self, record: Record) {
        match record {
            Record::Triple(t) => self.insert_triple(t),
            Record::Observation(o) => {
                let series = self
                    .observations
                    .entry((o.place.clone(), o.stat_var.clone()))
                    .or_default();
                series
                    .entry((o.date.clone(), o.method().to_string()))
                    .or_insert(o);
            }
        }
    }

    fn insert_triple(&mut self, t: TripleRecord) {
        let object = match (t.object, t.value) {
            (Some(id), _) => Object::Entity(id),
            (None, Some(value)) => Object::Literal(value),
            (None, None) => return,
        };

        match (&object, t.predicate.as_str()) {
            (Object::Literal(value), NAME_PREDICATE) => {
                self.names
                    .entry(t.subject.clone())
                    .or_insert_with(|| value.clone());
            }
            (Object::Entity(type_name), TYPE_PREDICATE) => {
                self.types
                    .entry(t.subject.clone())
                    .or_default()
                    .insert(type_name.clone());
            }
            _ => {}
        }

        if let Object::Entity(id) = &object {
            self.incoming
                .entry(id.clone())
                .or_default()
                .entry(t.predicate.clone())
                .or_default()
                .entry(t.subject.clone())
                .or_insert_with(|| t.provenance.clone());
        }

        let objects = self
            .outgoing
            .entry(t.subject)
            .or_default()
            .entry(t.predicate)
            .or_default();
        if !objects.contains_key(&object) {
            objects.insert(object, t.provenance);
            self.triple_count = self.triple_count.saturating_add(1);
        }
    }

    #[must_use]
    pub fn triple_count(&self) -> usize {
        self.triple_count
    }

    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.observations.values().map(BTreeMap::len).sum()
    }

    /// Every entity that appears as a subject or entity object, sorted.
    #[must_use]
    pub fn entities(&self) -> BTreeSet<&str> {
        self.outgoing
            .keys()
            .chain(self.incoming.keys())
            .map(String::as_str)
            .collect()
    }

    /// Display data for an entity.
    #[must_use]
    pub fn node(&self, dcid: &str) -> Node {
        Node::entity(
            dcid,
            self.names.get(dcid).cloned(),
            self.types
                .get(dcid)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Neighbors of `entity` over `predicate`, sorted by identity.
    ///
    /// With a type filter only entity neighbors carrying that type are kept.
    #[must_use]
    pub fn neighbors(
        &self,
        entity: &str,
        predicate: &str,
        direction: Direction,
        type_filter: Option<&str>,
    ) -> Vec<Node> {
        let mut nodes: Vec<Node> = match direction {
            Direction::Out => self
                .outgoing
                .get(entity)
                .and_then(|p| p.get(predicate))
                .into_iter()
                .flatten()
                .map(|(object, provenance)| match object {
                    Object::Entity(id) => self.node(id),
                    Object::Literal(value) => Node::literal(value.clone()),
                }
                .with_provenance(provenance.clone()))
                .collect(),
            Direction::In => self
                .incoming
                .get(entity)
                .and_then(|p| p.get(predicate))
                .into_iter()
                .flatten()
                .map(|(subject, provenance)| self.node(subject).with_provenance(provenance.clone()))
                .collect(),
        };

        if let Some(filter) = type_filter {
            nodes.retain(|n| n.has_type(filter));
        }
        nodes.sort_by(|a, b| a.identity().cmp(b.identity()).then_with(|| a.cmp(b)));
        nodes
    }

    fn triple(
        &self,
        subject: &str,
        predicate: &str,
        object: &Object,
        provenance: &Option<String>,
    ) -> Triple {
        let mut triple = Triple {
            subject_id: subject.to_string(),
            subject_name: self.names.get(subject).cloned(),
            subject_types: self
                .types
                .get(subject)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default(),
            predicate: predicate.to_string(),
            provenance_id: provenance.clone(),
            ..Triple::default()
        };
        match object {
            Object::Entity(id) => {
                let node = self.node(id);
                triple.object_id = node.dcid;
                triple.object_name = node.name;
                triple.object_types = node.types;
            }
            Object::Literal(value) => triple.object_value = Some(value.clone()),
        }
        triple
    }

    /// Every triple touching `entity`, sorted and de-duplicated.
    #[must_use]
    pub fn triples(&self, entity: &str) -> Vec<Triple> {
        let mut triples = Vec::new();
        if let Some(predicates) = self.outgoing.get(entity) {
            for (predicate, objects) in predicates {
                for (object, provenance) in objects {
                    triples.push(self.triple(entity, predicate, object, provenance));
                }
            }
        }
        if let Some(predicates) = self.incoming.get(entity) {
            let object = Object::Entity(entity.to_string());
            for (predicate, subjects) in predicates {
                for (subject, provenance) in subjects {
                    triples.push(self.triple(subject, predicate, &object, provenance));
                }
            }
        }
        triples.sort();
        triples.dedup();
        triples
    }

    /// Predicates known for `entity`, both lists sorted.
    #[must_use]
    pub fn property_labels(&self, entity: &str) -> PropertyLabels {
        PropertyLabels {
            in_labels: self
                .incoming
                .get(entity)
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default(),
            out_labels: self
                .outgoing
                .get(entity)
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Observations for `(place, statVar)`, ordered by date then method.
    #[must_use]
    pub fn observations(&self, place: &str, stat_var: &str) -> Vec<Observation> {
        self.observations
            .get(&(place.to_string(), stat_var.to_string()))
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stat vars with at least one observation for `place`, sorted.
    #[must_use]
    pub fn stat_vars(&self, place: &str) -> Vec<String> {
        self.observations
            .range((place.to_string(), String::new())..)
            .take_while(|((p, _), _)| p == place)
            .map(|((_, stat_var), _)| stat_var.clone())
            .collect()
    }

    /// Reconciliation lookup.
    ///
    /// For each input value, the entities whose `in_property` holds that value,
    /// projected onto `out_property` (`dcid` projects onto the entity itself).
    #[must_use]
    pub fn resolve(
        &self,
        in_property: &str,
        out_property: &str,
        values: &[String],
    ) -> BTreeMap<String, Vec<String>> {
        let wanted: BTreeSet<&str> = values.iter().map(String::as_str).collect();
        let mut matches: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (subject, predicates) in &self.outgoing {
            let Some(objects) = predicates.get(in_property) else {
                continue;
            };
            for object in objects.keys() {
                let value = match object {
                    Object::Entity(v) | Object::Literal(v) => v.as_str(),
                };
                if !wanted.contains(value) {
                    continue;
                }
                let projected = matches.entry(value.to_string()).or_default();
                if out_property == "dcid" {
                    projected.insert(subject.clone());
                } else if let Some(outs) = predicates.get(out_property) {
                    projected.extend(outs.keys().map(|o| match o {
                        Object::Entity(v) | Object::Literal(v) => v.clone(),
                    }));
                }
            }
        }

        matches
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect()
    }

    // =========================================================================
    // SNAPSHOT ROWS
    // =========================================================================

    /// Materialize every cache row this index implies.
    ///
    /// Per entity: one untyped property-values row per (predicate, direction)
    /// plus one per neighbor type, a triples row and a labels row. Per place:
    /// one observations row per stat var and a stat-var index row.
    #[must_use]
    pub fn to_rows(&self) -> BTreeMap<RowKey, Payload> {
        let mut rows = BTreeMap::new();

        for entity in self.entities() {
            let labels = self.property_labels(entity);
            for direction in [Direction::Out, Direction::In] {
                for predicate in labels.labels(direction) {
                    let neighbors = self.neighbors(entity, predicate, direction, None);
                    let types: BTreeSet<&str> = neighbors
                        .iter()
                        .flat_map(|n| n.types.iter().map(String::as_str))
                        .collect();
                    for type_name in types {
                        let typed: Vec<Node> = neighbors
                            .iter()
                            .filter(|n| n.has_type(type_name))
                            .cloned()
                            .collect();
                        rows.insert(
                            codec::encode(
                                RowKind::PropertyValues,
                                entity,
                                predicate,
                                direction,
                                type_name,
                            ),
                            Payload::Neighbors(typed),
                        );
                    }
                    rows.insert(
                        codec::encode(RowKind::PropertyValues, entity, predicate, direction, ""),
                        Payload::Neighbors(neighbors),
                    );
                }
            }
            rows.insert(
                codec::encode(RowKind::Triples, entity, "", Direction::Out, ""),
                Payload::Triples(self.triples(entity)),
            );
            rows.insert(
                codec::encode(RowKind::PropertyLabels, entity, "", Direction::Out, ""),
                Payload::PropertyLabels(labels),
            );
        }

        let mut stat_vars: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for ((place, stat_var), series) in &self.observations {
            rows.insert(
                codec::encode(RowKind::Observations, place, stat_var, Direction::Out, ""),
                Payload::Observations(series.values().cloned().collect()),
            );
            stat_vars.entry(place).or_default().push(stat_var.clone());
        }
        for (place, vars) in stat_vars {
            rows.insert(
                codec::encode(RowKind::StatVars, place, "", Direction::Out, ""),
                Payload::StatVars(vars),
            );
        }

        rows
    }

    /// `to_rows`, encoded for a row store.
    pub fn to_encoded_rows(&self) -> Result<BTreeMap<RowKey, Vec<u8>>, MixerError> {
        self.to_rows()
            .into_iter()
            .map(|(key, payload)| Ok((key, codec::encode_payload(&payload)?)))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
