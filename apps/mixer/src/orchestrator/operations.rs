//! The request operations served by the orchestrator.

use super::fetch::{self, Lookup};
use super::responses::{self, Merged, NeighborGroups, SourceSeries, StatValue, TripleGroups};
use super::{Orchestrator, Outcome, assemble, entity_list, non_empty};
use mixer_core::codec::{self, RowKind};
use mixer_core::primitives::{CONTAINED_IN_PLACE, MAX_STAT_VARS_PER_REQUEST};
use mixer_core::{
    Direction, EngineQuery, EngineRows, EntityMap, MergeOutcome, MergePolicy, MixerError, Node,
    Observation, Origin, PropertyLabels, merge, merge_with_groups,
};
use std::collections::BTreeMap;
use tokio::time::Instant;

impl Orchestrator {
    fn policy(&self, limit: usize) -> MergePolicy {
        MergePolicy {
            limit,
            strict_override: self.inner.options.override_required
                || self.inner.options.override_only,
            measurement_method: None,
        }
    }

    // =========================================================================
    // PROPERTY VALUES
    // =========================================================================

    /// Neighbors of each entity over one predicate, grouped by neighbor type.
    ///
    /// `limit` caps each (entity, predicate, direction) list before grouping;
    /// 0 means unbounded.
    pub async fn property_values(
        &self,
        dcids: &[String],
        property: &str,
        direction: Direction,
        value_type: Option<&str>,
        limit: usize,
    ) -> Result<Merged<EntityMap<NeighborGroups>>, MixerError> {
        let entities = entity_list("dcids", dcids)?;
        non_empty("property", property)?;
        let value_type = value_type.filter(|t| !t.is_empty()).map(str::to_string);
        let property = property.to_string();
        let deadline = self.request_deadline();

        let outcomes = self
            .fan_out(entities.clone(), move |this, entity| {
                let property = property.clone();
                let value_type = value_type.clone();
                async move {
                    let outcome = this
                        .neighbors_of(
                            &entity,
                            &property,
                            direction,
                            value_type.as_deref(),
                            limit,
                            deadline,
                        )
                        .await?;
                    Ok(outcome.map(|nodes| responses::group_by_type(&property, nodes)))
                }
            })
            .await?;

        assemble(entities, outcomes)
    }

    /// Places of `place_type` contained in each parent place.
    pub async fn places_in(
        &self,
        dcids: &[String],
        place_type: &str,
    ) -> Result<Merged<EntityMap<Vec<String>>>, MixerError> {
        let entities = entity_list("dcids", dcids)?;
        non_empty("placeType", place_type)?;
        let place_type = place_type.to_string();
        let deadline = self.request_deadline();

        let outcomes = self
            .fan_out(entities.clone(), move |this, entity| {
                let place_type = place_type.clone();
                async move {
                    let outcome = this
                        .neighbors_of(
                            &entity,
                            CONTAINED_IN_PLACE,
                            Direction::In,
                            Some(&place_type),
                            0,
                            deadline,
                        )
                        .await?;
                    Ok(outcome.map(|nodes| {
                        nodes
                            .into_iter()
                            .filter_map(|n| n.dcid)
                            .collect::<Vec<_>>()
                    }))
                }
            })
            .await?;

        assemble(entities, outcomes)
    }

    /// One (entity, predicate, direction, type) logical query.
    async fn neighbors_of(
        &self,
        entity: &str,
        property: &str,
        direction: Direction,
        value_type: Option<&str>,
        limit: usize,
        deadline: Instant,
    ) -> Result<Outcome<Vec<Node>>, MixerError> {
        let known_to_base = self
            .warm_cache()
            .is_none_or(|warm| warm.contains_directed(entity, property, direction));

        let lookup = Lookup {
            key: codec::encode(
                RowKind::PropertyValues,
                entity,
                property,
                direction,
                value_type.unwrap_or_default(),
            ),
            kind: RowKind::PropertyValues,
            skip_base: !known_to_base,
            base_from_warm: None,
            engine_query: known_to_base.then(|| EngineQuery::Neighbors {
                entity: entity.to_string(),
                predicate: property.to_string(),
                direction,
                type_filter: value_type.map(str::to_string),
            }),
            from_payload: fetch::neighbors_payload,
            from_engine: fetch::neighbors_rows,
        };

        let batches = fetch::flatten(self.gather(lookup, deadline).await, |nodes| nodes);
        let merged = merge(batches, &self.policy(limit))?;
        Ok(finish(merged))
    }

    // =========================================================================
    // TRIPLES
    // =========================================================================

    /// All triples touching each entity, split by direction.
    ///
    /// `limit` caps each (predicate, direction, neighbor type) group.
    pub async fn triples(
        &self,
        dcids: &[String],
        limit: usize,
    ) -> Result<Merged<EntityMap<TripleGroups>>, MixerError> {
        let entities = entity_list("dcids", dcids)?;
        let deadline = self.request_deadline();

        let outcomes = self
            .fan_out(entities.clone(), move |this, entity| async move {
                let known_to_base = this
                    .warm_cache()
                    .is_none_or(|warm| warm.labels(&entity).is_some());
                let lookup = Lookup {
                    key: codec::encode(RowKind::Triples, &entity, "", Direction::Out, ""),
                    kind: RowKind::Triples,
                    skip_base: !known_to_base,
                    base_from_warm: None,
                    engine_query: known_to_base.then(|| EngineQuery::Triples {
                        entity: entity.clone(),
                    }),
                    from_payload: fetch::triples_payload,
                    from_engine: fetch::triples_rows,
                };

                let batches = fetch::flatten(this.gather(lookup, deadline).await, |t| t);
                let merged = merge_with_groups(batches, &this.policy(limit), |t| {
                    responses::triple_group(&entity, t)
                })?;
                Ok(finish(merged).map(|triples| responses::group_triples(&entity, triples)))
            })
            .await?;

        assemble(entities, outcomes)
    }

    // =========================================================================
    // PROPERTY LABELS
    // =========================================================================

    /// In- and out-predicate names of each entity, sorted.
    pub async fn property_labels(
        &self,
        dcids: &[String],
    ) -> Result<Merged<EntityMap<PropertyLabels>>, MixerError> {
        let entities = entity_list("dcids", dcids)?;
        let deadline = self.request_deadline();

        let outcomes = self
            .fan_out(entities.clone(), move |this, entity| async move {
                let warm = this.warm_cache().map(|w| w.labels(&entity).cloned());
                let lookup = Lookup {
                    key: codec::encode(RowKind::PropertyLabels, &entity, "", Direction::Out, ""),
                    kind: RowKind::PropertyLabels,
                    skip_base: false,
                    engine_query: match &warm {
                        Some(None) => None,
                        _ => Some(EngineQuery::PropertyLabels {
                            entity: entity.clone(),
                        }),
                    },
                    base_from_warm: warm,
                    from_payload: fetch::labels_payload,
                    from_engine: fetch::labels_rows,
                };

                let batches = this.gather(lookup, deadline).await;
                let policy = this.policy(0);
                let outgoing = merge(
                    fetch::flatten(batches.clone(), |l: PropertyLabels| l.out_labels),
                    &policy,
                )?;
                let incoming = merge(
                    fetch::flatten(batches, |l: PropertyLabels| l.in_labels),
                    &policy,
                )?;

                let partial = outgoing.partial || incoming.partial;
                let all_failed = outgoing.all_failed && incoming.all_failed;
                let mut labels = PropertyLabels {
                    in_labels: incoming.into_items(),
                    out_labels: outgoing.into_items(),
                };
                labels.in_labels.sort();
                labels.out_labels.sort();
                Ok(Outcome {
                    value: labels,
                    partial,
                    all_failed,
                })
            })
            .await?;

        assemble(entities, outcomes)
    }

    // =========================================================================
    // STATISTICS
    // =========================================================================

    /// Stat vars with data for each place, sorted.
    pub async fn place_stat_vars(
        &self,
        dcids: &[String],
    ) -> Result<Merged<EntityMap<Vec<String>>>, MixerError> {
        let entities = entity_list("dcids", dcids)?;
        let deadline = self.request_deadline();

        let outcomes = self
            .fan_out(entities.clone(), move |this, place| async move {
                let warm = this.warm_cache().map(|w| {
                    let known = w.known_stat_vars(&place);
                    (!known.is_empty()).then(|| known.iter().cloned().collect::<Vec<_>>())
                });
                let lookup = Lookup {
                    key: codec::encode(RowKind::StatVars, &place, "", Direction::Out, ""),
                    kind: RowKind::StatVars,
                    skip_base: false,
                    engine_query: match &warm {
                        Some(None) => None,
                        _ => Some(EngineQuery::StatVars {
                            place: place.clone(),
                        }),
                    },
                    base_from_warm: warm,
                    from_payload: fetch::stat_vars_payload,
                    from_engine: fetch::stat_vars_rows,
                };

                let batches = fetch::flatten(this.gather(lookup, deadline).await, |v| v);
                let mut outcome = finish(merge(batches, &this.policy(0))?);
                outcome.value.sort();
                Ok(outcome)
            })
            .await?;

        assemble(entities, outcomes)
    }

    /// Every observation series for each (place, stat var) pair.
    ///
    /// Every requested place and stat var appears in the response, possibly
    /// with no series.
    pub async fn stat_all(
        &self,
        places: &[String],
        stat_vars: &[String],
        measurement_method: Option<&str>,
    ) -> Result<Merged<EntityMap<BTreeMap<String, Vec<SourceSeries>>>>, MixerError> {
        let places = entity_list("places", places)?;
        let stat_vars = entity_list("statVars", stat_vars)?;
        if stat_vars.len() > MAX_STAT_VARS_PER_REQUEST {
            return Err(MixerError::InvalidRequest(format!(
                "statVars has {} ids, maximum is {}",
                stat_vars.len(),
                MAX_STAT_VARS_PER_REQUEST
            )));
        }
        let method = measurement_method.filter(|m| !m.is_empty()).map(str::to_string);
        let deadline = self.request_deadline();

        let pairs: Vec<(String, String)> = places
            .iter()
            .flat_map(|p| stat_vars.iter().map(move |sv| (p.clone(), sv.clone())))
            .collect();

        let outcomes = self
            .fan_out(pairs, move |this, (place, stat_var)| {
                let method = method.clone();
                async move {
                    let outcome = this
                        .observations_of(&place, &stat_var, method, deadline)
                        .await?;
                    Ok(outcome.map(responses::build_series))
                }
            })
            .await?;

        if !outcomes.is_empty() && outcomes.iter().all(|o| o.all_failed) {
            return Err(MixerError::AllOriginsFailed(format!(
                "no origin answered for any of {} place/stat var pairs",
                outcomes.len()
            )));
        }

        let partial = outcomes.iter().any(|o| o.partial);
        let mut outcomes = outcomes.into_iter();
        let mut payload = EntityMap::new();
        for place in places {
            let mut by_stat_var = BTreeMap::new();
            for stat_var in &stat_vars {
                let series = outcomes.next().map(|o| o.value).unwrap_or_default();
                by_stat_var.insert(stat_var.clone(), series);
            }
            payload.insert(place, by_stat_var);
        }

        Ok(Merged { payload, partial })
    }

    /// One value of `stat_var` at `place`.
    ///
    /// With no `date`, the latest date wins. No data gives an empty value,
    /// not an error.
    pub async fn stat_value(
        &self,
        place: &str,
        stat_var: &str,
        date: Option<&str>,
        measurement_method: Option<&str>,
    ) -> Result<Merged<StatValue>, MixerError> {
        non_empty("place", place)?;
        non_empty("statVar", stat_var)?;
        let method = measurement_method.filter(|m| !m.is_empty()).map(str::to_string);
        let deadline = self.request_deadline();

        let outcome = self.observations_of(place, stat_var, method, deadline).await?;
        if outcome.all_failed {
            return Err(MixerError::AllOriginsFailed(format!(
                "no origin answered for {} at {}",
                stat_var, place
            )));
        }
        let date = date.filter(|d| !d.is_empty());
        Ok(Merged {
            payload: responses::pick_value(&outcome.value, date),
            partial: outcome.partial,
        })
    }

    async fn observations_of(
        &self,
        place: &str,
        stat_var: &str,
        method: Option<String>,
        deadline: Instant,
    ) -> Result<Outcome<Vec<Observation>>, MixerError> {
        let known_to_base = self
            .warm_cache()
            .is_none_or(|warm| warm.known_stat_vars(place).contains(stat_var));

        let lookup = Lookup {
            key: codec::encode(RowKind::Observations, place, stat_var, Direction::Out, ""),
            kind: RowKind::Observations,
            skip_base: !known_to_base,
            base_from_warm: None,
            engine_query: known_to_base.then(|| EngineQuery::Observations {
                place: place.to_string(),
                stat_var: stat_var.to_string(),
            }),
            from_payload: fetch::observations_payload,
            from_engine: fetch::observations_rows,
        };

        let batches = fetch::flatten(self.gather(lookup, deadline).await, |obs| obs);
        let policy = MergePolicy {
            measurement_method: method,
            ..self.policy(0)
        };
        Ok(finish(merge(batches, &policy)?))
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// Resolve `ids` (values of `in_property`) to values of `out_property`.
    ///
    /// Bypasses every cache and goes straight to the query engine. Every
    /// input id appears in the response, possibly with no matches.
    pub async fn resolve_ids(
        &self,
        in_property: &str,
        out_property: &str,
        ids: &[String],
    ) -> Result<Merged<EntityMap<Vec<String>>>, MixerError> {
        non_empty("inProperty", in_property)?;
        non_empty("outProperty", out_property)?;
        let ids = entity_list("ids", ids)?;
        let deadline = self.request_deadline();

        let query = EngineQuery::ReconMatch {
            in_property: in_property.to_string(),
            out_property: out_property.to_string(),
            values: ids.clone(),
        };
        let mut matches = match self.ask_engine(query, deadline).await {
            Ok(EngineRows::Recon(matches)) => matches,
            Ok(_) => {
                return Err(MixerError::AllOriginsFailed(
                    "query engine returned the wrong row shape".to_string(),
                ));
            }
            Err(e) => {
                tracing::warn!(origin = %Origin::QueryEngine, error = %e, "reconciliation failed");
                return Err(MixerError::AllOriginsFailed(e.to_string()));
            }
        };

        let payload = ids
            .into_iter()
            .map(|id| {
                let resolved = matches.remove(&id).unwrap_or_default();
                (id, resolved)
            })
            .collect();
        Ok(Merged {
            payload,
            partial: false,
        })
    }
}

fn finish<T>(merged: MergeOutcome<T>) -> Outcome<Vec<T>> {
    Outcome {
        partial: merged.partial,
        all_failed: merged.all_failed,
        value: merged.into_items(),
    }
}
