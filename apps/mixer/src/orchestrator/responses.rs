//! Response shapes and the grouping applied after a merge.

use mixer_core::{Direction, Node, Observation, Triple};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// predicate → neighbor type → neighbors.
pub type NeighborGroups = BTreeMap<String, BTreeMap<String, Vec<Node>>>;

/// Merged payload plus the degradation flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Merged<T> {
    pub payload: T,
    pub partial: bool,
}

/// Triples of one entity split by direction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TripleGroups {
    #[serde(rename = "out")]
    pub outgoing: NeighborGroups,
    #[serde(rename = "in")]
    pub incoming: NeighborGroups,
}

/// One observation series: a shared method, period, unit and import.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSeries {
    pub measurement_method: Option<String>,
    pub observation_period: Option<String>,
    pub unit: Option<String>,
    pub import_name: Option<String>,
    /// date → value
    pub values: BTreeMap<String, f64>,
}

/// A single chosen observation. All fields are `None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatValue {
    pub value: Option<f64>,
    pub date: Option<String>,
    pub measurement_method: Option<String>,
}

pub(crate) fn group_by_type(predicate: &str, nodes: Vec<Node>) -> NeighborGroups {
    let mut groups = NeighborGroups::new();
    for node in nodes {
        groups
            .entry(predicate.to_string())
            .or_default()
            .entry(node.type_key().to_string())
            .or_default()
            .push(node);
    }
    groups
}

pub(crate) fn group_triples(entity: &str, triples: Vec<Triple>) -> TripleGroups {
    let mut groups = TripleGroups::default();
    for triple in triples {
        let side = match triple.direction_from(entity) {
            Direction::Out => &mut groups.outgoing,
            Direction::In => &mut groups.incoming,
        };
        let node = triple.neighbor_of(entity);
        side.entry(triple.predicate)
            .or_default()
            .entry(node.type_key().to_string())
            .or_default()
            .push(node);
    }
    groups
}

/// Limit group of a triple: predicate, direction seen from `entity`, and
/// neighbor type.
pub(crate) fn triple_group(entity: &str, triple: &Triple) -> (String, Direction, String) {
    (
        triple.predicate.clone(),
        triple.direction_from(entity),
        triple.neighbor_of(entity).type_key().to_string(),
    )
}

/// Split merged observations into series, in first-seen order.
pub(crate) fn build_series(observations: Vec<Observation>) -> Vec<SourceSeries> {
    let mut series: Vec<SourceSeries> = Vec::new();
    for obs in observations {
        let at = series.iter().position(|s| {
            s.measurement_method == obs.measurement_method
                && s.observation_period == obs.observation_period
                && s.unit == obs.unit
                && s.import_name == obs.import_name
        });
        match at {
            Some(i) => {
                series[i].values.entry(obs.date).or_insert(obs.value);
            }
            None => series.push(SourceSeries {
                measurement_method: obs.measurement_method,
                observation_period: obs.observation_period,
                unit: obs.unit,
                import_name: obs.import_name,
                values: BTreeMap::from([(obs.date, obs.value)]),
            }),
        }
    }
    series
}

/// Pick the observation for `date`, or the latest one when no date is given.
///
/// Among observations for the same date the first in merged order wins.
/// ISO-8601 dates order lexicographically.
pub(crate) fn pick_value(observations: &[Observation], date: Option<&str>) -> StatValue {
    let wanted = match date {
        Some(d) => Some(d),
        None => observations.iter().map(|o| o.date.as_str()).max(),
    };
    wanted
        .and_then(|d| observations.iter().find(|o| o.date == d))
        .map(|o| StatValue {
            value: Some(o.value),
            date: Some(o.date.clone()),
            measurement_method: o.measurement_method.clone(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(date: &str, value: f64, method: Option<&str>) -> Observation {
        Observation {
            stat_var: "Count_Person".into(),
            place: "geoId/06".into(),
            date: date.into(),
            value,
            measurement_method: method.map(str::to_string),
            observation_period: None,
            unit: None,
            import_name: None,
        }
    }

    #[test]
    fn nodes_group_under_their_first_type() {
        let nodes = vec![
            Node::entity("geoId/0647766", None, vec!["City".into()]),
            Node::entity("geoId/06085", None, vec!["County".into()]),
            Node::literal("x"),
        ];
        let groups = group_by_type("containedInPlace", nodes);
        let by_type = &groups["containedInPlace"];
        assert_eq!(by_type["City"].len(), 1);
        assert_eq!(by_type["County"].len(), 1);
        assert_eq!(by_type["Text"].len(), 1);
        assert!(group_by_type("name", Vec::new()).is_empty());
    }

    #[test]
    fn triples_split_by_direction() {
        let triples = vec![
            Triple {
                subject_id: "geoId/06".into(),
                predicate: "typeOf".into(),
                object_id: Some("State".into()),
                object_types: vec!["Class".into()],
                ..Triple::default()
            },
            Triple {
                subject_id: "geoId/06085".into(),
                subject_types: vec!["County".into()],
                predicate: "containedInPlace".into(),
                object_id: Some("geoId/06".into()),
                ..Triple::default()
            },
        ];
        let groups = group_triples("geoId/06", triples);
        assert!(groups.outgoing["typeOf"].contains_key("Class"));
        assert_eq!(
            groups.incoming["containedInPlace"]["County"][0].dcid.as_deref(),
            Some("geoId/06085")
        );
    }

    #[test]
    fn series_split_by_method() {
        let series = build_series(vec![
            obs("2020", 1.0, Some("CensusACS")),
            obs("2021", 2.0, Some("CensusACS")),
            obs("2020", 3.0, None),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].values.len(), 2);
        assert_eq!(series[1].measurement_method, None);
    }

    #[test]
    fn latest_date_chosen_by_default() {
        let all = vec![obs("2019", 1.0, None), obs("2021", 2.0, None), obs("2020", 3.0, None)];
        let picked = pick_value(&all, None);
        assert_eq!(picked.date.as_deref(), Some("2021"));
        assert_eq!(picked.value, Some(2.0));

        assert_eq!(pick_value(&all, Some("2020")).value, Some(3.0));
        assert_eq!(pick_value(&all, Some("1999")), StatValue::default());
        assert_eq!(pick_value(&[], None), StatValue::default());
    }
}
