use std::collections::{HashMap, HashSet};

use crate::knowledge::{Entity, Relationship};

/// Entity after cleaning, annotated for display.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    /// Index into [`GraphView::categories`].
    pub category: usize,
    /// Number of relationships touching this node.
    pub degree: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub description: String,
}

/// Cleaned, display-ready view of an extracted knowledge graph.
///
/// Building a view deduplicates entities by `(name, entity_type)` keeping the
/// longer description, collapses repeated relationships, and drops edges that
/// refer to entities not present in the cleaned set.
#[derive(Debug, Clone, Default)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Entity types in first-seen order.
    pub categories: Vec<String>,
    /// Relationships discarded because an endpoint was unknown.
    pub dropped_relationships: usize,
}

impl GraphView {
    pub fn build(entities: &[Entity], relationships: &[Relationship]) -> Self {
        let mut order: Vec<(String, String)> = Vec::new();
        let mut merged: HashMap<(String, String), String> = HashMap::new();
        let mut categories: Vec<String> = Vec::new();
        for entity in entities {
            let key = (entity.name.clone(), entity.entity_type.clone());
            match merged.get_mut(&key) {
                Some(description) => {
                    if entity.description.chars().count() > description.chars().count() {
                        *description = entity.description.clone();
                    }
                }
                None => {
                    if !categories.contains(&entity.entity_type) {
                        categories.push(entity.entity_type.clone());
                    }
                    merged.insert(key.clone(), entity.description.clone());
                    order.push(key);
                }
            }
        }

        let names: HashSet<&str> = order.iter().map(|(name, _)| name.as_str()).collect();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut dropped = 0usize;
        let mut degrees: HashMap<String, usize> = HashMap::new();
        for rel in relationships {
            let key = (
                rel.source.clone(),
                rel.target.clone(),
                rel.relation_type.clone(),
            );
            if !seen.insert(key) {
                continue;
            }
            if !names.contains(rel.source.as_str()) || !names.contains(rel.target.as_str()) {
                dropped += 1;
                continue;
            }
            *degrees.entry(rel.source.clone()).or_default() += 1;
            *degrees.entry(rel.target.clone()).or_default() += 1;
            edges.push(GraphEdge {
                source: rel.source.clone(),
                target: rel.target.clone(),
                relation_type: rel.relation_type.clone(),
                description: rel.description.clone(),
            });
        }

        let nodes = order
            .into_iter()
            .map(|(name, entity_type)| {
                let category = categories
                    .iter()
                    .position(|c| *c == entity_type)
                    .unwrap_or_default();
                let description = merged.remove(&(name.clone(), entity_type.clone()));
                GraphNode {
                    degree: degrees.get(&name).copied().unwrap_or_default(),
                    name,
                    entity_type,
                    description: description.unwrap_or_default(),
                    category,
                }
            })
            .collect();

        Self {
            nodes,
            edges,
            categories,
            dropped_relationships: dropped,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node count per entity type, in category order.
    pub fn type_counts(&self) -> Vec<(String, usize)> {
        self.categories
            .iter()
            .map(|category| {
                let count = self
                    .nodes
                    .iter()
                    .filter(|node| node.entity_type == *category)
                    .count();
                (category.clone(), count)
            })
            .collect()
    }

    /// Cleaned entities in the wire shape, for rebuilding or persisting.
    pub fn entities(&self) -> Vec<Entity> {
        self.nodes
            .iter()
            .map(|node| Entity {
                name: node.name.clone(),
                entity_type: node.entity_type.clone(),
                description: node.description.clone(),
            })
            .collect()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.edges
            .iter()
            .map(|edge| Relationship {
                source: edge.source.clone(),
                target: edge.target.clone(),
                relation_type: edge.relation_type.clone(),
                description: edge.description.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, entity_type: &str, description: &str) -> Entity {
        Entity::new(name, entity_type, description)
    }

    fn rel(source: &str, target: &str, relation_type: &str) -> Relationship {
        Relationship::new(source, target, relation_type)
    }

    #[test]
    fn duplicate_entities_keep_the_longer_description() {
        let short = "短描述";
        let long = "这是一个长得多的描述，包含更多的临床细节和说明文字";
        let entities = vec![
            entity("肺炎", "Disease", short),
            entity("肺炎", "Disease", long),
        ];
        let view = GraphView::build(&entities, &[]);
        assert_eq!(view.nodes.len(), 1);
        assert_eq!(view.nodes[0].description, long);

        // Order of arrival must not matter.
        let entities = vec![
            entity("肺炎", "Disease", long),
            entity("肺炎", "Disease", short),
        ];
        let view = GraphView::build(&entities, &[]);
        assert_eq!(view.nodes[0].description, long);
    }

    #[test]
    fn same_name_different_type_stays_distinct() {
        let entities = vec![
            entity("发热", "Symptom", "症状"),
            entity("发热", "Treatment", "物理降温处置"),
        ];
        let view = GraphView::build(&entities, &[]);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.categories, vec!["Symptom", "Treatment"]);
    }

    #[test]
    fn duplicate_relationships_collapse() {
        let entities = vec![
            entity("肺炎", "Disease", ""),
            entity("发热", "Symptom", ""),
        ];
        let relationships = vec![
            rel("肺炎", "发热", "HAS_SYMPTOM"),
            rel("肺炎", "发热", "HAS_SYMPTOM"),
        ];
        let view = GraphView::build(&entities, &relationships);
        assert_eq!(view.edges.len(), 1);
        assert_eq!(view.dropped_relationships, 0);
    }

    #[test]
    fn unknown_endpoints_are_dropped_and_counted() {
        let entities = vec![entity("肺炎", "Disease", "")];
        let relationships = vec![
            rel("肺炎", "幽灵实体", "RELATED_TO"),
            rel("另一个幽灵", "肺炎", "RELATED_TO"),
        ];
        let view = GraphView::build(&entities, &relationships);
        assert!(view.edges.is_empty());
        assert_eq!(view.dropped_relationships, 2);
    }

    #[test]
    fn categories_keep_first_seen_order_and_degrees_count_both_ends() {
        let entities = vec![
            entity("肺炎", "Disease", ""),
            entity("发热", "Symptom", ""),
            entity("咳嗽", "Symptom", ""),
            entity("抗生素", "Treatment", ""),
        ];
        let relationships = vec![
            rel("肺炎", "发热", "HAS_SYMPTOM"),
            rel("肺炎", "咳嗽", "HAS_SYMPTOM"),
            rel("抗生素", "肺炎", "TREATS"),
        ];
        let view = GraphView::build(&entities, &relationships);
        assert_eq!(view.categories, vec!["Disease", "Symptom", "Treatment"]);
        let degree_of = |name: &str| {
            view.nodes
                .iter()
                .find(|node| node.name == name)
                .map(|node| node.degree)
                .unwrap()
        };
        assert_eq!(degree_of("肺炎"), 3);
        assert_eq!(degree_of("发热"), 1);
        assert_eq!(degree_of("抗生素"), 1);
        assert_eq!(view.nodes[0].category, 0);
        assert_eq!(view.nodes[2].category, 1);
    }

    #[test]
    fn type_counts_follow_category_order() {
        let entities = vec![
            entity("肺炎", "Disease", ""),
            entity("发热", "Symptom", ""),
            entity("咳嗽", "Symptom", ""),
        ];
        let view = GraphView::build(&entities, &[]);
        assert_eq!(
            view.type_counts(),
            vec![("Disease".to_string(), 1), ("Symptom".to_string(), 2)]
        );
    }

    #[test]
    fn round_trip_preserves_cleaned_shape() {
        let entities = vec![
            entity("肺炎", "Disease", "感染性疾病"),
            entity("发热", "Symptom", ""),
        ];
        let relationships = vec![rel("肺炎", "发热", "HAS_SYMPTOM")];
        let view = GraphView::build(&entities, &relationships);
        let rebuilt = GraphView::build(&view.entities(), &view.relationships());
        assert_eq!(rebuilt.nodes, view.nodes);
        assert_eq!(rebuilt.edges, view.edges);
    }
}
