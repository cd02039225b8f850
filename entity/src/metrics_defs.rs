//! Metrics definitions for entities.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ENTITIES_CREATED: MetricDef = MetricDef {
    name: "entity.created",
    metric_type: MetricType::Counter,
    description: "Number of entity instances constructed",
};

pub const ENTITIES_ACTIVE: MetricDef = MetricDef {
    name: "entity.active",
    metric_type: MetricType::Gauge,
    description: "Number of entity instances held by the namespace",
};

pub const ENTITY_CONSTRUCTION_FAILED: MetricDef = MetricDef {
    name: "entity.construction_failed",
    metric_type: MetricType::Counter,
    description: "Number of failed entity constructions",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ENTITIES_CREATED,
    ENTITIES_ACTIVE,
    ENTITY_CONSTRUCTION_FAILED,
];
