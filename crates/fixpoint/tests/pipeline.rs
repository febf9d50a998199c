//! End-to-end pipeline through the public API: a seed analysis, a lazy
//! analysis over its results, a collaborative kind, and a suppressed
//! depender, across two scheduled phases.

use std::sync::Arc;

use fixpoint::{
    Analysis, AnalysisScheduler, ComputationResult, EntityProperty, FixpointError, KindRegistry,
    Property, PropertyBound, PropertyKey, PropertyStore, StoreConfig,
};
use fixpoint_testkit::{entity, final_int, int_kind, strings_kind, Strings};

struct SeedSizes {
    key: PropertyKey,
    methods: Vec<(fixpoint::Entity, i64)>,
}

impl Analysis for SeedSizes {
    fn name(&self) -> &str {
        "seed-sizes"
    }

    fn uses(&self) -> Vec<PropertyBound> {
        Vec::new()
    }

    fn derives_eagerly(&self) -> Vec<PropertyBound> {
        vec![PropertyBound::upper(self.key)]
    }

    fn start(&mut self, store: &PropertyStore) {
        let key = self.key;
        for (method, size) in self.methods.clone() {
            store.schedule_eager_computation_for_entity(method, move |_store, e| {
                ComputationResult::final_ep(e.clone(), Property::new(key, size))
            });
        }
    }
}

/// Lazily doubles the sealed size of a method.
struct DoubledSizes {
    source: PropertyKey,
    key: PropertyKey,
}

impl Analysis for DoubledSizes {
    fn name(&self) -> &str {
        "doubled-sizes"
    }

    fn uses(&self) -> Vec<PropertyBound> {
        vec![PropertyBound::final_value(self.source)]
    }

    fn derives_lazily(&self) -> Option<PropertyBound> {
        Some(PropertyBound::upper(self.key))
    }

    fn start(&mut self, store: &PropertyStore) {
        let source = self.source;
        let key = self.key;
        store.register_lazy_computation(key, move |store, e| {
            let size = *store.get(e, source).expect_final().expect_value::<i64>();
            ComputationResult::final_ep(e.clone(), Property::new(key, size * 2))
        });
    }
}

/// Contributes one tag to a collaboratively derived set.
struct TagContributor {
    name: String,
    key: PropertyKey,
    target: fixpoint::Entity,
    tag: &'static str,
}

impl Analysis for TagContributor {
    fn name(&self) -> &str {
        &self.name
    }

    fn uses(&self) -> Vec<PropertyBound> {
        Vec::new()
    }

    fn derives_collaboratively(&self) -> Vec<PropertyBound> {
        vec![PropertyBound::upper(self.key)]
    }

    fn start(&mut self, store: &PropertyStore) {
        let key = self.key;
        let tag = self.tag;
        store.schedule_eager_computation_for_entity(self.target.clone(), move |_store, e| {
            ComputationResult::partial(e.clone(), key, move |current| {
                let mut set = current
                    .upper()
                    .map(|p| p.expect_value::<Strings>().0.clone())
                    .unwrap_or_default();
                if set.insert(tag.to_string()) {
                    Some(EntityProperty::interim_upper(
                        current.entity().clone(),
                        Property::new(key, Strings(set)),
                    ))
                } else {
                    None
                }
            })
        });
    }
}

#[test]
fn test_two_phase_pipeline_with_lazy_and_collaborative_kinds() {
    let mut registry = KindRegistry::new();
    let sizes = int_kind(&mut registry, "MethodSize", 0);
    let doubled = int_kind(&mut registry, "DoubledSize", 0);
    let tags = strings_kind(&mut registry, "Tags");
    let store = PropertyStore::new(Arc::new(registry), StoreConfig::default());

    let m1 = entity("m1");
    let m2 = entity("m2");

    let mut scheduler = AnalysisScheduler::new();
    scheduler.add(SeedSizes {
        key: sizes,
        methods: vec![(m1.clone(), 10), (m2.clone(), 20)],
    });
    scheduler.add(DoubledSizes {
        source: sizes,
        key: doubled,
    });
    scheduler.add(TagContributor {
        name: "tag-a".into(),
        key: tags,
        target: m1.clone(),
        tag: "a",
    });
    scheduler.add(TagContributor {
        name: "tag-b".into(),
        key: tags,
        target: m1.clone(),
        tag: "b",
    });

    // The lazy consumer needs sealed sizes, so the planner puts it in a
    // second phase; the tag contributors are independent and land in the
    // first.
    let reports = {
        let plan = scheduler.plan().unwrap();
        assert_eq!(plan.phases.len(), 2);
        scheduler.run(&store).unwrap()
    };
    assert_eq!(reports.len(), 2);

    assert_eq!(final_int(&store, &m1, sizes), 10);
    assert_eq!(final_int(&store, &m2, sizes), 20);
    assert_eq!(
        store
            .get(&m1, tags)
            .expect_final()
            .expect_value::<Strings>(),
        &Strings::of(&["a", "b"])
    );

    // Nothing forced DoubledSize, so its phase completed with no states.
    let report = &reports[1];
    assert!(!report.cancelled);
    assert!(report.incomplete.is_empty());
}

#[test]
fn test_lazy_values_computed_on_demand_within_their_phase() {
    let mut registry = KindRegistry::new();
    let sizes = int_kind(&mut registry, "MethodSize", 0);
    let doubled = int_kind(&mut registry, "DoubledSize", 0);
    let store = PropertyStore::new(Arc::new(registry), StoreConfig::default());

    let m = entity("m");

    struct ForceDoubled {
        key: PropertyKey,
        target: fixpoint::Entity,
    }

    impl Analysis for ForceDoubled {
        fn name(&self) -> &str {
            "force-doubled"
        }

        fn uses(&self) -> Vec<PropertyBound> {
            vec![PropertyBound::upper(self.key)]
        }

        fn start(&mut self, store: &PropertyStore) {
            store.force(&self.target, self.key);
        }
    }

    let mut scheduler = AnalysisScheduler::new();
    scheduler.add(SeedSizes {
        key: sizes,
        methods: vec![(m.clone(), 21)],
    });
    scheduler.add(DoubledSizes {
        source: sizes,
        key: doubled,
    });
    scheduler.add(ForceDoubled {
        key: doubled,
        target: m.clone(),
    });

    scheduler.run(&store).unwrap();
    assert_eq!(final_int(&store, &m, doubled), 42);
}

#[test]
fn test_planning_rejects_duplicate_lazy_producers() {
    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "K", 0);

    struct Lazy(PropertyKey);
    impl Analysis for Lazy {
        fn name(&self) -> &str {
            "lazy"
        }
        fn uses(&self) -> Vec<PropertyBound> {
            Vec::new()
        }
        fn derives_lazily(&self) -> Option<PropertyBound> {
            Some(PropertyBound::upper(self.0))
        }
        fn start(&mut self, _store: &PropertyStore) {}
    }

    let mut scheduler = AnalysisScheduler::new();
    scheduler.add(Lazy(k));
    scheduler.add(Lazy(k));
    assert!(matches!(
        scheduler.plan(),
        Err(FixpointError::InvalidSchedule(_))
    ));
}
