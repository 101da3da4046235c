use archi_core::query::{ElementFilter, RelationshipFilter};
use archi_core::store::UpsertStatus;
use archi_core::{
    ArchimateCatalog, ElementInput, ModelError, ModelPatch, ModelStore, NewModel, RelationshipInput, WriteMeta,
};

fn store_with_model() -> (ModelStore, String) {
    let store = ModelStore::in_memory().unwrap();
    let created = store
        .create_model(
            NewModel {
                id: Some("bank".into()),
                name: "Bank".into(),
                description: Some("Retail banking".into()),
                ..Default::default()
            },
            Some("alice"),
        )
        .unwrap();
    assert_eq!(created.version, 1);
    (store, created.model.id)
}

fn element(id: &str, type_name: &str, name: &str) -> ElementInput {
    ElementInput {
        id: Some(id.into()),
        type_name: type_name.into(),
        name: name.into(),
        ..Default::default()
    }
}

fn link(id: &str, type_name: &str, source: &str, target: &str) -> RelationshipInput {
    RelationshipInput {
        id: Some(id.into()),
        type_name: type_name.into(),
        source_element_id: source.into(),
        target_element_id: target.into(),
        ..Default::default()
    }
}

#[test]
fn versions_are_contiguous() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::by("alice");
    store.upsert_element(&id, element("a", "Business Actor", "Customer"), &meta).unwrap();
    store.upsert_element(&id, element("b", "Business Service", "Payments"), &meta).unwrap();
    store.upsert_relationship(&id, link("r1", "Serving", "b", "a"), &meta).unwrap();
    store
        .update_model(&id, ModelPatch { description: Some("Updated".into()), ..Default::default() }, &meta)
        .unwrap();

    let versions = store.list_versions(&id, None).unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![5, 4, 3, 2, 1]);
    assert_eq!(versions[4].message, "Model created");
    assert_eq!(versions[4].author, "alice");
    assert_eq!(store.get_model(&id).unwrap().current_version, 5);

    let limited = store.list_versions(&id, Some(2)).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].version, 5);
}

#[test]
fn snapshot_reflects_post_change_state() {
    let (store, id) = store_with_model();
    store
        .upsert_element(&id, element("a", "Node", "Host"), &WriteMeta::default())
        .unwrap();
    let v2 = store.get_version(&id, 2).unwrap();
    assert_eq!(v2.info.author, "system");
    assert_eq!(v2.info.message, "Element created");
    assert_eq!(v2.snapshot.model.current_version, 2);
    assert_eq!(v2.snapshot.elements.len(), 1);
    assert_eq!(v2.snapshot.elements[0].name, "Host");

    let v1 = store.get_version(&id, 1).unwrap();
    assert!(v1.snapshot.elements.is_empty());
}

#[test]
fn stale_expected_version_is_rejected() {
    let (store, id) = store_with_model();
    store
        .upsert_element(&id, element("a", "Node", "Host"), &WriteMeta::default().expecting(1))
        .unwrap();

    let err = store
        .upsert_element(&id, element("b", "Device", "Phone"), &WriteMeta::default().expecting(1))
        .unwrap_err();
    match err {
        ModelError::VersionConflict { expected, actual } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.get_model(&id).unwrap().current_version, 2);
    assert_eq!(store.snapshot(&id).unwrap().elements.len(), 1);

    let err = store.delete_element(&id, "a", &WriteMeta::default().expecting(7)).unwrap_err();
    assert!(matches!(err, ModelError::VersionConflict { .. }));
    assert_eq!(store.list_versions(&id, None).unwrap().len(), 2);
}

#[test]
fn mutations_on_missing_model_fail() {
    let store = ModelStore::in_memory().unwrap();
    let err = store
        .upsert_element("nope", element("a", "Node", "Host"), &WriteMeta::default())
        .unwrap_err();
    assert!(matches!(err, ModelError::NotFound { what: "Model", .. }));
    assert!(matches!(store.delete_model("nope"), Err(ModelError::NotFound { .. })));
}

#[test]
fn duplicate_model_id_is_rejected() {
    let (store, id) = store_with_model();
    let err = store
        .create_model(NewModel { id: Some(id), name: "Again".into(), ..Default::default() }, None)
        .unwrap_err();
    assert!(matches!(err, ModelError::AlreadyExists { .. }));
}

#[test]
fn blank_required_fields_are_invalid_arguments() {
    let (store, id) = store_with_model();
    let err = store
        .upsert_element(&id, element("a", "Node", "  "), &WriteMeta::default())
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidArgument(_)));
    assert_eq!(store.get_model(&id).unwrap().current_version, 1);
}

#[test]
fn upsert_replaces_instead_of_duplicating() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::default();
    let first = store.upsert_element(&id, element("a", "Node", "Host"), &meta).unwrap();
    assert_eq!(first.status, UpsertStatus::Created);

    let catalog = ArchimateCatalog;
    let filter = ElementFilter { search: Some("Host".into()), ..Default::default() };
    let hits = store.search_elements(&id, &filter, &catalog).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].element.id, "a");
    let created_at = hits[0].element.created_at.clone();

    let second = store.upsert_element(&id, element("a", "Node", "Host 2"), &meta).unwrap();
    assert_eq!(second.status, UpsertStatus::Updated);
    let snapshot = store.snapshot(&id).unwrap();
    assert_eq!(snapshot.elements.len(), 1);
    assert_eq!(snapshot.elements[0].name, "Host 2");
    assert_eq!(snapshot.elements[0].created_at, created_at);
}

#[test]
fn generated_ids_are_unique() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::default();
    let input = ElementInput { type_name: "Node".into(), name: "Host".into(), ..Default::default() };
    let a = store.upsert_element(&id, input.clone(), &meta).unwrap();
    let b = store.upsert_element(&id, input, &meta).unwrap();
    assert_ne!(a.element_id, b.element_id);
    assert_eq!(store.snapshot(&id).unwrap().elements.len(), 2);
}

#[test]
fn relationship_endpoints_must_exist() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::default();
    store.upsert_element(&id, element("a", "Node", "Host"), &meta).unwrap();
    let err = store.upsert_relationship(&id, link("r1", "Serving", "a", "ghost"), &meta).unwrap_err();
    assert_eq!(err.to_string(), "Element 'ghost' not found in model 'bank'");
    assert_eq!(store.get_model(&id).unwrap().current_version, 2);
}

#[test]
fn deleting_element_cascades_to_its_relationships() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::default();
    for (eid, t) in [("a", "Node"), ("b", "Device"), ("c", "System Software")] {
        store.upsert_element(&id, element(eid, t, eid), &meta).unwrap();
    }
    store.upsert_relationship(&id, link("r1", "Serving", "a", "b"), &meta).unwrap();
    store.upsert_relationship(&id, link("r2", "Serving", "c", "a"), &meta).unwrap();
    store.upsert_relationship(&id, link("r3", "Serving", "b", "c"), &meta).unwrap();

    let outcome = store.delete_element(&id, "a", &meta).unwrap();
    assert_eq!(outcome.relationships_deleted, 2);
    let remaining = store
        .search_relationships(&id, &RelationshipFilter::default(), &ArchimateCatalog)
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].relationship.id, "r3");

    let err = store.delete_element(&id, "a", &meta).unwrap_err();
    assert!(matches!(err, ModelError::NotFound { what: "Element", .. }));
}

#[test]
fn revert_restores_content_and_appends() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::by("bob");
    store.upsert_element(&id, element("a", "Node", "Host"), &meta).unwrap();
    store.upsert_element(&id, element("b", "Device", "Phone"), &meta).unwrap();
    store.upsert_relationship(&id, link("r1", "Serving", "a", "b"), &meta).unwrap();
    let target = store.get_version(&id, 4).unwrap().snapshot;
    assert_eq!(target.relationships.len(), 1);

    store.delete_element(&id, "b", &meta).unwrap();
    store.upsert_element(&id, element("a", "Node", "Renamed"), &meta).unwrap();
    store
        .update_model(&id, ModelPatch { name: Some("Other".into()), ..Default::default() }, &meta)
        .unwrap();
    assert_eq!(store.get_model(&id).unwrap().current_version, 7);

    let outcome = store.revert_to_version(&id, 4, &meta).unwrap();
    assert_eq!(outcome.from_version, 7);
    assert_eq!(outcome.version, 8);

    let now = store.snapshot(&id).unwrap();
    assert_eq!(now.elements, target.elements);
    assert_eq!(now.relationships, target.relationships);
    assert_eq!(now.model.name, "Bank");
    assert_eq!(now.model.current_version, 8);

    let head = &store.list_versions(&id, Some(1)).unwrap()[0];
    assert_eq!(head.message, "Reverted to version 4");
    assert_eq!(head.author, "bob");

    let err = store.revert_to_version(&id, 99, &meta).unwrap_err();
    assert!(matches!(err, ModelError::NotFound { what: "Version", .. }));
}

#[test]
fn delete_model_cascades() {
    let (store, id) = store_with_model();
    store
        .upsert_element(&id, element("a", "Node", "Host"), &WriteMeta::default())
        .unwrap();
    assert_eq!(store.delete_model(&id).unwrap(), 1);
    assert!(store.list_models(None, None).unwrap().is_empty());
    assert!(matches!(store.list_versions(&id, None), Err(ModelError::NotFound { .. })));
}

#[test]
fn list_models_searches_and_orders() {
    let store = ModelStore::in_memory().unwrap();
    for (id, name) in [("m1", "Retail"), ("m2", "Wholesale"), ("m3", "Retail Lending")] {
        store
            .create_model(NewModel { id: Some(id.into()), name: name.into(), ..Default::default() }, None)
            .unwrap();
    }
    store
        .update_model("m1", ModelPatch::default(), &WriteMeta::default())
        .unwrap();

    let all = store.list_models(None, None).unwrap();
    assert_eq!(all[0].id, "m1");
    let retail = store.list_models(None, Some("retail")).unwrap();
    assert_eq!(retail.len(), 2);
    assert_eq!(store.list_models(Some(1), None).unwrap().len(), 1);
}

#[test]
fn report_density_for_four_elements_two_relationships() {
    let (store, id) = store_with_model();
    let meta = WriteMeta::default();
    for (eid, t) in [("a", "Node"), ("b", "Device"), ("c", "Node"), ("d", "Node")] {
        store.upsert_element(&id, element(eid, t, eid), &meta).unwrap();
    }
    store.upsert_relationship(&id, link("r1", "Serving", "a", "b"), &meta).unwrap();
    store.upsert_relationship(&id, link("r2", "Serving", "c", "d"), &meta).unwrap();

    let report = store.generate_report(&id, &ArchimateCatalog).unwrap();
    assert_eq!(report.totals.relationship_density, 0.5);

    let validation = store.validate_model(&id, &ArchimateCatalog).unwrap();
    assert!(validation.is_valid);
}

#[test]
fn unknown_type_fails_validation_once() {
    let (store, id) = store_with_model();
    store
        .upsert_element(&id, element("a", "Widget", "Thing"), &WriteMeta::default())
        .unwrap();
    let validation = store.validate_model(&id, &ArchimateCatalog).unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.summary.errors, 1);
    let json = serde_json::to_value(&validation.issues[0]).unwrap();
    assert_eq!(json["code"], "UNKNOWN_ELEMENT_TYPE");
}
