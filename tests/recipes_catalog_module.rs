use deckhand::recipes::{CatalogError, RecipeCatalog};
use deckhand::templates::default_recipe_catalog;
use std::fs;
use tempfile::tempdir;

#[test]
fn shipped_recipes_validate_and_cover_the_canonical_set() {
    let catalog =
        RecipeCatalog::from_recipes(default_recipe_catalog()).expect("default catalog is valid");
    for recipe_id in ["transcribe_folder", "lp_base_export_round1", "prepare_project"] {
        let recipe = catalog.get(recipe_id).expect("canonical recipe present");
        assert!(!recipe.steps.is_empty());
    }
}

#[test]
fn catalog_round_trips_through_a_yaml_document() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("recipes.yaml");
    let body = serde_yaml::to_string(&default_recipe_catalog()).expect("serialize catalog");
    fs::write(&path, body).expect("write catalog");

    let catalog = RecipeCatalog::load(&path).expect("load catalog");
    assert_eq!(catalog.recipes().len(), 3);
    let transcribe = catalog.get("transcribe_folder").expect("recipe");
    assert!(transcribe.steps[0].cache_policy.enabled);
}

#[test]
fn json_documents_load_as_well() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("recipes.json");
    let body = serde_json::to_string_pretty(&default_recipe_catalog()).expect("serialize");
    fs::write(&path, body).expect("write catalog");
    let catalog = RecipeCatalog::load(&path).expect("json catalog loads");
    assert_eq!(catalog.recipes().len(), 3);
}

#[test]
fn duplicate_recipe_ids_are_rejected() {
    let mut recipes = default_recipe_catalog();
    let duplicate = recipes[0].clone();
    recipes.push(duplicate);
    match RecipeCatalog::from_recipes(recipes) {
        Err(CatalogError::DuplicateRecipe { recipe_id }) => {
            assert_eq!(recipe_id, "transcribe_folder");
        }
        other => panic!("expected duplicate recipe error, got {other:?}"),
    }
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let mut recipes = default_recipe_catalog();
    let recipe = &mut recipes[2];
    let duplicated = recipe.steps[0].clone();
    recipe.steps.push(duplicated);
    assert!(matches!(
        RecipeCatalog::from_recipes(recipes),
        Err(CatalogError::Validation { .. })
    ));
}

#[test]
fn command_must_be_owned_by_the_declared_worker() {
    let mut recipes = default_recipe_catalog();
    recipes[0].steps[0].worker = deckhand::protocol::WorkerKind::Resolve;
    match RecipeCatalog::from_recipes(recipes) {
        Err(CatalogError::Validation { reason, .. }) => {
            assert!(reason.contains("owned by"), "unexpected reason: {reason}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn unknown_commands_are_rejected() {
    let mut recipes = default_recipe_catalog();
    recipes[0].steps[0].command = "defragment".to_string();
    assert!(matches!(
        RecipeCatalog::from_recipes(recipes),
        Err(CatalogError::Validation { .. })
    ));
}

#[test]
fn dependencies_must_name_declared_non_self_steps() {
    let mut recipes = default_recipe_catalog();
    recipes[2].steps[1].depends_on = vec!["create_bins".to_string()];
    match RecipeCatalog::from_recipes(recipes) {
        Err(CatalogError::Validation { reason, .. }) => {
            assert!(reason.contains("depends on itself"));
        }
        other => panic!("expected self-dependency error, got {other:?}"),
    }

    let mut recipes = default_recipe_catalog();
    recipes[2].steps[1].depends_on = vec!["ghost".to_string()];
    assert!(matches!(
        RecipeCatalog::from_recipes(recipes),
        Err(CatalogError::Validation { .. })
    ));
}

#[test]
fn dependency_cycles_are_rejected() {
    let mut recipes = default_recipe_catalog();
    let recipe = &mut recipes[2];
    recipe.steps[0].depends_on = vec!["create_bins".to_string()];
    match RecipeCatalog::from_recipes(recipes) {
        Err(CatalogError::Validation { reason, .. }) => {
            assert!(reason.contains("cycle"), "unexpected reason: {reason}");
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
}

#[test]
fn unknown_recipe_lookup_reports_the_id() {
    let catalog = RecipeCatalog::from_recipes(default_recipe_catalog()).expect("catalog");
    match catalog.get("ghost") {
        Err(CatalogError::UnknownRecipe { recipe_id }) => assert_eq!(recipe_id, "ghost"),
        other => panic!("expected unknown recipe error, got {other:?}"),
    }
}
